//! End-to-end captioning model
//!
//! Owns the frozen encoder backbone, the trainable head (encoder projection
//! and decoder) and the `VarMap` holding the head's parameters. Trainable
//! tensors are named `encoder.embed.*` and `decoder.*`.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Module, VarBuilder, VarMap};
use std::path::Path;

use crate::config::{ModelConfig, SamplingConfig};
use crate::decoder::DecoderRnn;
use crate::encoder::EncoderCnn;
use crate::weights::{load_frozen, resolve_backbone_weights, safetensors_names};

pub struct CaptionModel {
    config: ModelConfig,
    varmap: VarMap,
    encoder: EncoderCnn,
    decoder: DecoderRnn,
    device: Device,
}

impl CaptionModel {
    /// Build the model with backbone weights from `frozen`
    ///
    /// The head is freshly initialized; use [`CaptionModel::load_head`] to
    /// restore trained parameters.
    pub fn new(
        config: &ModelConfig,
        frozen: VarBuilder<'static>,
        device: &Device,
    ) -> Result<Self> {
        config.validate()?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let encoder = EncoderCnn::new(
            config.backbone,
            config.embed_size,
            frozen,
            vb.pp("encoder"),
        )
        .context("Failed to build image encoder")?;
        let decoder = DecoderRnn::new(config, vb.pp("decoder")).context("Failed to build decoder")?;

        Ok(Self {
            config: config.clone(),
            varmap,
            encoder,
            decoder,
            device: device.clone(),
        })
    }

    /// Build the model with pretrained backbone weights
    ///
    /// `backbone_weights` overrides the HuggingFace download.
    pub fn from_pretrained(
        config: &ModelConfig,
        backbone_weights: Option<&Path>,
        device: &Device,
    ) -> Result<Self> {
        let path = resolve_backbone_weights(config.backbone, backbone_weights)?;
        tracing::info!("Loading {} backbone from {}", config.backbone, path.display());
        let frozen = load_frozen(&path, device)?;
        Self::new(config, frozen, device)
    }

    /// Restore trained head parameters from a safetensors checkpoint
    ///
    /// Every trainable tensor must be present. Extra tensors are ignored.
    pub fn load_head(&mut self, path: &Path) -> Result<()> {
        let stored = safetensors_names(path)?;
        let expected = self.trainable_names()?;
        let unused: Vec<&String> = stored.iter().filter(|n| !expected.contains(n)).collect();
        if !unused.is_empty() {
            tracing::debug!(count = unused.len(), "ignoring checkpoint tensors: {:?}", unused);
        }

        self.varmap
            .load(path)
            .with_context(|| format!("Failed to load head checkpoint: {}", path.display()))?;
        tracing::info!("Loaded {} head tensors from {}", expected.len(), path.display());
        Ok(())
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn encoder(&self) -> &EncoderCnn {
        &self.encoder
    }

    pub fn decoder(&self) -> &DecoderRnn {
        &self.decoder
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Parameters an optimizer may update; never includes backbone weights
    pub fn trainable_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    /// Sorted names of the trainable parameters
    pub fn trainable_names(&self) -> Result<Vec<String>> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|e| anyhow::anyhow!("VarMap lock poisoned: {e}"))?;
        let mut names: Vec<String> = data.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Number of trainable scalars
    pub fn num_trainable_params(&self) -> usize {
        self.trainable_vars().iter().map(|v| v.elem_count()).sum()
    }

    /// Image embeddings `(batch, embed_size)` for normalized images
    pub fn encode(&self, images: &Tensor) -> Result<Tensor> {
        Ok(self.encoder.forward(images)?)
    }

    /// Teacher-forced logits `(batch, caption_len, vocab_size)`
    pub fn forward(&self, images: &Tensor, captions: &Tensor) -> Result<Tensor> {
        let features = self.encode(images)?;
        self.decoder.forward(&features, captions)
    }

    /// Greedy caption for a single `(1, 3, h, w)` image
    pub fn caption(&self, image: &Tensor, sampling: &SamplingConfig) -> Result<Vec<u32>> {
        let features = self.encode(image)?;
        let tokens = self.decoder.sample_with_stop(
            &features,
            None,
            sampling.max_len,
            sampling.stop_token,
        )?;
        tracing::debug!(tokens = tokens.len(), "sampled caption");
        Ok(tokens)
    }
}
