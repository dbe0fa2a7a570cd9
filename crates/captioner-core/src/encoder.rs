//! CNN image encoder
//!
//! A pretrained ResNet without its classification layer, followed by a
//! trainable linear projection into the shared embedding space.
//!
//! The backbone is frozen. Its weights are read through a separate
//! `VarBuilder` (normally memory-mapped safetensors), so they never enter the
//! model's `VarMap` and no optimizer can reach them. Its output is also
//! detached from the graph. Only `embed` is trainable.

use candle_core::{Result, Tensor};
use candle_nn::{linear, Func, Linear, Module, VarBuilder};

use crate::backbone::Backbone;

/// Frozen ResNet + trainable projection
pub struct EncoderCnn {
    backbone: Func<'static>,
    embed: Linear,
    kind: Backbone,
    embed_size: usize,
}

impl EncoderCnn {
    /// Create a new encoder
    ///
    /// # Arguments
    /// * `kind` - Which ResNet to build
    /// * `embed_size` - Output embedding width
    /// * `frozen` - Backbone weights (torchvision names, no prefix)
    /// * `trainable` - Builder for the projection; it is created under `embed`
    pub fn new(
        kind: Backbone,
        embed_size: usize,
        frozen: VarBuilder<'static>,
        trainable: VarBuilder,
    ) -> anyhow::Result<Self> {
        let backbone = kind.build(frozen)?;
        let embed = linear(kind.feature_width(), embed_size, trainable.pp("embed"))?;
        tracing::debug!(backbone = %kind, embed_size, "built image encoder");

        Ok(Self {
            backbone,
            embed,
            kind,
            embed_size,
        })
    }

    pub fn backbone(&self) -> Backbone {
        self.kind
    }

    pub fn embed_size(&self) -> usize {
        self.embed_size
    }

    /// Pooled backbone features `(batch, feature_width)`, detached
    pub fn features(&self, images: &Tensor) -> Result<Tensor> {
        let features = self.backbone.forward(images)?;
        let batch = features.dim(0)?;
        Ok(features.reshape((batch, ()))?.detach())
    }
}

impl Module for EncoderCnn {
    /// `(batch, 3, h, w)` normalized images to `(batch, embed_size)`
    fn forward(&self, images: &Tensor) -> Result<Tensor> {
        self.features(images)?.apply(&self.embed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn build(kind: Backbone, embed_size: usize) -> (VarMap, EncoderCnn) {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let frozen = VarBuilder::zeros(DType::F32, &device);
        let trainable = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = EncoderCnn::new(kind, embed_size, frozen, trainable).unwrap();
        (varmap, encoder)
    }

    #[test]
    fn test_only_projection_is_trainable() {
        let (varmap, encoder) = build(Backbone::Resnet18, 32);
        let data = varmap.data().lock().unwrap();
        let mut names: Vec<&String> = data.keys().collect();
        names.sort();
        assert_eq!(names, vec!["embed.bias", "embed.weight"]);
        assert_eq!(data["embed.weight"].dims(), &[32, 512]);
        assert_eq!(encoder.backbone(), Backbone::Resnet18);
    }

    #[test]
    fn test_features_shape() {
        let (_varmap, encoder) = build(Backbone::Resnet18, 32);
        let images = Tensor::zeros((2, 3, 64, 64), DType::F32, &Device::Cpu).unwrap();
        let features = encoder.features(&images).unwrap();
        assert_eq!(features.dims(), &[2, 512]);
    }

    #[test]
    fn test_forward_shape() {
        let (_varmap, encoder) = build(Backbone::Resnet18, 32);
        let images = Tensor::zeros((3, 3, 64, 64), DType::F32, &Device::Cpu).unwrap();
        let embedded = encoder.forward(&images).unwrap();
        assert_eq!(embedded.dims(), &[3, 32]);
        assert_eq!(encoder.embed_size(), 32);
    }
}
