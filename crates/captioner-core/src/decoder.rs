//! Recurrent caption decoder
//!
//! Word embeddings feed a stacked LSTM whose outputs are projected onto the
//! vocabulary. The image embedding is the first input of every sequence:
//!
//! - Training (`forward`): the caption is right-shifted, so position 0 sees
//!   the image and position `t` sees caption token `t - 1`. Logits keep the
//!   caption's length.
//! - Inference (`sample`): greedy decoding, one token per step, feeding each
//!   prediction back in until the stop marker or `max_len`.

use anyhow::Result;
use candle_core::{Device, Tensor};
use candle_nn::{embedding, linear, Embedding, Linear, Module, VarBuilder};

use crate::config::ModelConfig;
use crate::lstm::{DecoderState, StackedLstm};
use crate::sampler::GreedySampler;

/// Reserved start-of-caption marker
pub const START_TOKEN: u32 = 0;

/// Reserved end-of-caption marker
pub const STOP_TOKEN: u32 = 1;

/// Default bound on the number of sampled tokens
pub const DEFAULT_MAX_LEN: usize = 20;

/// LSTM caption decoder
pub struct DecoderRnn {
    word_embeddings: Embedding,
    lstm: StackedLstm,
    hidden2vocab: Linear,
    embed_size: usize,
    vocab_size: usize,
    device: Device,
}

impl DecoderRnn {
    /// Create a new decoder
    ///
    /// Parameters live under `word_embeddings`, `lstm` and `hidden2vocab`
    /// relative to `vb`.
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;

        let word_embeddings = embedding(
            config.vocab_size,
            config.embed_size,
            vb.pp("word_embeddings"),
        )?;
        let lstm = StackedLstm::new(
            config.embed_size,
            config.hidden_size,
            config.num_layers,
            vb.pp("lstm"),
        )?;
        let hidden2vocab = linear(config.hidden_size, config.vocab_size, vb.pp("hidden2vocab"))?;

        Ok(Self {
            word_embeddings,
            lstm,
            hidden2vocab,
            embed_size: config.embed_size,
            vocab_size: config.vocab_size,
            device: vb.device().clone(),
        })
    }

    pub fn embed_size(&self) -> usize {
        self.embed_size
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn num_layers(&self) -> usize {
        self.lstm.num_layers()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Teacher-forced forward pass
    ///
    /// # Arguments
    /// * `features` - Image embeddings `(batch, embed_size)`
    /// * `captions` - Token ids `(batch, caption_len)`, dtype `u32`
    ///
    /// # Returns
    /// Logits `(batch, caption_len, vocab_size)`. Position `t` predicts caption
    /// token `t`, so the last position predicts token `caption_len - 1`.
    pub fn forward(&self, features: &Tensor, captions: &Tensor) -> Result<Tensor> {
        let (_batch, caption_len) = captions.dims2()?;
        let image_step = features.unsqueeze(1)?;

        // The last token is only ever a target.
        let inputs = if caption_len > 1 {
            let embeds = self
                .word_embeddings
                .forward(&captions.narrow(1, 0, caption_len - 1)?)?;
            Tensor::cat(&[&image_step, &embeds], 1)?
        } else {
            image_step
        };

        let hidden = self.lstm.seq(&inputs)?;
        Ok(self.hidden2vocab.forward(&hidden)?)
    }

    /// Zero recurrent state for `batch_size` sequences
    pub fn zero_state(&self, batch_size: usize) -> Result<DecoderState> {
        self.lstm.zero_state(batch_size)
    }

    /// One recurrent step
    ///
    /// `input` is `(batch, embed_size)`. Returns per-token scores
    /// `(batch, vocab_size)` and the next state.
    pub fn step(&self, input: &Tensor, state: &DecoderState) -> Result<(Tensor, DecoderState)> {
        let (hidden, next) = self.lstm.step(input, state)?;
        let logits = self.hidden2vocab.forward(&hidden)?;
        Ok((logits, next))
    }

    /// Embed a single token as a `(1, embed_size)` decoder input
    pub fn embed_token(&self, token: u32) -> Result<Tensor> {
        let ids = Tensor::new(&[token], &self.device)?;
        Ok(self.word_embeddings.forward(&ids)?)
    }

    /// Greedy decoding iterator over one image
    ///
    /// `features` is a single image embedding, `(1, embed_size)` or
    /// `(1, 1, embed_size)`. A missing `state` starts from zeros.
    pub fn sampler(
        &self,
        features: &Tensor,
        state: Option<DecoderState>,
        max_len: usize,
        stop_token: u32,
    ) -> Result<GreedySampler<'_>> {
        let input = features.reshape((1, self.embed_size))?;
        let state = match state {
            Some(state) => state,
            None => self.zero_state(1)?,
        };
        Ok(GreedySampler::new(self, input, state, max_len, stop_token))
    }

    /// Greedy caption for one image, stopping at [`STOP_TOKEN`]
    ///
    /// The stop marker is included when reached; otherwise exactly
    /// `max_len` tokens are returned.
    pub fn sample(
        &self,
        features: &Tensor,
        state: Option<DecoderState>,
        max_len: usize,
    ) -> Result<Vec<u32>> {
        self.sample_with_stop(features, state, max_len, STOP_TOKEN)
    }

    /// Same as [`DecoderRnn::sample`] with a caller-chosen stop marker
    pub fn sample_with_stop(
        &self,
        features: &Tensor,
        state: Option<DecoderState>,
        max_len: usize,
        stop_token: u32,
    ) -> Result<Vec<u32>> {
        self.sampler(features, state, max_len, stop_token)?.collect()
    }
}
