//! Greedy autoregressive decoding
//!
//! [`GreedySampler`] yields one token per step: it runs the decoder one step,
//! takes the argmax over the vocabulary (ties go to the lowest id), and feeds
//! that token's embedding back as the next input. It finishes right after
//! yielding the stop marker, or after `max_len` tokens.

use anyhow::Result;
use candle_core::{IndexOp, Tensor};

use crate::decoder::DecoderRnn;
use crate::lstm::DecoderState;

/// Step-by-step greedy decoder over a single image
pub struct GreedySampler<'a> {
    decoder: &'a DecoderRnn,
    input: Tensor,
    state: DecoderState,
    steps: usize,
    max_len: usize,
    stop_token: u32,
    finished: bool,
}

impl<'a> GreedySampler<'a> {
    /// `input` is the first decoder input `(1, embed_size)`, usually the
    /// image embedding.
    pub fn new(
        decoder: &'a DecoderRnn,
        input: Tensor,
        state: DecoderState,
        max_len: usize,
        stop_token: u32,
    ) -> Self {
        Self {
            decoder,
            input,
            state,
            steps: 0,
            max_len,
            stop_token,
            finished: false,
        }
    }

    /// Tokens emitted so far
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Whether no further token will be produced
    pub fn is_finished(&self) -> bool {
        self.finished || self.steps >= self.max_len
    }

    /// Recurrent state after the last emitted token
    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    pub fn into_state(self) -> DecoderState {
        self.state
    }

    fn advance(&mut self) -> Result<u32> {
        let (logits, state) = self.decoder.step(&self.input, &self.state)?;
        let token = logits.i(0)?.argmax(0)?.to_scalar::<u32>()?;

        self.state = state;
        self.steps += 1;
        tracing::trace!(step = self.steps, token, "greedy step");

        if token == self.stop_token {
            self.finished = true;
        } else if self.steps < self.max_len {
            self.input = self.decoder.embed_token(token)?;
        }

        Ok(token)
    }
}

impl Iterator for GreedySampler<'_> {
    type Item = Result<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_finished() {
            return None;
        }
        match self.advance() {
            Ok(token) => Some(Ok(token)),
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
