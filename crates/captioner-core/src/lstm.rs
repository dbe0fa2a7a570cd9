//! Stacked LSTM used as the recurrent decoder core
//!
//! Tensor names follow PyTorch's `nn.LSTM` layout (`weight_ih_l{k}`,
//! `weight_hh_l{k}`, `bias_ih_l{k}`, `bias_hh_l{k}`), so a checkpoint exported
//! from torch loads without renaming.

use anyhow::{bail, Result};
use candle_core::Tensor;
use candle_nn::rnn::{lstm, LSTMConfig, LSTMState, LSTM, RNN};
use candle_nn::VarBuilder;

/// Recurrent memory for one decoding session
///
/// Holds one `(h, c)` pair per layer, each of shape `(batch, hidden_size)`.
#[derive(Debug, Clone)]
pub struct DecoderState {
    layers: Vec<LSTMState>,
}

impl DecoderState {
    pub fn new(layers: Vec<LSTMState>) -> Self {
        Self { layers }
    }

    /// Per-layer states, bottom layer first
    pub fn layers(&self) -> &[LSTMState] {
        &self.layers
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Output state of the top layer
    pub fn top_h(&self) -> Option<&Tensor> {
        self.layers.last().map(LSTMState::h)
    }
}

/// `num_layers` LSTM layers, each feeding its hidden sequence to the next
pub struct StackedLstm {
    layers: Vec<LSTM>,
    hidden_size: usize,
}

impl StackedLstm {
    /// Create a new stacked LSTM
    ///
    /// # Arguments
    /// * `input_size` - Width of layer-0 inputs
    /// * `hidden_size` - Hidden width of every layer
    /// * `num_layers` - Number of layers (at least 1)
    /// * `vb` - Variable builder; layers are named by index, not by prefix
    pub fn new(
        input_size: usize,
        hidden_size: usize,
        num_layers: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        if num_layers == 0 {
            bail!("StackedLstm needs at least one layer");
        }

        let layers = (0..num_layers)
            .map(|layer_idx| {
                let in_dim = if layer_idx == 0 { input_size } else { hidden_size };
                let config = LSTMConfig {
                    layer_idx,
                    ..Default::default()
                };
                lstm(in_dim, hidden_size, config, vb.clone())
            })
            .collect::<candle_core::Result<Vec<_>>>()?;

        Ok(Self {
            layers,
            hidden_size,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Zero `(h, c)` for every layer
    pub fn zero_state(&self, batch_size: usize) -> Result<DecoderState> {
        let layers = self
            .layers
            .iter()
            .map(|layer| layer.zero_state(batch_size))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(DecoderState::new(layers))
    }

    /// Run over a whole `(batch, seq, input_size)` sequence from a zero state
    ///
    /// Returns the top layer's outputs `(batch, seq, hidden_size)`.
    pub fn seq(&self, input: &Tensor) -> Result<Tensor> {
        let state = self.zero_state(input.dim(0)?)?;
        let (output, _) = self.seq_init(input, &state)?;
        Ok(output)
    }

    /// Run over a whole sequence starting from `init`
    ///
    /// Returns the top layer's outputs and the state after the last position.
    pub fn seq_init(&self, input: &Tensor, init: &DecoderState) -> Result<(Tensor, DecoderState)> {
        let mut xs = input.clone();
        let mut last = Vec::with_capacity(self.layers.len());

        for (layer, layer_init) in self.layers.iter().zip(init.layers()) {
            let states = layer.seq_init(&xs, layer_init)?;
            xs = layer.states_to_tensor(&states)?;
            last.push(states.last().cloned().unwrap_or_else(|| layer_init.clone()));
        }

        Ok((xs, DecoderState::new(last)))
    }

    /// Advance every layer by one time step
    ///
    /// `input` is `(batch, input_size)`. Returns the top layer's output
    /// `(batch, hidden_size)` and the new state; `state` is left untouched.
    pub fn step(&self, input: &Tensor, state: &DecoderState) -> Result<(Tensor, DecoderState)> {
        let mut x = input.clone();
        let mut next = Vec::with_capacity(self.layers.len());

        for (layer, layer_state) in self.layers.iter().zip(state.layers()) {
            let new_state = layer.step(&x, layer_state)?;
            x = new_state.h().clone();
            next.push(new_state);
        }

        Ok((x, DecoderState::new(next)))
    }
}
