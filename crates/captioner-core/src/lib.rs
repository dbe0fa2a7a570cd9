//! captioner-core: CNN encoder + LSTM decoder image captioning
//!
//! This crate provides:
//! - A frozen pretrained ResNet feature extractor with a trainable projection
//! - A word-embedding + stacked LSTM decoder with a vocabulary projection
//! - Teacher-forced forward pass for training
//! - Greedy autoregressive caption sampling
//!
//! # Example
//!
//! ```no_run
//! use captioner_core::{load_image, CaptionModel, ModelConfig, SamplingConfig};
//! use std::path::Path;
//!
//! let device = captioner_core::make_device();
//! let config = ModelConfig::default();
//! let mut model = CaptionModel::from_pretrained(&config, None, &device)?;
//! model.load_head(Path::new("head.safetensors"))?;
//!
//! let image = load_image(Path::new("dog.jpg"), config.image_size, &device)?;
//! let tokens = model.caption(&image, &SamplingConfig::default())?;
//! println!("{tokens:?}");
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod backbone;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod lstm;
pub mod model;
pub mod preprocess;
pub mod sampler;
pub mod vocab;
pub mod weights;

// Re-exports
pub use backbone::{Backbone, RESNET_HUB_REPO};
pub use config::{
    default_config_path, load_config, Config, ModelConfig, SamplingConfig, BACKBONE_ENV,
};
pub use decoder::{DecoderRnn, DEFAULT_MAX_LEN, START_TOKEN, STOP_TOKEN};
pub use encoder::EncoderCnn;
pub use lstm::{DecoderState, StackedLstm};
pub use model::CaptionModel;
pub use preprocess::{load_image, preprocess_image, IMAGENET_MEAN, IMAGENET_STD};
pub use sampler::GreedySampler;
pub use vocab::Vocabulary;
pub use weights::{load_frozen, resolve_backbone_weights, safetensors_names};

/// Create the appropriate compute device for the current platform
pub fn make_device() -> candle_core::Device {
    #[cfg(feature = "metal")]
    {
        candle_core::Device::new_metal(0).unwrap_or(candle_core::Device::Cpu)
    }
    #[cfg(not(feature = "metal"))]
    {
        candle_core::Device::Cpu
    }
}
