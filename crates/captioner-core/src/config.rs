//! Configuration loading for the captioning model.

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::backbone::Backbone;
use crate::decoder::{DEFAULT_MAX_LEN, STOP_TOKEN};

/// Environment variable overriding the configured backbone
pub const BACKBONE_ENV: &str = "CAPTIONER_BACKBONE";

/// Default width of image and word embeddings
pub const DEFAULT_EMBED_SIZE: usize = 256;

/// Default width of the LSTM hidden state
pub const DEFAULT_HIDDEN_SIZE: usize = 512;

/// Default vocabulary size
pub const DEFAULT_VOCAB_SIZE: usize = 5000;

/// Default number of stacked LSTM layers
pub const DEFAULT_NUM_LAYERS: usize = 1;

/// Default square input resolution for the backbone
pub const DEFAULT_IMAGE_SIZE: usize = 224;

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    pub model: Option<ModelSection>,
    pub sampling: Option<SamplingSection>,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct ModelSection {
    pub embed_size: Option<usize>,
    pub hidden_size: Option<usize>,
    pub vocab_size: Option<usize>,
    pub num_layers: Option<usize>,
    pub backbone: Option<Backbone>,
    pub image_size: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct SamplingSection {
    pub max_len: Option<usize>,
    pub stop_token: Option<u32>,
}

/// Resolved model hyperparameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelConfig {
    /// Shared width of the encoder output and the decoder input
    pub embed_size: usize,
    /// LSTM hidden state width
    pub hidden_size: usize,
    /// Must match the external vocabulary table
    pub vocab_size: usize,
    /// Number of stacked LSTM layers
    pub num_layers: usize,
    /// Pretrained feature extractor
    pub backbone: Backbone,
    /// Square image resolution fed to the backbone
    pub image_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embed_size: DEFAULT_EMBED_SIZE,
            hidden_size: DEFAULT_HIDDEN_SIZE,
            vocab_size: DEFAULT_VOCAB_SIZE,
            num_layers: DEFAULT_NUM_LAYERS,
            backbone: Backbone::default(),
            image_size: DEFAULT_IMAGE_SIZE,
        }
    }
}

impl ModelConfig {
    /// Reject configurations no layer can be built from
    pub fn validate(&self) -> Result<()> {
        if self.embed_size == 0 || self.hidden_size == 0 || self.vocab_size == 0 {
            bail!(
                "embed_size, hidden_size and vocab_size must be positive (got {}, {}, {})",
                self.embed_size,
                self.hidden_size,
                self.vocab_size
            );
        }
        if self.num_layers == 0 {
            bail!("num_layers must be at least 1");
        }
        Ok(())
    }

    /// Number of trainable scalars: encoder projection plus the whole decoder
    pub fn trainable_param_count(&self) -> usize {
        let (e, h, v) = (self.embed_size, self.hidden_size, self.vocab_size);
        let projection = self.backbone.feature_width() * e + e;
        let word_embeddings = v * e;
        let lstm: usize = (0..self.num_layers)
            .map(|layer| {
                let input = if layer == 0 { e } else { h };
                4 * h * input + 4 * h * h + 8 * h
            })
            .sum();
        let hidden2vocab = h * v + v;
        projection + word_embeddings + lstm + hidden2vocab
    }

    /// Replace the backbone when `value` is set
    pub fn with_backbone_override(mut self, value: Option<&str>) -> Result<Self> {
        if let Some(value) = value {
            self.backbone = value
                .parse()
                .with_context(|| format!("Failed to parse {BACKBONE_ENV}='{value}'"))?;
        }
        Ok(self)
    }

    /// Apply [`BACKBONE_ENV`] when present
    pub fn with_env_overrides(self) -> Result<Self> {
        match env::var(BACKBONE_ENV) {
            Ok(value) => self.with_backbone_override(Some(&value)),
            Err(env::VarError::NotPresent) => Ok(self),
            Err(e) => Err(anyhow::anyhow!("Failed to read {BACKBONE_ENV}: {e}")),
        }
    }
}

/// Resolved greedy sampling settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SamplingConfig {
    pub max_len: usize,
    pub stop_token: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_len: DEFAULT_MAX_LEN,
            stop_token: STOP_TOKEN,
        }
    }
}

impl Config {
    pub fn model_config(&self) -> ModelConfig {
        let defaults = ModelConfig::default();
        let Some(model) = self.model.as_ref() else {
            return defaults;
        };
        ModelConfig {
            embed_size: model.embed_size.unwrap_or(defaults.embed_size),
            hidden_size: model.hidden_size.unwrap_or(defaults.hidden_size),
            vocab_size: model.vocab_size.unwrap_or(defaults.vocab_size),
            num_layers: model.num_layers.unwrap_or(defaults.num_layers),
            backbone: model.backbone.unwrap_or(defaults.backbone),
            image_size: model.image_size.unwrap_or(defaults.image_size),
        }
    }

    pub fn sampling_config(&self) -> SamplingConfig {
        let defaults = SamplingConfig::default();
        let Some(sampling) = self.sampling.as_ref() else {
            return defaults;
        };
        SamplingConfig {
            max_len: sampling.max_len.unwrap_or(defaults.max_len),
            stop_token: sampling.stop_token.unwrap_or(defaults.stop_token),
        }
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let dirs =
        ProjectDirs::from("", "", "captioner").context("Could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config =
        toml::from_str(&contents).context("Failed to parse config file as TOML")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        let model = config.model_config();
        assert_eq!(model.embed_size, 256);
        assert_eq!(model.hidden_size, 512);
        assert_eq!(model.num_layers, 1);
        assert_eq!(model.backbone, Backbone::Resnet50);
        assert_eq!(config.sampling_config().max_len, 20);
        assert_eq!(config.sampling_config().stop_token, 1);
    }

    #[test]
    fn test_partial_model_section() {
        let config = Config {
            model: Some(ModelSection {
                vocab_size: Some(9955),
                num_layers: Some(2),
                ..Default::default()
            }),
            ..Default::default()
        };
        let model = config.model_config();
        assert_eq!(model.vocab_size, 9955);
        assert_eq!(model.num_layers, 2);
        assert_eq!(model.embed_size, DEFAULT_EMBED_SIZE);
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
[model]
embed_size = 512
backbone = "resnet18"

[sampling]
max_len = 30
"#,
        )
        .unwrap();
        let model = config.model_config();
        assert_eq!(model.embed_size, 512);
        assert_eq!(model.backbone, Backbone::Resnet18);
        assert_eq!(config.sampling_config().max_len, 30);
        assert_eq!(config.sampling_config().stop_token, STOP_TOKEN);
    }

    #[test]
    fn test_example_config_matches_defaults() {
        let config: Config =
            toml::from_str(include_str!("../../../config.example.toml")).unwrap();
        assert_eq!(config.model_config(), ModelConfig::default());
        assert_eq!(config.sampling_config(), SamplingConfig::default());
    }

    #[test]
    fn test_load_missing_config_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert!(config.model.is_none());
        assert!(config.sampling.is_none());
    }

    #[test]
    fn test_load_invalid_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[model\nembed_size = ").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_backbone_override() {
        let model = ModelConfig::default()
            .with_backbone_override(Some("resnet34"))
            .unwrap();
        assert_eq!(model.backbone, Backbone::Resnet34);

        let unchanged = ModelConfig::default().with_backbone_override(None).unwrap();
        assert_eq!(unchanged.backbone, Backbone::Resnet50);

        assert!(ModelConfig::default()
            .with_backbone_override(Some("alexnet"))
            .is_err());
    }

    #[test]
    fn test_validate() {
        assert!(ModelConfig::default().validate().is_ok());
        let zero_layers = ModelConfig {
            num_layers: 0,
            ..Default::default()
        };
        assert!(zero_layers.validate().is_err());
        let zero_vocab = ModelConfig {
            vocab_size: 0,
            ..Default::default()
        };
        assert!(zero_vocab.validate().is_err());
    }

    #[test]
    fn test_trainable_param_count_single_layer() {
        let config = ModelConfig {
            embed_size: 4,
            hidden_size: 3,
            vocab_size: 10,
            num_layers: 1,
            backbone: Backbone::Resnet18,
            image_size: 64,
        };
        // projection 512*4+4, embeddings 10*4, lstm 4*3*4 + 4*3*3 + 8*3, head 3*10+10
        let expected = (512 * 4 + 4) + 40 + (48 + 36 + 24) + 40;
        assert_eq!(config.trainable_param_count(), expected);
    }
}
