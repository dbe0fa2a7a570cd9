//! Pretrained ResNet backbones used by the image encoder
//!
//! Every variant is built without its final classification layer, so the
//! network ends at global average pooling and yields one feature vector per
//! image. Weights come from the `lmz/candle-resnet` HuggingFace repository,
//! which stores them with the torchvision tensor names.

use anyhow::Result;
use candle_nn::{Func, VarBuilder};
use candle_transformers::models::resnet;
use serde::{Deserialize, Serialize};

/// HuggingFace repository holding ResNet safetensors
pub const RESNET_HUB_REPO: &str = "lmz/candle-resnet";

/// ResNet depth variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backbone {
    /// ResNet-18, basic blocks, 512 features
    Resnet18,
    /// ResNet-34, basic blocks, 512 features
    Resnet34,
    /// ResNet-50, bottleneck blocks, 2048 features
    #[default]
    Resnet50,
    /// ResNet-101, bottleneck blocks, 2048 features
    Resnet101,
    /// ResNet-152, bottleneck blocks, 2048 features
    Resnet152,
}

impl Backbone {
    /// Width of the pooled feature vector (the input width of the removed `fc`)
    pub fn feature_width(&self) -> usize {
        match self {
            Self::Resnet18 | Self::Resnet34 => 512,
            Self::Resnet50 | Self::Resnet101 | Self::Resnet152 => 2048,
        }
    }

    /// Weight file name inside [`RESNET_HUB_REPO`]
    pub fn hub_filename(&self) -> &'static str {
        match self {
            Self::Resnet18 => "resnet18.safetensors",
            Self::Resnet34 => "resnet34.safetensors",
            Self::Resnet50 => "resnet50.safetensors",
            Self::Resnet101 => "resnet101.safetensors",
            Self::Resnet152 => "resnet152.safetensors",
        }
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Resnet18 => "resnet18",
            Self::Resnet34 => "resnet34",
            Self::Resnet50 => "resnet50",
            Self::Resnet101 => "resnet101",
            Self::Resnet152 => "resnet152",
        }
    }

    /// List all backbones
    pub fn all() -> &'static [Backbone] {
        &[
            Self::Resnet18,
            Self::Resnet34,
            Self::Resnet50,
            Self::Resnet101,
            Self::Resnet152,
        ]
    }

    /// Build the headless network from `vb`
    ///
    /// Output shape is `(batch, feature_width)`. The returned closure owns
    /// its layers, so `vb` must hold owned or memory-mapped tensors.
    pub fn build(&self, vb: VarBuilder<'static>) -> Result<Func<'static>> {
        let net = match self {
            Self::Resnet18 => resnet::resnet18_no_final_layer(vb)?,
            Self::Resnet34 => resnet::resnet34_no_final_layer(vb)?,
            Self::Resnet50 => resnet::resnet50_no_final_layer(vb)?,
            Self::Resnet101 => resnet::resnet101_no_final_layer(vb)?,
            Self::Resnet152 => resnet::resnet152_no_final_layer(vb)?,
        };
        Ok(net)
    }
}

impl std::str::FromStr for Backbone {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "resnet18" | "resnet-18" | "r18" => Ok(Self::Resnet18),
            "resnet34" | "resnet-34" | "r34" => Ok(Self::Resnet34),
            "resnet50" | "resnet-50" | "r50" => Ok(Self::Resnet50),
            "resnet101" | "resnet-101" | "r101" => Ok(Self::Resnet101),
            "resnet152" | "resnet-152" | "r152" => Ok(Self::Resnet152),
            other => Err(anyhow::anyhow!(
                "Unknown backbone: {other}. Available: resnet18, resnet34, resnet50, resnet101, resnet152"
            )),
        }
    }
}

impl std::fmt::Display for Backbone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_widths() {
        assert_eq!(Backbone::Resnet18.feature_width(), 512);
        assert_eq!(Backbone::Resnet34.feature_width(), 512);
        assert_eq!(Backbone::Resnet50.feature_width(), 2048);
        assert_eq!(Backbone::Resnet101.feature_width(), 2048);
        assert_eq!(Backbone::Resnet152.feature_width(), 2048);
    }

    #[test]
    fn test_default_is_resnet50() {
        assert_eq!(Backbone::default(), Backbone::Resnet50);
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("ResNet-18".parse::<Backbone>().unwrap(), Backbone::Resnet18);
        assert_eq!(" r101 ".parse::<Backbone>().unwrap(), Backbone::Resnet101);
        assert!("vgg16".parse::<Backbone>().is_err());
    }

    #[test]
    fn test_display_roundtrips_through_parse() {
        for backbone in Backbone::all() {
            let parsed: Backbone = backbone.to_string().parse().unwrap();
            assert_eq!(parsed, *backbone);
        }
    }

    #[test]
    fn test_build_outlives_builder() {
        use candle_core::{DType, Device, Module, Tensor};

        let net = {
            let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
            Backbone::Resnet18.build(vb).unwrap()
        };
        let images = Tensor::zeros((2, 3, 64, 64), DType::F32, &Device::Cpu).unwrap();
        let features = net.forward(&images).unwrap();
        assert_eq!(features.dims(), &[2, 512]);
    }

    #[test]
    fn test_hub_filenames() {
        assert_eq!(Backbone::Resnet50.hub_filename(), "resnet50.safetensors");
        assert_eq!(Backbone::Resnet152.hub_filename(), "resnet152.safetensors");
    }
}
