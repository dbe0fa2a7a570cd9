//! Locating and opening pretrained backbone weights

use anyhow::{bail, Context, Result};
use candle_core::safetensors::MmapedSafetensors;
use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use hf_hub::api::sync::ApiBuilder;
use std::path::{Path, PathBuf};

use crate::backbone::{Backbone, RESNET_HUB_REPO};

/// Find the safetensors file for `backbone`
///
/// An explicit `local` path wins and must exist. Otherwise the file is
/// fetched (or read from cache) from the HuggingFace hub.
pub fn resolve_backbone_weights(backbone: Backbone, local: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = local {
        if !path.is_file() {
            bail!("Backbone weights not found: {}", path.display());
        }
        return Ok(path.to_path_buf());
    }

    let api = ApiBuilder::new()
        .with_progress(true)
        .build()
        .context("Failed to create HuggingFace API")?;
    let repo = api.model(RESNET_HUB_REPO.to_string());

    tracing::info!("Fetching {} weights from {}", backbone, RESNET_HUB_REPO);
    repo.get(backbone.hub_filename())
        .with_context(|| format!("Failed to get {}", backbone.hub_filename()))
}

/// Open frozen weights as a read-only `VarBuilder`
///
/// Tensors are memory-mapped and never registered as variables.
pub fn load_frozen(path: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    if path.extension().is_some_and(|ext| ext == "safetensors") {
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device)
                .with_context(|| format!("Failed to load weights: {}", path.display()))?
        };
        Ok(vb)
    } else {
        VarBuilder::from_pth(path, DType::F32, device)
            .with_context(|| format!("Failed to load weights: {}", path.display()))
    }
}

/// Tensor names stored in a safetensors file
///
/// Only the header is parsed; tensor data stays memory-mapped.
pub fn safetensors_names(path: &Path) -> Result<Vec<String>> {
    let tensors = unsafe {
        MmapedSafetensors::new(path)
            .with_context(|| format!("Invalid safetensors file: {}", path.display()))?
    };
    let mut names: Vec<String> = tensors.tensors().into_iter().map(|(name, _)| name).collect();
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Tensor;
    use std::collections::HashMap;

    #[test]
    fn test_missing_local_weights() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("resnet50.safetensors");
        let err = resolve_backbone_weights(Backbone::Resnet50, Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_existing_local_weights() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resnet18.safetensors");
        std::fs::write(&path, b"").unwrap();
        let resolved = resolve_backbone_weights(Backbone::Resnet18, Some(&path)).unwrap();
        assert_eq!(resolved, path);
    }

    #[test]
    fn test_load_frozen_and_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.safetensors");
        let mut tensors = HashMap::new();
        tensors.insert(
            "conv1.weight".to_string(),
            Tensor::ones((2, 3), DType::F32, &Device::Cpu).unwrap(),
        );
        tensors.insert(
            "bn1.bias".to_string(),
            Tensor::zeros(2, DType::F32, &Device::Cpu).unwrap(),
        );
        candle_core::safetensors::save(&tensors, &path).unwrap();

        let names = safetensors_names(&path).unwrap();
        assert_eq!(names, vec!["bn1.bias".to_string(), "conv1.weight".to_string()]);

        let vb = load_frozen(&path, &Device::Cpu).unwrap();
        let weight = vb.get((2, 3), "conv1.weight").unwrap();
        assert_eq!(weight.sum_all().unwrap().to_scalar::<f32>().unwrap(), 6.0);
    }

    #[test]
    fn test_invalid_safetensors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.safetensors");
        std::fs::write(&path, b"not a checkpoint").unwrap();
        assert!(safetensors_names(&path).is_err());
    }
}
