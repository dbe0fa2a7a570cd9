//! Image preprocessing for the ResNet encoder
//!
//! Scales the shorter side to `size`, center-crops to `size x size`, converts
//! to RGB and normalizes each channel with the ImageNet statistics the
//! torchvision backbones were trained with.

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use image::imageops::FilterType;
use image::DynamicImage;
use std::path::Path;

/// ImageNet per-channel mean (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet per-channel standard deviation (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Convert an image into a normalized `(1, 3, size, size)` tensor
pub fn preprocess_image(image: &DynamicImage, size: usize, device: &Device) -> Result<Tensor> {
    let side = size as u32;
    let rgb = image.resize_to_fill(side, side, FilterType::Triangle).to_rgb8();

    let mut data = Vec::with_capacity(3 * size * size);

    // HWC -> CHW
    for c in 0..3 {
        for y in 0..side {
            for x in 0..side {
                let value = rgb.get_pixel(x, y)[c] as f32 / 255.0;
                data.push((value - IMAGENET_MEAN[c]) / IMAGENET_STD[c]);
            }
        }
    }

    Ok(Tensor::from_vec(data, (1, 3, size, size), device)?)
}

/// Open an image file and preprocess it
pub fn load_image(path: &Path, size: usize, device: &Device) -> Result<Tensor> {
    let image = image::open(path)
        .with_context(|| format!("Failed to open image: {}", path.display()))?;
    preprocess_image(&image, size, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::IndexOp;
    use image::{Rgb, RgbImage};

    fn solid(width: u32, height: u32, pixel: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(pixel)))
    }

    #[test]
    fn test_output_shape() {
        let image = solid(320, 200, [10, 20, 30]);
        let tensor = preprocess_image(&image, 224, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[1, 3, 224, 224]);
    }

    #[test]
    fn test_imagenet_normalization() {
        let image = solid(32, 32, [255, 0, 128]);
        let tensor = preprocess_image(&image, 16, &Device::Cpu).unwrap();

        let red: f32 = tensor.i((0, 0, 5, 5)).unwrap().to_scalar().unwrap();
        let green: f32 = tensor.i((0, 1, 5, 5)).unwrap().to_scalar().unwrap();
        let blue: f32 = tensor.i((0, 2, 5, 5)).unwrap().to_scalar().unwrap();

        assert!((red - (1.0 - 0.485) / 0.229).abs() < 0.02);
        assert!((green - (0.0 - 0.456) / 0.224).abs() < 0.02);
        assert!((blue - (128.0 / 255.0 - 0.406) / 0.225).abs() < 0.02);
    }

    #[test]
    fn test_load_image_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixel.png");
        solid(40, 30, [0, 0, 0]).save(&path).unwrap();

        let tensor = load_image(&path, 32, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[1, 3, 32, 32]);
    }

    #[test]
    fn test_load_missing_image() {
        let err = load_image(Path::new("/nonexistent/cat.jpg"), 224, &Device::Cpu).unwrap_err();
        assert!(err.to_string().contains("Failed to open image"));
    }
}
