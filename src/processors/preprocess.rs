//! Image preprocessing for the diffusion backbone.
//!
//! Resizes raw images to the fixed square resolution the backbone requires
//! (bilinear, no corner alignment, aspect ratio not preserved), applies
//! per-channel `(x - mean) / std` normalization, and batches the result into
//! a single `(B, 3, S, S)` tensor.

use crate::core::{SpotterConfig, SpotterError};
use crate::utils::candle_to_spot_processing;
use candle_core::{Device, Tensor};
use image::DynamicImage;
use image::imageops::FilterType;
use rayon::prelude::*;

/// A batched image tensor plus the per-image sizes it was batched at.
///
/// The recorded sizes are what inference later uses to denormalize
/// control-point coordinates before the final output-size rescaling.
#[derive(Debug)]
pub struct PreprocessedImages {
    /// Normalized image batch, shape `(B, 3, S, S)`.
    pub tensor: Tensor,
    /// Per-image (height, width) as batched.
    pub image_sizes: Vec<(u32, u32)>,
}

/// Normalizes and resizes images into backbone input batches.
#[derive(Debug)]
pub struct ImagePreprocessor {
    /// Scaling factor per channel (1 / std).
    alpha: Vec<f32>,
    /// Offset per channel (-mean / std).
    beta: Vec<f32>,
    /// Square target resolution.
    target: u32,
}

impl ImagePreprocessor {
    /// Creates a preprocessor with the given per-channel mean/std and square
    /// target resolution.
    ///
    /// # Errors
    ///
    /// Returns an error if mean or std don't have exactly 3 elements, any
    /// std value is not positive, or the target resolution is 0.
    pub fn new(mean: &[f32], std: &[f32], target: u32) -> Result<Self, SpotterError> {
        if mean.len() != 3 || std.len() != 3 {
            return Err(SpotterError::ConfigError {
                message: "mean and std must have exactly 3 elements for RGB".to_string(),
            });
        }
        for (i, &s) in std.iter().enumerate() {
            if s <= 0.0 {
                return Err(SpotterError::ConfigError {
                    message: format!("std at index {i} must be greater than 0, got {s}"),
                });
            }
        }
        if target == 0 {
            return Err(SpotterError::ConfigError {
                message: "target resolution must be greater than 0".to_string(),
            });
        }
        let alpha: Vec<f32> = std.iter().map(|s| 1.0 / s).collect();
        let beta: Vec<f32> = mean.iter().zip(std).map(|(m, s)| -m / s).collect();
        Ok(Self {
            alpha,
            beta,
            target,
        })
    }

    /// Creates a preprocessor from a spotter configuration.
    pub fn from_config(cfg: &SpotterConfig) -> Result<Self, SpotterError> {
        Self::new(&cfg.pixel_mean, &cfg.pixel_std, cfg.input_resolution)
    }

    /// The square resolution images are resized to.
    pub fn target_resolution(&self) -> u32 {
        self.target
    }

    /// Resizes, normalizes and batches a list of images.
    ///
    /// Integer images are converted to f32 in [0, 255]; float images keep
    /// their values. Fails fast on an empty batch or a zero-dimension image.
    pub fn preprocess(
        &self,
        images: &[DynamicImage],
        device: &Device,
    ) -> Result<PreprocessedImages, SpotterError> {
        if images.is_empty() {
            return Err(SpotterError::invalid_input("empty image batch"));
        }
        for (i, img) in images.iter().enumerate() {
            if img.width() == 0 || img.height() == 0 {
                return Err(SpotterError::invalid_input(format!(
                    "image {i} has zero width or height ({}x{})",
                    img.width(),
                    img.height()
                )));
            }
        }

        let s = self.target as usize;
        let resized: Vec<DynamicImage> = images
            .iter()
            .map(|img| img.resize_exact(self.target, self.target, FilterType::Triangle))
            .collect();

        let img_size = 3 * s * s;
        let mut buf = vec![0.0f32; images.len() * img_size];

        if images.len() <= 1 {
            // Avoid rayon overhead for single-image batches
            self.normalize_into(&resized[0], &mut buf[0..img_size]);
        } else {
            buf.par_chunks_mut(img_size)
                .enumerate()
                .for_each(|(batch_idx, slice)| {
                    self.normalize_into(&resized[batch_idx], slice);
                });
        }

        let tensor = Tensor::from_vec(buf, (images.len(), 3, s, s), device).map_err(|e| {
            candle_to_spot_processing(
                crate::core::ProcessingStage::Normalization,
                format!(
                    "failed to create {}x3x{}x{} batch tensor",
                    images.len(),
                    s,
                    s
                ),
                e,
            )
        })?;

        let image_sizes = vec![(self.target, self.target); images.len()];
        Ok(PreprocessedImages {
            tensor,
            image_sizes,
        })
    }

    /// Writes one normalized image in CHW order into `slice`.
    fn normalize_into(&self, img: &DynamicImage, slice: &mut [f32]) {
        let s = self.target as usize;
        match img {
            DynamicImage::ImageRgb32F(float_img) => {
                // Already-float input: values pass through unconverted.
                let raw = float_img.as_raw();
                for c in 0..3 {
                    for y in 0..s {
                        for x in 0..s {
                            let v = raw[(y * s + x) * 3 + c];
                            slice[c * s * s + y * s + x] = v * self.alpha[c] + self.beta[c];
                        }
                    }
                }
            }
            other => {
                let rgb = other.to_rgb8();
                for c in 0..3 {
                    for y in 0..s {
                        for x in 0..s {
                            let v = rgb.get_pixel(x as u32, y as u32)[c] as f32;
                            slice[c * s * s + y * s + x] = v * self.alpha[c] + self.beta[c];
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn preprocessor(target: u32) -> ImagePreprocessor {
        ImagePreprocessor::new(&[127.5, 127.5, 127.5], &[127.5, 127.5, 127.5], target).unwrap()
    }

    fn solid_image(w: u32, h: u32, value: u8) -> DynamicImage {
        let mut img = RgbImage::new(w, h);
        for p in img.pixels_mut() {
            *p = Rgb([value, value, value]);
        }
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_output_size_is_target_for_any_input() {
        let pre = preprocessor(8);
        for (w, h) in [(3, 100), (640, 480), (8, 8), (1, 1)] {
            let out = pre
                .preprocess(&[solid_image(w, h, 0)], &Device::Cpu)
                .unwrap();
            assert_eq!(out.tensor.dims(), &[1, 3, 8, 8]);
            assert_eq!(out.image_sizes, vec![(8, 8)]);
        }
    }

    #[test]
    fn test_normalization_values() {
        let pre = preprocessor(4);
        // 255 maps to (255 - 127.5) / 127.5 = 1.0
        let out = pre
            .preprocess(&[solid_image(4, 4, 255)], &Device::Cpu)
            .unwrap();
        let values: Vec<f32> = out.tensor.flatten_all().unwrap().to_vec1().unwrap();
        for v in values {
            assert!((v - 1.0).abs() < 1e-5);
        }
        // 0 maps to -1.0
        let out = pre
            .preprocess(&[solid_image(4, 4, 0)], &Device::Cpu)
            .unwrap();
        let values: Vec<f32> = out.tensor.flatten_all().unwrap().to_vec1().unwrap();
        for v in values {
            assert!((v + 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_batch_shape_and_sizes() {
        let pre = preprocessor(4);
        let imgs = vec![solid_image(10, 20, 1), solid_image(30, 7, 2)];
        let out = pre.preprocess(&imgs, &Device::Cpu).unwrap();
        assert_eq!(out.tensor.dims(), &[2, 3, 4, 4]);
        assert_eq!(out.image_sizes.len(), 2);
    }

    #[test]
    fn test_zero_size_image_fails_fast() {
        let pre = preprocessor(4);
        let img = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        assert!(pre.preprocess(&[img], &Device::Cpu).is_err());
    }

    #[test]
    fn test_empty_batch_fails() {
        let pre = preprocessor(4);
        assert!(pre.preprocess(&[], &Device::Cpu).is_err());
    }

    #[test]
    fn test_float_image_passes_through() {
        let pre = ImagePreprocessor::new(&[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0], 2).unwrap();
        let mut img = image::Rgb32FImage::new(2, 2);
        for p in img.pixels_mut() {
            *p = Rgb([0.25f32, 0.25, 0.25]);
        }
        let out = pre
            .preprocess(&[DynamicImage::ImageRgb32F(img)], &Device::Cpu)
            .unwrap();
        let values: Vec<f32> = out.tensor.flatten_all().unwrap().to_vec1().unwrap();
        for v in values {
            assert!((v - 0.25).abs() < 1e-5);
        }
    }

    #[test]
    fn test_rejects_bad_config() {
        assert!(ImagePreprocessor::new(&[0.0; 3], &[0.0; 3], 4).is_err());
        assert!(ImagePreprocessor::new(&[0.0; 2], &[1.0; 2], 4).is_err());
        assert!(ImagePreprocessor::new(&[0.0; 3], &[1.0; 3], 0).is_err());
    }
}
