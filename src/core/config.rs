//! Configuration for the text spotter.
//!
//! All configuration is read once at construction time and immutable
//! afterwards. Configs deserialize from JSON via [`SpotterConfig::from_path`]
//! and are checked with [`SpotterConfig::validate`] before any model is
//! built.

use crate::core::SpotterError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Which diffusion backbone family extracts the feature map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackboneKind {
    /// Stable Diffusion 2.1: VAE + CLIP text encoder + denoising U-Net.
    Sd21,
    /// Diffusion transformer family. Recognized but not implemented;
    /// selecting it is a configuration error, never a silent no-op.
    Dit,
}

/// Per-term loss weights and focal-loss parameters.
///
/// The focal alpha/gamma are carried for the matching/loss collaborator;
/// the spotter itself only uses the term weights.
#[derive(Debug, Clone, Deserialize)]
pub struct LossWeightsConfig {
    /// Weight for the decoder classification term (`loss_ce`).
    #[serde(default = "default_point_class_weight")]
    pub point_class_weight: f64,
    /// Weight for the control-point regression term (`loss_ctrl_points`).
    #[serde(default = "default_point_coord_weight")]
    pub point_coord_weight: f64,
    /// Weight for the text recognition term (`loss_texts`).
    #[serde(default = "default_point_text_weight")]
    pub point_text_weight: f64,
    /// Weight for the encoder classification term.
    #[serde(default = "default_box_class_weight")]
    pub box_class_weight: f64,
    /// Weight for the encoder box regression term (`loss_bbox`).
    #[serde(default = "default_box_coord_weight")]
    pub box_coord_weight: f64,
    /// Weight for the encoder generalized IoU term (`loss_giou`).
    #[serde(default = "default_box_giou_weight")]
    pub box_giou_weight: f64,
    /// Focal loss alpha. The crate does not consume this value; callers
    /// read it when constructing their [`crate::core::SetCriterion`].
    #[serde(default = "default_focal_alpha")]
    pub focal_alpha: f64,
    /// Focal loss gamma. The crate does not consume this value; callers
    /// read it when constructing their [`crate::core::SetCriterion`].
    #[serde(default = "default_focal_gamma")]
    pub focal_gamma: f64,
}

fn default_point_class_weight() -> f64 {
    2.0
}
fn default_point_coord_weight() -> f64 {
    5.0
}
fn default_point_text_weight() -> f64 {
    2.0
}
fn default_box_class_weight() -> f64 {
    2.0
}
fn default_box_coord_weight() -> f64 {
    5.0
}
fn default_box_giou_weight() -> f64 {
    2.0
}
fn default_focal_alpha() -> f64 {
    0.25
}
fn default_focal_gamma() -> f64 {
    2.0
}

impl Default for LossWeightsConfig {
    fn default() -> Self {
        Self {
            point_class_weight: default_point_class_weight(),
            point_coord_weight: default_point_coord_weight(),
            point_text_weight: default_point_text_weight(),
            box_class_weight: default_box_class_weight(),
            box_coord_weight: default_box_coord_weight(),
            box_giou_weight: default_box_giou_weight(),
            focal_alpha: default_focal_alpha(),
            focal_gamma: default_focal_gamma(),
        }
    }
}

/// Construction-time configuration for [`crate::detector::TextSpotter`].
#[derive(Debug, Clone, Deserialize)]
pub struct SpotterConfig {
    /// Device identifier: `"cpu"`, `"cuda"` or `"cuda:N"`.
    #[serde(default = "default_device")]
    pub device: String,
    /// Which backbone family to build.
    pub backbone: BackboneKind,
    /// Directory holding the pretrained backbone artifacts
    /// (`vae.safetensors`, `unet.safetensors`, `clip.safetensors`,
    /// `tokenizer.json`).
    pub model_dir: PathBuf,
    /// Square input resolution required by the diffusion backbone.
    #[serde(default = "default_input_resolution")]
    pub input_resolution: u32,
    /// Per-channel pixel mean, applied to [0, 255] float pixels.
    #[serde(default = "default_pixel_mean")]
    pub pixel_mean: Vec<f32>,
    /// Per-channel pixel standard deviation.
    #[serde(default = "default_pixel_std")]
    pub pixel_std: Vec<f32>,
    /// Confidence threshold applied at inference time.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    /// Use polygon control points instead of Bezier control points.
    #[serde(default)]
    pub use_polygon: bool,
    /// Number of 2-D control points per instance.
    #[serde(default = "default_num_ctrl_points")]
    pub num_ctrl_points: usize,
    /// Number of decoder layers in the detection head.
    #[serde(default = "default_dec_layers")]
    pub dec_layers: usize,
    /// Enable auxiliary losses for intermediate decoder/encoder layers.
    #[serde(default = "default_aux_loss")]
    pub aux_loss: bool,
    /// Loss term weights.
    #[serde(default)]
    pub loss: LossWeightsConfig,
}

fn default_device() -> String {
    "cpu".to_string()
}
fn default_input_resolution() -> u32 {
    512
}
fn default_pixel_mean() -> Vec<f32> {
    vec![127.5, 127.5, 127.5]
}
fn default_pixel_std() -> Vec<f32> {
    vec![127.5, 127.5, 127.5]
}
fn default_score_threshold() -> f32 {
    0.4
}
fn default_num_ctrl_points() -> usize {
    8
}
fn default_dec_layers() -> usize {
    6
}
fn default_aux_loss() -> bool {
    true
}

impl SpotterConfig {
    /// Reads a spotter configuration from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SpotterError> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| SpotterError::ConfigError {
            message: format!("failed to parse spotter config: {e}"),
        })
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// * Mean or std vectors don't have exactly 3 elements
    /// * Any standard deviation value is less than or equal to 0
    /// * The input resolution, control-point count or decoder layer count is 0
    /// * The score threshold is outside [0, 1]
    pub fn validate(&self) -> Result<(), SpotterError> {
        if self.pixel_mean.len() != 3 {
            return Err(SpotterError::ConfigError {
                message: "pixel_mean must have exactly 3 elements for RGB".to_string(),
            });
        }
        if self.pixel_std.len() != 3 {
            return Err(SpotterError::ConfigError {
                message: "pixel_std must have exactly 3 elements for RGB".to_string(),
            });
        }
        for (i, &s) in self.pixel_std.iter().enumerate() {
            if s <= 0.0 {
                return Err(SpotterError::ConfigError {
                    message: format!(
                        "pixel_std at index {i} must be greater than 0, got {s}"
                    ),
                });
            }
        }
        if self.input_resolution == 0 {
            return Err(SpotterError::ConfigError {
                message: "input_resolution must be greater than 0".to_string(),
            });
        }
        if self.num_ctrl_points == 0 {
            return Err(SpotterError::ConfigError {
                message: "num_ctrl_points must be greater than 0".to_string(),
            });
        }
        if self.dec_layers == 0 {
            return Err(SpotterError::ConfigError {
                message: "dec_layers must be greater than 0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.score_threshold) {
            return Err(SpotterError::ConfigError {
                message: format!(
                    "score_threshold must be within [0, 1], got {}",
                    self.score_threshold
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> SpotterConfig {
        SpotterConfig {
            device: "cpu".to_string(),
            backbone: BackboneKind::Sd21,
            model_dir: PathBuf::from("models/sd21"),
            input_resolution: 512,
            pixel_mean: default_pixel_mean(),
            pixel_std: default_pixel_std(),
            score_threshold: 0.4,
            use_polygon: false,
            num_ctrl_points: 8,
            dec_layers: 6,
            aux_loss: true,
            loss: LossWeightsConfig::default(),
        }
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_std() {
        let mut cfg = base_config();
        cfg.pixel_std = vec![127.5, 0.0, 127.5];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_short_mean() {
        let mut cfg = base_config();
        cfg.pixel_mean = vec![127.5];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_threshold() {
        let mut cfg = base_config();
        cfg.score_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_from_json_with_defaults() {
        let json = r#"{ "backbone": "sd21", "model_dir": "models/sd21" }"#;
        let cfg: SpotterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.backbone, BackboneKind::Sd21);
        assert_eq!(cfg.input_resolution, 512);
        assert_eq!(cfg.num_ctrl_points, 8);
        assert!(cfg.aux_loss);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_focal_parameters_are_exposed_for_criterion_construction() {
        let json = r#"{
            "backbone": "sd21",
            "model_dir": "models/sd21",
            "loss": { "focal_alpha": 0.5, "focal_gamma": 1.0 }
        }"#;
        let cfg: SpotterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.loss.focal_alpha, 0.5);
        assert_eq!(cfg.loss.focal_gamma, 1.0);

        let defaults: SpotterConfig =
            serde_json::from_str(r#"{ "backbone": "sd21", "model_dir": "m" }"#).unwrap();
        assert_eq!(defaults.loss.focal_alpha, 0.25);
        assert_eq!(defaults.loss.focal_gamma, 2.0);
    }

    #[test]
    fn test_backbone_kind_parses_dit() {
        let json = r#"{ "backbone": "dit", "model_dir": "models/dit" }"#;
        let cfg: SpotterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.backbone, BackboneKind::Dit);
    }
}
