//! Diffusion feature backbones.
//!
//! Backbone selection is an explicit polymorphic seam: each recognized
//! family has its own [`FeatureBackbone`] implementation, and selecting an
//! unimplemented family is a construction-time error rather than a silent
//! no-op.

pub mod sd21;

pub use sd21::Sd21Backbone;

use crate::core::{BackboneKind, FeatureBackbone, SpotterConfig, SpotterError};
use candle_core::Device;

/// Builds the configured feature backbone.
pub fn build_backbone(
    cfg: &SpotterConfig,
    device: &Device,
) -> Result<Box<dyn FeatureBackbone>, SpotterError> {
    match cfg.backbone {
        BackboneKind::Sd21 => {
            let backbone =
                Sd21Backbone::from_dir(&cfg.model_dir, cfg.input_resolution, device.clone())?;
            Ok(Box::new(backbone))
        }
        BackboneKind::Dit => Err(SpotterError::config_error(
            "the DiT backbone is recognized but not implemented; configure the sd21 backbone",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LossWeightsConfig;
    use std::path::PathBuf;

    fn config(kind: BackboneKind, dir: PathBuf) -> SpotterConfig {
        SpotterConfig {
            device: "cpu".to_string(),
            backbone: kind,
            model_dir: dir,
            input_resolution: 512,
            pixel_mean: vec![127.5; 3],
            pixel_std: vec![127.5; 3],
            score_threshold: 0.4,
            use_polygon: false,
            num_ctrl_points: 8,
            dec_layers: 6,
            aux_loss: true,
            loss: LossWeightsConfig::default(),
        }
    }

    #[test]
    fn test_dit_backbone_is_an_explicit_error() {
        let cfg = config(BackboneKind::Dit, PathBuf::from("/nonexistent"));
        let err = build_backbone(&cfg, &Device::Cpu).err().unwrap();
        assert!(matches!(err, SpotterError::ConfigError { .. }));
    }

    #[test]
    fn test_missing_artifacts_fail_construction() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(BackboneKind::Sd21, dir.path().to_path_buf());
        let err = build_backbone(&cfg, &Device::Cpu).err().unwrap();
        assert!(matches!(err, SpotterError::ConfigError { .. }));
    }
}
