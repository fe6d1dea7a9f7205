//! The text spotter: orchestration of preprocessing, backbone, head,
//! criterion and post-processing.
//!
//! The spotter owns its collaborators behind trait objects so backbone
//! families stay swappable and tests can drive the full flow with stubs.
//! It is constructed once from an immutable [`SpotterConfig`] and holds no
//! mutable state across calls.

use crate::backbone::build_backbone;
use crate::core::{DetectionHead, FeatureBackbone, SetCriterion, SpotterConfig, SpotterError};
use crate::detector::losses::{build_weight_dict, weight_losses};
use crate::detector::postprocess::{postprocess, rescale_to_output};
use crate::detector::targets::prepare_targets;
use crate::domain::{BatchedInput, CtrlPointKind, GroundTruth, ModelOutput, SpotterResult};
use crate::processors::ImagePreprocessor;
use candle_core::{Device, Tensor};
use image::DynamicImage;
use std::collections::HashMap;
use tracing::debug;

/// End-to-end scene-text detection and recognition model.
pub struct TextSpotter {
    device: Device,
    preprocessor: ImagePreprocessor,
    backbone: Box<dyn FeatureBackbone>,
    head: Box<dyn DetectionHead>,
    criterion: Box<dyn SetCriterion>,
    weight_dict: HashMap<String, f64>,
    score_threshold: f32,
    use_polygon: bool,
    num_ctrl_points: usize,
}

impl TextSpotter {
    /// Builds a spotter from a validated configuration, loading the
    /// configured backbone from disk.
    pub fn new(
        cfg: &SpotterConfig,
        head: Box<dyn DetectionHead>,
        criterion: Box<dyn SetCriterion>,
    ) -> Result<Self, SpotterError> {
        cfg.validate()?;
        let device = crate::utils::parse_device(&cfg.device)?;
        let backbone = build_backbone(cfg, &device)?;
        Self::with_backbone(cfg, backbone, head, criterion)
    }

    /// Builds a spotter around an already-constructed backbone.
    pub fn with_backbone(
        cfg: &SpotterConfig,
        backbone: Box<dyn FeatureBackbone>,
        head: Box<dyn DetectionHead>,
        criterion: Box<dyn SetCriterion>,
    ) -> Result<Self, SpotterError> {
        cfg.validate()?;
        let device = crate::utils::parse_device(&cfg.device)?;
        let preprocessor = ImagePreprocessor::from_config(cfg)?;
        let weight_dict = build_weight_dict(&cfg.loss, cfg.dec_layers, cfg.aux_loss);
        debug!(
            backbone = ?cfg.backbone,
            resolution = cfg.input_resolution,
            weight_terms = weight_dict.len(),
            "constructed text spotter"
        );
        Ok(Self {
            device,
            preprocessor,
            backbone,
            head,
            criterion,
            weight_dict,
            score_threshold: cfg.score_threshold,
            use_polygon: cfg.use_polygon,
            num_ctrl_points: cfg.num_ctrl_points,
        })
    }

    /// The loss weight dictionary built at construction.
    pub fn weight_dict(&self) -> &HashMap<String, f64> {
        &self.weight_dict
    }

    fn ctrl_point_kind(&self) -> CtrlPointKind {
        if self.use_polygon {
            CtrlPointKind::Polygon
        } else {
            CtrlPointKind::Bezier
        }
    }

    /// Runs preprocessing, the backbone and the head on one batch.
    fn run_model(
        &self,
        inputs: &[BatchedInput],
    ) -> Result<(ModelOutput, Vec<(u32, u32)>), SpotterError> {
        let images: Vec<DynamicImage> = inputs.iter().map(|b| b.image.clone()).collect();
        let batch = self.preprocessor.preprocess(&images, &self.device)?;
        let features = self.backbone.extract(&batch.tensor)?;
        let output = self.head.forward(&features)?;
        Ok((output, batch.image_sizes))
    }

    /// Filters and rescales head outputs into per-image results.
    ///
    /// The output size defaults to the batched image size when an input
    /// does not request one.
    fn finish_results(
        &self,
        inputs: &[BatchedInput],
        output: &ModelOutput,
        image_sizes: &[(u32, u32)],
    ) -> Result<Vec<SpotterResult>, SpotterError> {
        let per_image = postprocess(
            output,
            image_sizes,
            self.score_threshold,
            self.ctrl_point_kind(),
        )?;
        let results = per_image
            .iter()
            .zip(inputs)
            .map(|(instances, input)| {
                let out_h = input.height.unwrap_or(instances.image_size.0);
                let out_w = input.width.unwrap_or(instances.image_size.1);
                SpotterResult {
                    instances: rescale_to_output(instances, out_h, out_w),
                }
            })
            .collect();
        Ok(results)
    }

    /// Inference forward pass.
    ///
    /// An empty batch yields an empty result list; an image where no query
    /// clears the confidence threshold yields an empty but well-formed
    /// result set.
    pub fn forward(&self, inputs: &[BatchedInput]) -> Result<Vec<SpotterResult>, SpotterError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let (output, image_sizes) = self.run_model(inputs)?;
        let results = self.finish_results(inputs, &output, &image_sizes)?;
        debug!(
            batch = inputs.len(),
            detections = results.iter().map(|r| r.instances.len()).sum::<usize>(),
            "forward pass complete"
        );
        Ok(results)
    }

    /// Training forward pass: weighted loss terms plus the same per-image
    /// results inference would produce.
    ///
    /// Every input must carry ground truth; targets are normalized and
    /// batch-ordered before the criterion sees them.
    pub fn forward_train(
        &self,
        inputs: &[BatchedInput],
    ) -> Result<(HashMap<String, Tensor>, Vec<SpotterResult>), SpotterError> {
        if inputs.is_empty() {
            return Ok((HashMap::new(), Vec::new()));
        }
        let ground_truth: Vec<&GroundTruth> = inputs
            .iter()
            .enumerate()
            .map(|(i, input)| {
                input.instances.as_ref().ok_or_else(|| {
                    SpotterError::invalid_input(format!(
                        "training input {i} carries no ground-truth instances"
                    ))
                })
            })
            .collect::<Result<_, _>>()?;
        let targets = prepare_targets(&ground_truth, self.use_polygon, self.num_ctrl_points)?;

        let (output, image_sizes) = self.run_model(inputs)?;
        let losses = self.criterion.forward(&output, &targets)?;
        let weighted = weight_losses(&losses, &self.weight_dict)?;
        let results = self.finish_results(inputs, &output, &image_sizes)?;
        debug!(
            batch = inputs.len(),
            loss_terms = weighted.len(),
            "training forward pass complete"
        );
        Ok((weighted, results))
    }
}
