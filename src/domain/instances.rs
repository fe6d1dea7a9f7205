//! Instance containers flowing through the spotting pipeline.
//!
//! These types mirror the three lifecycles of the pipeline: what the caller
//! hands in ([`BatchedInput`]), what the detection head emits
//! ([`ModelOutput`]), and what inference returns ([`TextInstances`]).

use candle_core::Tensor;
use image::DynamicImage;

/// Whether an instance's shape is described by polygon vertices or by
/// Bezier control points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlPointKind {
    /// Variable polygon vertices; scaled without clamping.
    Polygon,
    /// Two cubic Bezier curves (16 flattened floats); the curve-defining
    /// anchor components are clamped to the image bounds before scaling.
    Bezier,
}

/// Ground-truth annotations for one image.
///
/// Geometric quantities are in absolute pixels of `image_size`; texts are
/// pre-tokenized fixed-length character index sequences.
#[derive(Debug, Clone)]
pub struct GroundTruth {
    /// Class label per instance, shape `(N,)`, u32.
    pub classes: Tensor,
    /// Bounding boxes per instance in xyxy pixels, shape `(N, 4)`, f32.
    pub boxes: Tensor,
    /// Flattened Bezier control points, shape `(N, 2 * P)`, f32.
    pub beziers: Option<Tensor>,
    /// Flattened polygon vertices, shape `(N, 2 * P)`, f32.
    pub polygons: Option<Tensor>,
    /// Character index sequences, shape `(N, T)`, u32.
    pub texts: Tensor,
    /// Image size as (height, width).
    pub image_size: (u32, u32),
}

/// One entry of a forward-call batch.
pub struct BatchedInput {
    /// The raw image.
    pub image: DynamicImage,
    /// Ground-truth instances, required in training mode.
    pub instances: Option<GroundTruth>,
    /// Requested output height for the final rescaling stage.
    pub height: Option<u32>,
    /// Requested output width for the final rescaling stage.
    pub width: Option<u32>,
}

impl BatchedInput {
    /// Wraps an image with no ground truth and no requested output size.
    pub fn from_image(image: DynamicImage) -> Self {
        Self {
            image,
            instances: None,
            height: None,
            width: None,
        }
    }
}

/// Per-image target in the normalized representation the criterion expects.
///
/// All geometric quantities are unit-square normalized; denormalization only
/// happens at inference time.
#[derive(Debug, Clone)]
pub struct NormalizedTarget {
    /// Class labels, shape `(N,)`, u32.
    pub labels: Tensor,
    /// Boxes in center-size format normalized by image size, shape `(N, 4)`.
    pub boxes: Tensor,
    /// Control points normalized to [0, 1], shape `(N, P, 2)`.
    pub ctrl_points: Tensor,
    /// Character index sequences, shape `(N, T)`, u32.
    pub texts: Tensor,
}

/// Auxiliary output of one non-final decoder layer.
#[derive(Debug, Clone)]
pub struct AuxOutput {
    /// Class logits, shape `(B, Q, P, K)`.
    pub pred_logits: Tensor,
    /// Control-point coordinates in [0, 1], shape `(B, Q, P, 2)`.
    pub pred_ctrl_points: Tensor,
    /// Character logits, shape `(B, Q, T, V)`.
    pub pred_texts: Tensor,
}

/// Encoder-level box proposals, used only for the encoder loss terms.
#[derive(Debug, Clone)]
pub struct EncOutput {
    /// Class logits, shape `(B, Q, K)`.
    pub pred_logits: Tensor,
    /// Box proposals in normalized center-size format, shape `(B, Q, 4)`.
    pub pred_boxes: Tensor,
}

/// Everything the detection head emits for one forward call.
///
/// Produced fresh each call and never mutated; coordinate scaling at
/// inference time returns new data instead of aliasing these tensors.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// Class logits per query and control point, shape `(B, Q, P, K)`.
    pub pred_logits: Tensor,
    /// Control-point coordinates in [0, 1], shape `(B, Q, P, 2)`.
    pub pred_ctrl_points: Tensor,
    /// Character logits per query and character slot, shape `(B, Q, T, V)`.
    pub pred_texts: Tensor,
    /// One copy per non-final decoder layer, in layer order.
    pub aux_outputs: Vec<AuxOutput>,
    /// Encoder-level proposals.
    pub enc_output: Option<EncOutput>,
}

/// Final per-image result set.
///
/// Plain data: all fields are index-aligned across instances, so filtering
/// or rescaling can never leave them inconsistent.
#[derive(Debug, Clone)]
pub struct TextInstances {
    /// Size of the image the coordinates live in, as (height, width).
    pub image_size: (u32, u32),
    /// Confidence score per instance.
    pub scores: Vec<f32>,
    /// Predicted class per instance.
    pub classes: Vec<u32>,
    /// Flattened control points per instance, `[x0, y0, x1, y1, ..]`.
    pub ctrl_points: Vec<Vec<f32>>,
    /// Per-instance, per-slot character probabilities.
    pub rec_scores: Vec<Vec<Vec<f32>>>,
    /// Recognized character index sequence per instance.
    pub recs: Vec<Vec<u32>>,
    /// How `ctrl_points` is to be interpreted.
    pub kind: CtrlPointKind,
}

impl TextInstances {
    /// An empty but well-formed result set for an image of the given size.
    pub fn empty(image_size: (u32, u32), kind: CtrlPointKind) -> Self {
        Self {
            image_size,
            scores: Vec::new(),
            classes: Vec::new(),
            ctrl_points: Vec::new(),
            rec_scores: Vec::new(),
            recs: Vec::new(),
            kind,
        }
    }

    /// Number of detected instances.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Whether the result set has no instances.
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// The per-image output record of a forward call.
#[derive(Debug, Clone)]
pub struct SpotterResult {
    /// The detected text instances.
    pub instances: TextInstances,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_instances_are_consistent() {
        let inst = TextInstances::empty((512, 512), CtrlPointKind::Bezier);
        assert!(inst.is_empty());
        assert_eq!(inst.len(), 0);
        assert_eq!(inst.image_size, (512, 512));
        assert_eq!(inst.kind, CtrlPointKind::Bezier);
    }
}
