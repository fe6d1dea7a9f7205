//! Inference post-processing.
//!
//! One pass per image: average class logits across control points and apply
//! a sigmoid for the per-query confidence, softmax the character logits,
//! drop queries below the confidence threshold (consistently across all
//! fields), denormalize surviving control points to the model input size,
//! and arg-max the character slots into a recognized index sequence.
//!
//! A second stage, [`rescale_to_output`], maps results from the input image
//! size to a caller-requested output size. It is a pure transform returning
//! new data, shared by all backbone variants.

use crate::core::{ProcessingStage, SpotterError};
use crate::domain::{CtrlPointKind, ModelOutput, TextInstances};
use crate::utils::candle_to_spot_processing;
use candle_core::{D, IndexOp};
use candle_nn::ops::{sigmoid, softmax_last_dim};
use tracing::debug;

/// Flattened indices of the Bezier curve-anchor x components.
const BEZIER_ANCHOR_X: [usize; 4] = [0, 6, 8, 14];
/// Flattened indices of the Bezier curve-anchor y components.
const BEZIER_ANCHOR_Y: [usize; 4] = [1, 7, 9, 15];

fn pp(context: &str, e: candle_core::Error) -> SpotterError {
    candle_to_spot_processing(ProcessingStage::PostProcessing, context, e)
}

/// Filters and denormalizes raw head outputs into per-image result sets.
///
/// `image_sizes` are the per-image (height, width) the batch was built at;
/// surviving control points are scaled from [0, 1] to those dimensions.
/// An image where no query reaches the threshold yields an empty but
/// well-formed [`TextInstances`].
pub fn postprocess(
    output: &ModelOutput,
    image_sizes: &[(u32, u32)],
    score_threshold: f32,
    kind: CtrlPointKind,
) -> Result<Vec<TextInstances>, SpotterError> {
    let (bs, _q, _p, _k) = output
        .pred_logits
        .dims4()
        .map_err(|e| pp("pred_logits must be (B, Q, P, K)", e))?;
    if bs != image_sizes.len() {
        return Err(SpotterError::invalid_input(format!(
            "batch size {bs} does not match {} image sizes",
            image_sizes.len()
        )));
    }

    let probs = output
        .pred_logits
        .mean(2)
        .and_then(|t| sigmoid(&t))
        .map_err(|e| pp("confidence from class logits", e))?;
    let scores = probs
        .max(D::Minus1)
        .map_err(|e| pp("max class confidence", e))?;
    let labels = probs
        .argmax(D::Minus1)
        .map_err(|e| pp("arg-max class", e))?;
    let text_probs =
        softmax_last_dim(&output.pred_texts).map_err(|e| pp("softmax character logits", e))?;

    let mut results = Vec::with_capacity(bs);
    for (i, &(height, width)) in image_sizes.iter().enumerate() {
        let scores_i: Vec<f32> = scores
            .i(i)
            .and_then(|t| t.to_vec1())
            .map_err(|e| pp("read scores", e))?;
        let labels_i: Vec<u32> = labels
            .i(i)
            .and_then(|t| t.to_vec1())
            .map_err(|e| pp("read labels", e))?;
        let points_i: Vec<Vec<Vec<f32>>> = output
            .pred_ctrl_points
            .i(i)
            .and_then(|t| t.to_vec3())
            .map_err(|e| pp("read control points", e))?;
        let texts_i: Vec<Vec<Vec<f32>>> = text_probs
            .i(i)
            .and_then(|t| t.to_vec3())
            .map_err(|e| pp("read character probabilities", e))?;

        let mut instances = TextInstances::empty((height, width), kind);
        for (q, &score) in scores_i.iter().enumerate() {
            if score < score_threshold {
                continue;
            }
            let mut flat = Vec::with_capacity(points_i[q].len() * 2);
            for point in &points_i[q] {
                flat.push(point[0] * width as f32);
                flat.push(point[1] * height as f32);
            }
            let rec: Vec<u32> = texts_i[q]
                .iter()
                .map(|slot| {
                    slot.iter()
                        .enumerate()
                        .max_by(|a, b| a.1.total_cmp(b.1))
                        .map(|(idx, _)| idx as u32)
                        .unwrap_or(0)
                })
                .collect();

            instances.scores.push(score);
            instances.classes.push(labels_i[q]);
            instances.ctrl_points.push(flat);
            instances.rec_scores.push(texts_i[q].clone());
            instances.recs.push(rec);
        }
        debug!(
            image = i,
            detections = instances.len(),
            threshold = score_threshold,
            "post-processed image"
        );
        results.push(instances);
    }
    Ok(results)
}

/// Rescales a result set from its input image size to a requested output
/// size by per-axis linear scale factors.
///
/// In Bezier mode the eight curve-anchor components are clamped to the
/// input image bounds before scaling, which keeps the scaled anchors within
/// the output bounds; polygon points are scaled without clamping.
pub fn rescale_to_output(
    instances: &TextInstances,
    output_height: u32,
    output_width: u32,
) -> TextInstances {
    let (in_h, in_w) = instances.image_size;
    let scale_x = output_width as f32 / in_w as f32;
    let scale_y = output_height as f32 / in_h as f32;

    let ctrl_points = instances
        .ctrl_points
        .iter()
        .map(|points| {
            let mut points = points.clone();
            if instances.kind == CtrlPointKind::Bezier {
                for &ix in &BEZIER_ANCHOR_X {
                    if let Some(v) = points.get_mut(ix) {
                        *v = v.clamp(0.0, in_w as f32);
                    }
                }
                for &iy in &BEZIER_ANCHOR_Y {
                    if let Some(v) = points.get_mut(iy) {
                        *v = v.clamp(0.0, in_h as f32);
                    }
                }
            }
            for (idx, v) in points.iter_mut().enumerate() {
                *v *= if idx % 2 == 0 { scale_x } else { scale_y };
            }
            points
        })
        .collect();

    TextInstances {
        image_size: (output_height, output_width),
        scores: instances.scores.clone(),
        classes: instances.classes.clone(),
        ctrl_points,
        rec_scores: instances.rec_scores.clone(),
        recs: instances.recs.clone(),
        kind: instances.kind,
    }
}
