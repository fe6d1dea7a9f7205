//! Ground-truth target preparation.
//!
//! Converts per-image annotations into the unit-square-normalized
//! representation the matching/loss component expects. Batch order is
//! preserved so targets align with model outputs.

use crate::core::{ProcessingStage, SpotterError};
use crate::domain::{GroundTruth, NormalizedTarget};
use crate::utils::candle_to_spot_processing;
use candle_core::Tensor;

fn tp(context: &str, e: candle_core::Error) -> SpotterError {
    candle_to_spot_processing(ProcessingStage::TargetPreparation, context, e)
}

/// Converts `(N, 4)` xyxy boxes to center-size format.
pub fn box_xyxy_to_cxcywh(boxes: &Tensor) -> Result<Tensor, SpotterError> {
    let x0 = boxes.narrow(1, 0, 1).map_err(|e| tp("narrow x0", e))?;
    let y0 = boxes.narrow(1, 1, 1).map_err(|e| tp("narrow y0", e))?;
    let x1 = boxes.narrow(1, 2, 1).map_err(|e| tp("narrow x1", e))?;
    let y1 = boxes.narrow(1, 3, 1).map_err(|e| tp("narrow y1", e))?;

    let cx = ((&x0 + &x1).and_then(|t| t * 0.5)).map_err(|e| tp("center x", e))?;
    let cy = ((&y0 + &y1).and_then(|t| t * 0.5)).map_err(|e| tp("center y", e))?;
    let w = (&x1 - &x0).map_err(|e| tp("width", e))?;
    let h = (&y1 - &y0).map_err(|e| tp("height", e))?;

    Tensor::cat(&[&cx, &cy, &w, &h], 1).map_err(|e| tp("concat cxcywh", e))
}

/// Prepares one [`NormalizedTarget`] per image.
///
/// Class labels pass through unchanged; boxes become center-size normalized
/// by image size; the control-point source selected by `use_polygon` is
/// reshaped to `(N, P, 2)` and normalized by (width, height); text labels
/// pass through unchanged.
///
/// # Errors
///
/// Returns `InvalidInput` if the selected control-point source is missing or
/// its flattened length does not match `2 * num_ctrl_points`.
pub fn prepare_targets(
    instances: &[&GroundTruth],
    use_polygon: bool,
    num_ctrl_points: usize,
) -> Result<Vec<NormalizedTarget>, SpotterError> {
    let mut targets = Vec::with_capacity(instances.len());
    for (i, gt) in instances.iter().enumerate() {
        let (h, w) = gt.image_size;
        let (wf, hf) = (w as f32, h as f32);
        let device = gt.boxes.device();

        let size = Tensor::new(&[wf, hf, wf, hf], device).map_err(|e| tp("image size", e))?;
        let boxes = gt
            .boxes
            .broadcast_div(&size)
            .map_err(|e| tp("normalize boxes", e))?;
        let boxes = box_xyxy_to_cxcywh(&boxes)?;

        let raw = if use_polygon {
            gt.polygons.as_ref()
        } else {
            gt.beziers.as_ref()
        }
        .ok_or_else(|| {
            SpotterError::invalid_input(format!(
                "image {i}: ground truth is missing {} control points",
                if use_polygon { "polygon" } else { "Bezier" }
            ))
        })?;

        let (n, flat) = raw.dims2().map_err(|e| tp("control point shape", e))?;
        if flat != 2 * num_ctrl_points {
            return Err(SpotterError::invalid_input(format!(
                "image {i}: expected {} flattened control-point values per instance, got {flat}",
                2 * num_ctrl_points
            )));
        }
        let wh = Tensor::new(&[wf, hf], device).map_err(|e| tp("wh tensor", e))?;
        let ctrl_points = raw
            .reshape((n, num_ctrl_points, 2))
            .and_then(|t| t.broadcast_div(&wh))
            .map_err(|e| tp("normalize control points", e))?;

        targets.push(NormalizedTarget {
            labels: gt.classes.clone(),
            boxes,
            ctrl_points,
            texts: gt.texts.clone(),
        });
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn ground_truth(points: Vec<f32>, num_points: usize, image_size: (u32, u32)) -> GroundTruth {
        let device = Device::Cpu;
        let n = points.len() / (2 * num_points);
        GroundTruth {
            classes: Tensor::zeros(n, candle_core::DType::U32, &device).unwrap(),
            boxes: Tensor::from_vec(
                vec![10.0f32, 20.0, 110.0, 60.0]
                    .into_iter()
                    .cycle()
                    .take(n * 4)
                    .collect(),
                (n, 4),
                &device,
            )
            .unwrap(),
            beziers: Some(Tensor::from_vec(points, (n, 2 * num_points), &device).unwrap()),
            polygons: None,
            texts: Tensor::zeros((n, 25), candle_core::DType::U32, &device).unwrap(),
            image_size,
        }
    }

    #[test]
    fn test_box_xyxy_to_cxcywh() {
        let boxes = Tensor::from_vec(vec![0.0f32, 0.0, 4.0, 2.0], (1, 4), &Device::Cpu).unwrap();
        let out = box_xyxy_to_cxcywh(&boxes).unwrap();
        let values: Vec<f32> = out.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(values, vec![2.0, 1.0, 4.0, 2.0]);
    }

    #[test]
    fn test_control_points_normalized_to_unit_square() {
        let points: Vec<f32> = (0..16).map(|v| v as f32 * 10.0).collect();
        let gt = ground_truth(points, 8, (200, 400));
        let targets = prepare_targets(&[&gt], false, 8).unwrap();
        assert_eq!(targets.len(), 1);
        let pts: Vec<Vec<Vec<f32>>> = targets[0].ctrl_points.to_vec3().unwrap();
        for point in &pts[0] {
            assert!((0.0..=1.0).contains(&point[0]));
            assert!((0.0..=1.0).contains(&point[1]));
        }
        // First point (0, 10) normalized by (w=400, h=200).
        assert!((pts[0][0][0] - 0.0).abs() < 1e-6);
        assert!((pts[0][0][1] - 10.0 / 200.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_denormalize_round_trip() {
        let points: Vec<f32> = vec![
            3.5, 7.25, 120.0, 33.0, 260.5, 61.75, 399.0, 88.0, 5.0, 190.0, 130.0, 150.5, 250.0,
            160.25, 390.5, 199.0,
        ];
        let gt = ground_truth(points.clone(), 8, (200, 400));
        let targets = prepare_targets(&[&gt], false, 8).unwrap();
        let wh = Tensor::new(&[400.0f32, 200.0], &Device::Cpu).unwrap();
        let restored = targets[0]
            .ctrl_points
            .broadcast_mul(&wh)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        for (a, b) in restored.iter().zip(&points) {
            assert!((a - b).abs() < 1e-4, "round trip mismatch: {a} vs {b}");
        }
    }

    #[test]
    fn test_wrong_point_count_is_rejected() {
        let points: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let gt = ground_truth(points, 8, (100, 100));
        assert!(prepare_targets(&[&gt], false, 16).is_err());
    }

    #[test]
    fn test_missing_source_is_rejected() {
        let points: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let gt = ground_truth(points, 8, (100, 100));
        // Polygon mode requested but only beziers are present.
        assert!(prepare_targets(&[&gt], true, 8).is_err());
    }

    #[test]
    fn test_boxes_are_center_size_normalized() {
        let points: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let gt = ground_truth(points, 8, (200, 400));
        let targets = prepare_targets(&[&gt], false, 8).unwrap();
        let boxes: Vec<Vec<f32>> = targets[0].boxes.to_vec2().unwrap();
        // xyxy (10, 20, 110, 60) on a 400x200 image.
        assert!((boxes[0][0] - 60.0 / 400.0).abs() < 1e-6);
        assert!((boxes[0][1] - 40.0 / 200.0).abs() < 1e-6);
        assert!((boxes[0][2] - 100.0 / 400.0).abs() < 1e-6);
        assert!((boxes[0][3] - 40.0 / 200.0).abs() < 1e-6);
    }
}
