//! Loss term weighting.
//!
//! The matching/loss collaborator returns named, unweighted loss terms; the
//! spotter multiplies each term present in the weight dictionary by its
//! weight. The weight dictionary is built once at construction by a pure
//! builder from explicit term lists and is immutable afterwards.

use crate::core::{LossWeightsConfig, SpotterError};
use crate::utils::candle_to_spot_processing;
use candle_core::Tensor;
use std::collections::HashMap;

/// Decoder loss terms, weighted per decoder layer.
const DECODER_TERMS: [&str; 3] = ["loss_ce", "loss_ctrl_points", "loss_texts"];

/// Encoder loss terms, weighted once for the encoder proposal set.
const ENCODER_TERMS: [&str; 3] = ["loss_ce", "loss_bbox", "loss_giou"];

fn decoder_weight(name: &str, cfg: &LossWeightsConfig) -> f64 {
    match name {
        "loss_ce" => cfg.point_class_weight,
        "loss_ctrl_points" => cfg.point_coord_weight,
        "loss_texts" => cfg.point_text_weight,
        _ => unreachable!("unknown decoder loss term {name}"),
    }
}

fn encoder_weight(name: &str, cfg: &LossWeightsConfig) -> f64 {
    match name {
        "loss_ce" => cfg.box_class_weight,
        "loss_bbox" => cfg.box_coord_weight,
        "loss_giou" => cfg.box_giou_weight,
        _ => unreachable!("unknown encoder loss term {name}"),
    }
}

/// Builds the loss weight dictionary.
///
/// Base decoder terms come first and are never overwritten; encoder terms
/// fill in the remaining base entries. With auxiliary loss enabled, each
/// decoder term gains a `_{i}` variant for every non-final decoder layer
/// (`i` in `0..dec_layers - 1`) and each encoder term gains an `_enc`
/// variant, all with the same base weights.
pub fn build_weight_dict(
    cfg: &LossWeightsConfig,
    dec_layers: usize,
    aux_loss: bool,
) -> HashMap<String, f64> {
    let mut weights = HashMap::new();
    for name in DECODER_TERMS {
        weights.insert(name.to_string(), decoder_weight(name, cfg));
    }
    for name in ENCODER_TERMS {
        weights
            .entry(name.to_string())
            .or_insert_with(|| encoder_weight(name, cfg));
    }

    if aux_loss {
        for i in 0..dec_layers.saturating_sub(1) {
            for name in DECODER_TERMS {
                weights.insert(format!("{name}_{i}"), decoder_weight(name, cfg));
            }
        }
        for name in ENCODER_TERMS {
            weights.insert(format!("{name}_enc"), encoder_weight(name, cfg));
        }
    }

    weights
}

/// Applies the weight dictionary to a loss-term map.
///
/// Terms present in the weight dictionary are multiplied by their weight;
/// terms absent from it are preserved unweighted so they stay available for
/// logging. Returns a new map.
pub fn weight_losses(
    loss_dict: &HashMap<String, Tensor>,
    weight_dict: &HashMap<String, f64>,
) -> Result<HashMap<String, Tensor>, SpotterError> {
    let mut weighted = HashMap::with_capacity(loss_dict.len());
    for (name, value) in loss_dict {
        let value = match weight_dict.get(name) {
            Some(&w) => (value * w).map_err(|e| {
                candle_to_spot_processing(
                    crate::core::ProcessingStage::Generic,
                    format!("failed to weight loss term '{name}'"),
                    e,
                )
            })?,
            None => value.clone(),
        };
        weighted.insert(name.clone(), value);
    }
    Ok(weighted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn cfg() -> LossWeightsConfig {
        LossWeightsConfig {
            point_class_weight: 2.0,
            point_coord_weight: 5.0,
            point_text_weight: 4.0,
            box_class_weight: 3.0,
            box_coord_weight: 5.0,
            box_giou_weight: 2.0,
            focal_alpha: 0.25,
            focal_gamma: 2.0,
        }
    }

    #[test]
    fn test_base_terms_without_aux() {
        let weights = build_weight_dict(&cfg(), 6, false);
        assert_eq!(weights.len(), 5);
        assert_eq!(weights["loss_ce"], 2.0);
        assert_eq!(weights["loss_ctrl_points"], 5.0);
        assert_eq!(weights["loss_texts"], 4.0);
        assert_eq!(weights["loss_bbox"], 5.0);
        assert_eq!(weights["loss_giou"], 2.0);
    }

    #[test]
    fn test_aux_variants_counts_and_no_overwrite() {
        let dec_layers = 6;
        let weights = build_weight_dict(&cfg(), dec_layers, true);

        // 5 base + 3 * (L - 1) layer variants + 3 encoder variants.
        assert_eq!(weights.len(), 5 + 3 * (dec_layers - 1) + 3);

        for i in 0..dec_layers - 1 {
            assert_eq!(weights[&format!("loss_ce_{i}")], 2.0);
            assert_eq!(weights[&format!("loss_ctrl_points_{i}")], 5.0);
            assert_eq!(weights[&format!("loss_texts_{i}")], 4.0);
        }
        assert!(!weights.contains_key(&format!("loss_ce_{}", dec_layers - 1)));

        assert_eq!(weights["loss_ce_enc"], 3.0);
        assert_eq!(weights["loss_bbox_enc"], 5.0);
        assert_eq!(weights["loss_giou_enc"], 2.0);

        // The base decoder classification entry is not overwritten by the
        // encoder classification weight.
        assert_eq!(weights["loss_ce"], 2.0);
    }

    #[test]
    fn test_weight_losses_scales_known_terms_and_keeps_others() {
        let device = Device::Cpu;
        let mut loss_dict = HashMap::new();
        loss_dict.insert(
            "loss_ce".to_string(),
            Tensor::new(1.5f64, &device).unwrap(),
        );
        loss_dict.insert(
            "cardinality".to_string(),
            Tensor::new(7.0f64, &device).unwrap(),
        );

        let weights = build_weight_dict(&cfg(), 6, false);
        let weighted = weight_losses(&loss_dict, &weights).unwrap();

        let ce = weighted["loss_ce"].to_scalar::<f64>().unwrap();
        assert!((ce - 3.0).abs() < 1e-9);
        // Unknown term is preserved unweighted for logging.
        let card = weighted["cardinality"].to_scalar::<f64>().unwrap();
        assert!((card - 7.0).abs() < 1e-9);
    }
}
