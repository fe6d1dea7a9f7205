//! Trait seams between the spotter and its model collaborators.
//!
//! The diffusion backbone, the transformer detection head and the bipartite
//! matching criterion are heavyweight external components. The spotter only
//! depends on these contracts, which keeps backbone families swappable and
//! lets tests drive the orchestration with stubs.

use crate::core::SpotterError;
use crate::domain::{ModelOutput, NormalizedTarget};
use candle_core::Tensor;
use std::collections::HashMap;

/// A frozen feature extractor over an image batch.
///
/// Implementations map a preprocessed batch `(B, 3, S, S)` to a single
/// feature map whose spatial resolution and channel count are fixed by the
/// backbone architecture. One implementation exists per backbone family;
/// an unrecognized family is a construction-time configuration error.
pub trait FeatureBackbone {
    /// Extracts the backbone feature map for a batch of images.
    fn extract(&self, images: &Tensor) -> Result<Tensor, SpotterError>;
}

/// The transformer detection/recognition head.
///
/// Consumes the backbone feature map and emits, for each of a fixed number
/// of query slots, class logits, control-point coordinates in [0, 1] and
/// per-character vocabulary logits, plus auxiliary per-layer copies and an
/// encoder-level proposal set.
pub trait DetectionHead {
    /// Fixed number of query slots.
    fn num_queries(&self) -> usize;

    /// Number of 2-D control points per query.
    fn num_ctrl_points(&self) -> usize;

    /// Number of instance classes.
    fn num_classes(&self) -> usize;

    /// Fixed length of the recognized character sequence.
    fn max_text_len(&self) -> usize;

    /// Size of the character vocabulary.
    fn voc_size(&self) -> usize;

    /// Runs the head on a backbone feature map.
    fn forward(&self, features: &Tensor) -> Result<ModelOutput, SpotterError>;
}

/// The bipartite matching and loss component.
///
/// Matches predictions to targets (separately for encoder box proposals and
/// decoder control-point predictions) and returns named, unweighted loss
/// terms. Auxiliary terms carry a `_{layer}` suffix and encoder terms an
/// `_enc` suffix. The spotter guarantees targets are normalized, correctly
/// shaped and batch-ordered; it applies the weight dictionary afterwards.
pub trait SetCriterion {
    /// Computes unweighted loss terms for one batch.
    fn forward(
        &self,
        outputs: &ModelOutput,
        targets: &[NormalizedTarget],
    ) -> Result<HashMap<String, Tensor>, SpotterError>;
}
