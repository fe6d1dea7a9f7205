//! Core error handling, configuration, and model trait seams.

pub mod config;
pub mod errors;
pub mod traits;

pub use config::{BackboneKind, LossWeightsConfig, SpotterConfig};
pub use errors::{ProcessingStage, SpotResult, SpotterError};
pub use traits::{DetectionHead, FeatureBackbone, SetCriterion};
