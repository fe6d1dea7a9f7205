//! # TextSpot
//!
//! Scene-text detection and recognition on top of a frozen latent-diffusion
//! feature backbone.
//!
//! Images are resized and normalized to a fixed square resolution, encoded
//! to latents by a pretrained VAE, and run once through a denoising U-Net
//! conditioned on the empty-prompt text embedding at a constant zero
//! timestep. A transformer detection head turns the resulting feature map
//! into per-query class logits, control-point coordinates and character
//! logits; inference filters by confidence, denormalizes coordinates and
//! rescales to the requested output size.
//!
//! ## Modules
//!
//! * [`core`] - Error handling, configuration, and model trait seams
//! * [`domain`] - Inputs, ground truth, model outputs and results
//! * [`processors`] - Image preprocessing
//! * [`backbone`] - Diffusion feature backbones
//! * [`detector`] - Target preparation, loss weighting, post-processing and
//!   the spotter
//! * [`utils`] - Device parsing and error conversion helpers

pub mod backbone;
pub mod core;
pub mod detector;
pub mod domain;
pub mod processors;
pub mod utils;

/// Prelude module for convenient imports.
pub mod prelude {
    // Error handling
    pub use crate::core::{SpotResult, SpotterError};

    // Configuration
    pub use crate::core::{BackboneKind, LossWeightsConfig, SpotterConfig};

    // Domain types
    pub use crate::domain::{
        BatchedInput, CtrlPointKind, GroundTruth, SpotterResult, TextInstances,
    };

    // The spotter (high-level API)
    pub use crate::detector::TextSpotter;
}
