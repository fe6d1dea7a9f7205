//! Detection-side components: target preparation, loss weighting,
//! post-processing and the spotter itself.

pub mod losses;
pub mod model;
pub mod postprocess;
pub mod targets;

pub use losses::{build_weight_dict, weight_losses};
pub use model::TextSpotter;
pub use postprocess::{postprocess, rescale_to_output};
pub use targets::{box_xyxy_to_cxcywh, prepare_targets};
