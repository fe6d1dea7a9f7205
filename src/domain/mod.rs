//! Domain types for inputs, ground truth, model outputs and results.

pub mod instances;

pub use instances::{
    AuxOutput, BatchedInput, CtrlPointKind, EncOutput, GroundTruth, ModelOutput, NormalizedTarget,
    SpotterResult, TextInstances,
};
