//! Epoch-end callbacks, run in this order: learning-rate plateau, early
//! stopping, checkpoint.

pub mod checkpoint;
pub mod early_stopping;
pub mod plateau;

pub use checkpoint::{CheckpointMetadata, ModelCheckpoint};
pub use early_stopping::{EarlyStopping, StopDecision};
pub use plateau::ReduceLrOnPlateau;
