//! Transfer-learning training for the civic issue classifier.
//!
//! A MobileNetV2 backbone with a small dense head is trained in two phases:
//! first only the head on a frozen backbone, then the last layers of the
//! backbone with a much smaller learning rate. Checkpoints follow
//! validation accuracy; the best one becomes the served artifact.

pub mod artifact;
pub mod backend;
pub mod callbacks;
pub mod charts;
pub mod evaluator;
pub mod freeze;
pub mod inference;
pub mod model;
pub mod pipeline;
pub mod trainer;

pub use artifact::{load_artifact, reload_checkpoint, save_artifact, ArtifactMetadata};
pub use backend::{backend_name, default_device, DefaultBackend, InferenceBackend, TrainingBackend};
pub use evaluator::evaluate;
pub use freeze::{LayerKind, LayerSpec, TrainablePlan};
pub use inference::Predictor;
pub use model::{CivicClassifier, ClassifierConfig};
pub use pipeline::{run_training, TrainingOutcome};
pub use trainer::{PhaseSettings, Trainer};
