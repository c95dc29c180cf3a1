//! Model definitions

pub mod classifier;
pub mod head;
pub mod mobilenet;
pub mod pretrained;

pub use classifier::{CivicClassifier, ClassifierConfig};
pub use head::ClassificationHead;
pub use mobilenet::{MobileNetV2, MobileNetV2Config};
pub use pretrained::{ImagenetWeights, ImportReport, KeyLayout};
