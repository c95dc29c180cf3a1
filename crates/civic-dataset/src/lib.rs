//! Dataset handling for the civic issue classifier.
//!
//! - [`integrity`]: per-split checks run before any training
//! - [`folder`]: class-per-directory scanning
//! - [`statistics`]: class distribution tables
//! - [`preprocess`]: decoding and CHW layout shared with the server
//! - [`augmentation`]: random transforms for the training split
//! - [`batcher`]: burn `Dataset` and `Batcher` implementations

pub mod augmentation;
pub mod batcher;
pub mod folder;
pub mod integrity;
pub mod preprocess;
pub mod statistics;

pub use augmentation::{Augmenter, TransformParams};
pub use batcher::{ImageBatch, ImageBatcher, ImageFolderDataset, ImageItem};
pub use civic_core::{AugmentationConfig, FillMode};
pub use folder::ImageFolder;
pub use integrity::{check_dataset_classes, check_splits, IntegrityReport, SplitIssue, SplitReport};
pub use statistics::ClassDistribution;
