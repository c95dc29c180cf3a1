//! Saved model artifacts.
//!
//! An artifact is addressed by a path stem. Weights live in `<stem>.mpk`
//! (named MessagePack, full `f32` precision) and the architecture plus label order in
//! `<stem>.json`, so the serving side can rebuild the exact model.

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::backend::Backend,
};
use civic_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::model::{CivicClassifier, ClassifierConfig};

/// Recorder for checkpoints and artifacts.
///
/// Full precision, so a checkpoint reload between phases does not perturb
/// the weights.
pub type ArtifactRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Everything needed to reconstruct a saved classifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactMetadata {
    pub classifier: ClassifierConfig,
    /// Label order used during training (index = class id)
    pub class_names: Vec<String>,
    pub image_size: usize,
    pub saved_at: String,
}

impl ArtifactMetadata {
    pub fn new(classifier: ClassifierConfig, class_names: Vec<String>, image_size: usize) -> Self {
        Self {
            classifier,
            class_names,
            image_size,
            saved_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn save(&self, stem: &Path) -> Result<()> {
        let path = metadata_path(stem);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize artifact metadata: {}", e)))?;
        fs::write(&path, json)?;
        Ok(())
    }

    pub fn load(stem: &Path) -> Result<Self> {
        let path = metadata_path(stem);
        if !path.exists() {
            return Err(Error::NotFound(format!("model metadata {:?}", path)));
        }
        let json = fs::read_to_string(&path)?;
        serde_json::from_str(&json).map_err(|e| {
            Error::Serialization(format!("Failed to parse artifact metadata {:?}: {}", path, e))
        })
    }
}

/// `<stem>.mpk`
pub fn weights_path(stem: &Path) -> PathBuf {
    stem.with_extension("mpk")
}

/// `<stem>.json`
pub fn metadata_path(stem: &Path) -> PathBuf {
    stem.with_extension("json")
}

/// Write the model weights to `<stem>.mpk`.
pub fn save_weights<B: Backend, M: Module<B>>(model: &M, stem: &Path) -> Result<()> {
    if let Some(parent) = stem.parent() {
        fs::create_dir_all(parent)?;
    }
    model
        .clone()
        .save_file(stem.to_path_buf(), &ArtifactRecorder::new())
        .map_err(|e| Error::Model(format!("Failed to save weights to {:?}: {}", weights_path(stem), e)))
}

/// Load weights from `<stem>.mpk` into `model`.
pub fn load_weights<B: Backend, M: Module<B>>(model: M, stem: &Path, device: &B::Device) -> Result<M> {
    let path = weights_path(stem);
    if !path.exists() {
        return Err(Error::NotFound(format!("model weights {:?}", path)));
    }
    model
        .load_file(stem.to_path_buf(), &ArtifactRecorder::new(), device)
        .map_err(|e| Error::Model(format!("Failed to load weights from {:?}: {}", path, e)))
}

/// Save weights and metadata together.
pub fn save_artifact<B: Backend>(
    model: &CivicClassifier<B>,
    metadata: &ArtifactMetadata,
    stem: &Path,
) -> Result<()> {
    save_weights(model, stem)?;
    metadata.save(stem)?;
    info!("Model saved to {:?}", weights_path(stem));
    Ok(())
}

/// Rebuild a classifier from a saved artifact.
pub fn load_artifact<B: Backend>(
    stem: &Path,
    device: &B::Device,
) -> Result<(CivicClassifier<B>, ArtifactMetadata)> {
    let metadata = ArtifactMetadata::load(stem)?;
    let model = metadata.classifier.init::<B>(device);
    let model = load_weights(model, stem, device)?;
    Ok((model, metadata))
}

/// Replace the in-memory weights with the best checkpoint, if one was written.
///
/// A missing checkpoint leaves `model` as it is and logs a warning; a
/// checkpoint that exists but cannot be read is an error.
pub fn reload_checkpoint<B: Backend, M: Module<B>>(model: M, stem: &Path, device: &B::Device) -> Result<M> {
    if !weights_path(stem).exists() {
        warn!(
            "No checkpoint at {:?}; keeping the in-memory weights",
            weights_path(stem)
        );
        return Ok(model);
    }
    info!("Reloading best checkpoint from {:?}", weights_path(stem));
    load_weights(model, stem, device)
}
