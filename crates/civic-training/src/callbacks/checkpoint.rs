//! Best-model checkpointing on validation accuracy.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use civic_core::{EpochMetrics, Error, Result, TrainingPhase};
use serde::{Deserialize, Serialize};

use crate::artifact::{save_artifact, ArtifactMetadata};
use crate::model::CivicClassifier;

/// Written to `<stem>.meta.json` next to every saved checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointMetadata {
    pub phase: TrainingPhase,
    pub epoch: usize,
    pub metrics: EpochMetrics,
    pub timestamp: String,
}

impl CheckpointMetadata {
    pub fn path(stem: &Path) -> PathBuf {
        stem.with_extension("meta.json")
    }

    pub fn save(&self, stem: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize checkpoint: {}", e)))?;
        fs::write(Self::path(stem), json)?;
        Ok(())
    }

    pub fn load(stem: &Path) -> Result<Self> {
        let json = fs::read_to_string(Self::path(stem))?;
        serde_json::from_str(&json)
            .map_err(|e| Error::Serialization(format!("Failed to deserialize checkpoint: {}", e)))
    }
}

/// Saves the model whenever validation accuracy strictly improves.
///
/// The best value is kept across training phases, so a fine-tuning epoch
/// only overwrites the checkpoint when it beats every earlier epoch.
#[derive(Debug, Clone)]
pub struct ModelCheckpoint {
    stem: PathBuf,
    metadata: ArtifactMetadata,
    best: f64,
}

impl ModelCheckpoint {
    pub fn new(stem: impl Into<PathBuf>, metadata: ArtifactMetadata) -> Self {
        Self {
            stem: stem.into(),
            metadata,
            best: f64::NEG_INFINITY,
        }
    }

    pub fn stem(&self) -> &Path {
        &self.stem
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    /// Returns `Some(previous_best)` when a checkpoint was written.
    pub fn on_epoch_end<B: Backend>(
        &mut self,
        phase: TrainingPhase,
        metrics: &EpochMetrics,
        model: &CivicClassifier<B>,
    ) -> Result<Option<f64>> {
        if metrics.val_accuracy.partial_cmp(&self.best) != Some(Ordering::Greater) {
            return Ok(None);
        }

        let previous = self.best;
        self.best = metrics.val_accuracy;
        save_artifact(model, &self.metadata, &self.stem)?;
        CheckpointMetadata {
            phase,
            epoch: metrics.epoch,
            metrics: metrics.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
        .save(&self.stem)?;

        Ok(Some(previous))
    }
}
