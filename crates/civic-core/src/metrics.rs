//! Training metrics and history records.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::types::TrainingPhase;

/// Metrics recorded at the end of one epoch
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub learning_rate: f64,
}

/// Per-epoch metrics of a single fit phase
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseHistory {
    pub phase: TrainingPhase,
    pub epochs: Vec<EpochMetrics>,
    /// Epoch at which early stopping fired, if it did
    pub stopped_epoch: Option<usize>,
}

impl PhaseHistory {
    pub fn new(phase: TrainingPhase) -> Self {
        Self {
            phase,
            epochs: Vec::new(),
            stopped_epoch: None,
        }
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn best_val_accuracy(&self) -> Option<f64> {
        self.epochs.iter().map(|m| m.val_accuracy).reduce(f64::max)
    }
}

/// Loss and accuracy over a held-out split
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct EvaluationResult {
    pub loss: f64,
    pub accuracy: f64,
    pub num_samples: usize,
}

/// Complete record of a two-phase run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingHistory {
    pub initial: PhaseHistory,
    pub fine_tune: Option<PhaseHistory>,
    pub test: Option<EvaluationResult>,
    pub class_names: Vec<String>,
    pub finished_at: String,
}

impl TrainingHistory {
    pub fn new(initial: PhaseHistory, class_names: Vec<String>) -> Self {
        Self {
            initial,
            fine_tune: None,
            test: None,
            class_names,
            finished_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Total number of epochs run across both phases
    pub fn total_epochs(&self) -> usize {
        self.initial.len() + self.fine_tune.as_ref().map_or(0, PhaseHistory::len)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
