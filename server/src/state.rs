//! Application state for the prediction server

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::classifier::ImageClassifier;

/// Server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Artifact stem of the served model (`<stem>.mpk` + `<stem>.json`)
    pub model_stem: PathBuf,
    /// Directory for per-request upload files
    pub temp_dir: PathBuf,
    /// Request body limit in bytes
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5001,
            model_stem: PathBuf::from("saved_models_v2/disaster_model_v2"),
            temp_dir: std::env::temp_dir(),
            max_upload_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Shared application state
pub struct AppState {
    pub config: ServerConfig,
    /// Loaded once at startup, shared by every request
    pub classifier: Arc<dyn ImageClassifier>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig, classifier: Arc<dyn ImageClassifier>) -> Self {
        Self {
            config,
            classifier,
            started_at: Instant::now(),
        }
    }

    /// Seconds since the server started
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedState = Arc<AppState>;
