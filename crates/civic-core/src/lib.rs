//! Core types and utilities for the civic issue classifier.
//!
//! This crate provides the shared foundation used by the dataset, training
//! and serving crates: the error type, configuration structures, the fixed
//! label set, logging setup and training history records.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod types;

pub use cli::load_toml_config;
pub use config::*;
pub use error::{Error, Result};
pub use logging::{init_logging, LogConfig, LogLevel, TrainingLogger};
pub use metrics::*;
pub use types::*;
