//! Logging Module
//!
//! Structured logging built on `tracing`. Binaries call [`init_logging`] once
//! at startup; libraries only emit events.

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::error::{Error, Result};
use crate::metrics::EpochMetrics;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Verbose logging for debugging
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
        }
    }

    /// Errors only
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            ..Self::default()
        }
    }

    /// No colors, info level; suited to log files and containers
    pub fn production() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: false,
        }
    }

    /// Pick a preset from the usual `--verbose` / `--quiet` flags.
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        match (verbose, quiet) {
            (true, _) => Self::verbose(),
            (false, true) => Self::quiet(),
            _ => Self::default(),
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Parse a level name, falling back to `Info` for anything unknown
    pub fn from_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Initialize the global subscriber with the given configuration.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level.to_tracing_level())
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {e}")))
}

/// Epoch-level progress lines for a training phase
pub struct TrainingLogger {
    phase: String,
    epoch: usize,
    total_epochs: usize,
    epoch_start: std::time::Instant,
    phase_start: std::time::Instant,
}

impl TrainingLogger {
    pub fn new(phase: impl Into<String>, total_epochs: usize) -> Self {
        Self {
            phase: phase.into(),
            epoch: 0,
            total_epochs,
            epoch_start: std::time::Instant::now(),
            phase_start: std::time::Instant::now(),
        }
    }

    /// Log start of an epoch
    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = std::time::Instant::now();
        tracing::debug!("[{}] Epoch {}/{} started", self.phase, epoch + 1, self.total_epochs);
    }

    /// Log end of an epoch with its metrics
    pub fn end_epoch(&self, metrics: &EpochMetrics) {
        tracing::info!(
            "[{}] Epoch {}/{} ({:.1}s) | loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4} | lr: {:.2e}",
            self.phase,
            self.epoch + 1,
            self.total_epochs,
            self.epoch_start.elapsed().as_secs_f64(),
            metrics.loss,
            metrics.accuracy,
            metrics.val_loss,
            metrics.val_accuracy,
            metrics.learning_rate,
        );
    }

    /// Log a learning-rate reduction
    pub fn log_lr_reduced(&self, epoch: usize, new_lr: f64) {
        tracing::info!(
            "[{}] Epoch {}: ReduceLROnPlateau reducing learning rate to {:.2e}",
            self.phase,
            epoch + 1,
            new_lr
        );
    }

    /// Log a saved checkpoint
    pub fn log_checkpoint(&self, epoch: usize, previous: f64, current: f64, path: &std::path::Path) {
        tracing::info!(
            "[{}] Epoch {}: val_accuracy improved from {:.5} to {:.5}, saving model to {}",
            self.phase,
            epoch + 1,
            previous,
            current,
            path.display()
        );
    }

    /// Log early stopping
    pub fn log_early_stop(&self, epoch: usize, restored_from: Option<usize>) {
        tracing::warn!("[{}] Epoch {}: early stopping", self.phase, epoch + 1);
        if let Some(best) = restored_from {
            tracing::info!(
                "[{}] Restoring model weights from the end of the best epoch: {}",
                self.phase,
                best + 1
            );
        }
    }

    /// Log phase completion
    pub fn log_complete(&self, epochs_run: usize) {
        tracing::info!(
            "[{}] Finished {} epochs in {:.1}s",
            self.phase,
            epochs_run,
            self.phase_start.elapsed().as_secs_f64()
        );
    }
}
