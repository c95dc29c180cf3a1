//! Configuration structures for training.
//!
//! Every struct implements `Default` with the values the training script has
//! always used, so an empty TOML file (or none at all) reproduces the stock
//! run. Fields missing from a TOML file fall back to those defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::types::{DataSplit, IMAGE_SIZE};

/// Main configuration for a training run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    /// Dataset location and input size
    pub data: DataConfig,
    /// Classifier head and backbone settings
    pub model: ModelConfig,
    /// Two-phase schedule
    pub schedule: ScheduleConfig,
    /// Callback settings
    pub callbacks: CallbackConfig,
    /// Training-time augmentation
    pub augmentation: AugmentationConfig,
    /// Where artifacts are written
    pub output: OutputConfig,
    /// Random seed for shuffling and augmentation
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            model: ModelConfig::default(),
            schedule: ScheduleConfig::default(),
            callbacks: CallbackConfig::default(),
            augmentation: AugmentationConfig::default(),
            output: OutputConfig::default(),
            seed: 42,
        }
    }
}

impl TrainingConfig {
    /// Check value ranges that would otherwise fail deep inside training.
    pub fn validate(&self) -> Result<()> {
        if self.data.image_size == 0 {
            return Err(Error::Config("data.image_size must be > 0".into()));
        }
        if self.schedule.batch_size == 0 {
            return Err(Error::Config("schedule.batch_size must be > 0".into()));
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            return Err(Error::Config(format!(
                "model.dropout must be in [0, 1), got {}",
                self.model.dropout
            )));
        }
        if self.model.width_multiplier <= 0.0 {
            return Err(Error::Config("model.width_multiplier must be > 0".into()));
        }
        for (name, lr) in [
            ("schedule.learning_rate_initial", self.schedule.learning_rate_initial),
            ("schedule.learning_rate_fine_tune", self.schedule.learning_rate_fine_tune),
        ] {
            if lr <= 0.0 {
                return Err(Error::Config(format!("{name} must be > 0, got {lr}")));
            }
        }
        let plateau = &self.callbacks.reduce_lr;
        if !(0.0..1.0).contains(&plateau.factor) || plateau.factor == 0.0 {
            return Err(Error::Config(format!(
                "callbacks.reduce_lr.factor must be in (0, 1), got {}",
                plateau.factor
            )));
        }
        self.augmentation.validate()?;
        if self.output.model_name.is_empty() {
            return Err(Error::Config("output.model_name must not be empty".into()));
        }
        Ok(())
    }

    /// Path stem (no extension) of the best/final model artifact
    pub fn model_stem(&self) -> PathBuf {
        self.output.model_dir.join(&self.output.model_name)
    }
}

/// Dataset configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataConfig {
    /// Dataset root holding `train/`, `valid/` and `test/`
    pub base_dir: PathBuf,
    /// Square input resolution
    pub image_size: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("dataset"),
            image_size: IMAGE_SIZE,
        }
    }
}

impl DataConfig {
    /// Directory of one split under the dataset root
    pub fn split_dir(&self, split: DataSplit) -> PathBuf {
        self.base_dir.join(split.dir_name())
    }
}

/// Classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Width of the dense layer in the head
    pub hidden_units: usize,
    /// Dropout rate between the dense layers
    pub dropout: f64,
    /// MobileNetV2 width multiplier (alpha)
    pub width_multiplier: f64,
    /// ImageNet MobileNetV2 `.safetensors` (torchvision or timm) or a burn
    /// record of the backbone
    pub pretrained_backbone: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_units: 512,
            dropout: 0.5,
            width_multiplier: 1.0,
            pretrained_backbone: Some(PathBuf::from("weights/mobilenet_v2_imagenet.safetensors")),
        }
    }
}

/// Two-phase training schedule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Batch size for every split
    pub batch_size: usize,
    /// Epoch budget with the backbone frozen
    pub epochs_initial: usize,
    /// Epoch budget for fine-tuning
    pub epochs_fine_tune: usize,
    /// Number of trailing backbone layers unfrozen for fine-tuning
    pub fine_tune_at: usize,
    /// Adam learning rate for phase one
    pub learning_rate_initial: f64,
    /// Adam learning rate for phase two
    pub learning_rate_fine_tune: f64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            epochs_initial: 50,
            epochs_fine_tune: 100,
            fine_tune_at: 70,
            learning_rate_initial: 1e-3,
            learning_rate_fine_tune: 1e-5,
        }
    }
}

/// Callback configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CallbackConfig {
    pub reduce_lr: PlateauConfig,
    pub early_stopping: EarlyStoppingConfig,
}

/// Reduce-on-plateau settings (monitors validation loss)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlateauConfig {
    pub factor: f64,
    pub patience: usize,
    pub min_lr: f64,
    pub min_delta: f64,
    pub cooldown: usize,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            factor: 0.2,
            patience: 5,
            min_lr: 1e-7,
            min_delta: 1e-4,
            cooldown: 0,
        }
    }
}

/// Early stopping settings (monitors validation loss)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EarlyStoppingConfig {
    pub patience: usize,
    pub min_delta: f64,
    pub restore_best_weights: bool,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            patience: 15,
            min_delta: 0.0,
            restore_best_weights: true,
        }
    }
}

/// How pixels outside the source frame are filled after a geometric transform
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    /// Repeat the closest edge pixel
    Nearest,
    /// Fill with a constant grey level (0-255)
    Constant(u8),
    /// Mirror across the edge
    Reflect,
    /// Tile the image
    Wrap,
}

/// Data augmentation configuration (train split only)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Enable augmentation
    pub enabled: bool,
    /// Max rotation in degrees (both directions)
    pub rotation_range: f32,
    /// Max horizontal shift as a fraction of the width
    pub width_shift_range: f32,
    /// Max vertical shift as a fraction of the height
    pub height_shift_range: f32,
    /// Zoom factor is drawn from `[1 - zoom_range, 1 + zoom_range]`
    pub zoom_range: f32,
    /// Brightness factor bounds
    pub brightness_range: (f32, f32),
    /// Random horizontal flip
    pub horizontal_flip: bool,
    /// Fill strategy for out-of-frame samples
    pub fill_mode: FillMode,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rotation_range: 20.0,
            width_shift_range: 0.15,
            height_shift_range: 0.15,
            zoom_range: 0.25,
            brightness_range: (0.8, 1.2),
            horizontal_flip: true,
            fill_mode: FillMode::Nearest,
        }
    }
}

impl AugmentationConfig {
    /// Configuration that leaves images untouched
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let (low, high) = self.brightness_range;
        if low <= 0.0 || low > high {
            return Err(Error::Config(format!(
                "augmentation.brightness_range must satisfy 0 < low <= high, got ({low}, {high})"
            )));
        }
        if !(0.0..1.0).contains(&self.zoom_range) {
            return Err(Error::Config(format!(
                "augmentation.zoom_range must be in [0, 1), got {}",
                self.zoom_range
            )));
        }
        for (name, value) in [
            ("width_shift_range", self.width_shift_range),
            ("height_shift_range", self.height_shift_range),
            ("rotation_range", self.rotation_range),
        ] {
            if value < 0.0 {
                return Err(Error::Config(format!("augmentation.{name} must be >= 0")));
            }
        }
        Ok(())
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for checkpoints, history and charts
    pub model_dir: PathBuf,
    /// Artifact stem inside `model_dir`
    pub model_name: String,
    /// Write SVG accuracy/loss charts after training
    pub plot_history: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("saved_models_v2"),
            model_name: "disaster_model_v2".to_string(),
            plot_history: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_stock_run() {
        let config = TrainingConfig::default();
        assert_eq!(config.data.image_size, 224);
        assert_eq!(config.schedule.batch_size, 16);
        assert_eq!(config.schedule.epochs_initial, 50);
        assert_eq!(config.schedule.epochs_fine_tune, 100);
        assert_eq!(config.schedule.fine_tune_at, 70);
        assert_eq!(config.callbacks.reduce_lr.patience, 5);
        assert_eq!(config.callbacks.early_stopping.patience, 15);
        assert_eq!(config.model_stem(), PathBuf::from("saved_models_v2/disaster_model_v2"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_split_dirs() {
        let data = DataConfig::default();
        assert_eq!(data.split_dir(DataSplit::Validation), PathBuf::from("dataset/valid"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
            seed = 7

            [schedule]
            batch_size = 4

            [augmentation]
            fill_mode = "reflect"
        "#;
        let config: TrainingConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.schedule.batch_size, 4);
        assert_eq!(config.schedule.epochs_initial, 50);
        assert_eq!(config.augmentation.fill_mode, FillMode::Reflect);
        assert_eq!(config.output.model_name, "disaster_model_v2");
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = TrainingConfig::default();
        let text = toml::to_string(&config).unwrap();
        let back: TrainingConfig = toml::from_str(&text).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = TrainingConfig::default();
        config.schedule.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.augmentation.brightness_range = (1.2, 0.8);
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.callbacks.reduce_lr.factor = 1.5;
        assert!(config.validate().is_err());
    }
}
