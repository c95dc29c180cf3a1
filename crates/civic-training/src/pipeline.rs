//! The full two-phase training run.
//!
//! 1. scan the three splits and require identical class sets;
//! 2. phase one trains the head on a frozen backbone;
//! 3. the best checkpoint is reloaded and the tail of the backbone is
//!    unfrozen for phase two;
//! 4. the best checkpoint is reloaded again, evaluated on `test`, saved as
//!    the final artifact, and the history is written and plotted.

use std::path::PathBuf;

use burn::{
    module::AutodiffModule,
    tensor::backend::AutodiffBackend,
};
use civic_core::{
    DataSplit, Error, EvaluationResult, Result, TrainingConfig, TrainingHistory, TrainingPhase,
    CLASS_NAMES,
};
use civic_dataset::{Augmenter, ClassDistribution, ImageFolder, ImageFolderDataset};
use tracing::{info, warn};

use crate::artifact::{reload_checkpoint, save_artifact, ArtifactMetadata};
use crate::callbacks::ModelCheckpoint;
use crate::charts::plot_training_history;
use crate::evaluator::evaluate;
use crate::model::ClassifierConfig;
use crate::trainer::{PhaseSettings, Trainer};

/// Result of [`run_training`]
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub history: TrainingHistory,
    pub test: EvaluationResult,
    pub distributions: Vec<ClassDistribution>,
    /// `{'class': index, ...}`
    pub class_indices: String,
    pub model_stem: PathBuf,
    pub history_path: PathBuf,
    pub charts: Vec<PathBuf>,
}

pub fn run_training<B: AutodiffBackend>(
    config: &TrainingConfig,
    device: &B::Device,
    show_progress: bool,
) -> Result<TrainingOutcome> {
    config.validate()?;

    let train_folder = ImageFolder::scan(config.data.split_dir(DataSplit::Train))?;
    let valid_folder = ImageFolder::scan(config.data.split_dir(DataSplit::Validation))?;
    let test_folder = ImageFolder::scan(config.data.split_dir(DataSplit::Test))?;
    train_folder.ensure_same_classes(&valid_folder)?;
    train_folder.ensure_same_classes(&test_folder)?;

    if train_folder.is_empty() {
        return Err(Error::Dataset("training split contains no images".into()));
    }
    if train_folder.classes != CLASS_NAMES {
        warn!(
            "Dataset classes {:?} differ from the serving labels {:?}",
            train_folder.classes, CLASS_NAMES
        );
    }

    let classes = train_folder.classes.clone();
    let mut distributions = Vec::with_capacity(DataSplit::ALL.len());
    for split in DataSplit::ALL {
        let distribution =
            ClassDistribution::from_dir(&split.to_string(), &config.data.split_dir(split), &classes)?;
        for line in distribution.render().lines() {
            info!("{}", line);
        }
        distributions.push(distribution);
    }

    let image_size = config.data.image_size;
    let train = ImageFolderDataset::from_folder(&train_folder, image_size)
        .with_augmentation(Augmenter::new(config.augmentation.clone()));
    let valid = ImageFolderDataset::from_folder(&valid_folder, image_size);
    let test = ImageFolderDataset::from_folder(&test_folder, image_size);

    let classifier = ClassifierConfig::from_model_config(&config.model, train_folder.num_classes());
    let metadata = ArtifactMetadata::new(classifier.clone(), classes.clone(), image_size);
    let stem = config.model_stem();
    let batch_size = config.schedule.batch_size;

    let checkpoint = ModelCheckpoint::new(&stem, metadata.clone());
    let mut trainer = Trainer::<B>::new(config, checkpoint, device.clone()).with_progress(show_progress);

    // Phase one: head only
    let model = classifier.init_frozen::<B>(config.model.pretrained_backbone.as_deref(), device)?;
    info!(
        "Backbone frozen: {} layers, {} classes",
        model.backbone.num_layers(),
        classifier.num_classes
    );
    let initial = PhaseSettings {
        phase: TrainingPhase::Initial,
        epochs: config.schedule.epochs_initial,
        learning_rate: config.schedule.learning_rate_initial,
    };
    let (model, initial_history) = trainer.fit_phase(model, initial, &train, &valid)?;
    let model = reload_checkpoint(model, &stem, device)?;
    let mut history = TrainingHistory::new(initial_history, classes);

    // Phase two: unfreeze the tail of the backbone
    let model = if config.schedule.epochs_fine_tune > 0 {
        let (fresh, plan) =
            classifier.init_fine_tune(model, config.schedule.fine_tune_at, device)?;
        let layers = fresh.backbone_layers();
        let (trainable, frozen) = plan.parameterised_counts(&layers);
        info!(
            "Fine-tuning from layer {}: {} parameterised layers trainable, {} frozen",
            layers.len().saturating_sub(config.schedule.fine_tune_at),
            trainable,
            frozen
        );

        let fine_tune = PhaseSettings {
            phase: TrainingPhase::FineTune,
            epochs: config.schedule.epochs_fine_tune,
            learning_rate: config.schedule.learning_rate_fine_tune,
        };
        let (model, fine_tune_history) = trainer.fit_phase(fresh, fine_tune, &train, &valid)?;
        history.fine_tune = Some(fine_tune_history);
        reload_checkpoint(model, &stem, device)?
    } else {
        model
    };

    let test_result = evaluate(&model.valid(), &test, batch_size, device, show_progress)?;
    info!("Test Accuracy: {:.4}", test_result.accuracy);
    info!("Test Loss: {:.4}", test_result.loss);
    history.test = Some(test_result);

    save_artifact(&model, &metadata, &stem)?;

    let class_indices = train_folder.class_indices_display();
    info!("Class indices: {}", class_indices);

    history.finished_at = chrono::Utc::now().to_rfc3339();
    let history_path = config.output.model_dir.join("training_history.json");
    history.save(&history_path)?;

    let charts = if config.output.plot_history {
        plot_training_history(&history, &config.output.model_dir)?
    } else {
        Vec::new()
    };

    Ok(TrainingOutcome {
        history,
        test: test_result,
        distributions,
        class_indices,
        model_stem: stem,
        history_path,
        charts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use std::path::Path;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    fn write_split(base: &Path, split: &str, per_class: usize) {
        let colors = [[220, 40, 40], [40, 40, 220]];
        for (class, color) in ["fire", "water"].iter().zip(colors) {
            let dir = base.join(split).join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..per_class {
                image::RgbImage::from_pixel(20, 20, image::Rgb(color))
                    .save(dir.join(format!("{i}.png")))
                    .unwrap();
            }
        }
    }

    fn config(tmp: &TempDir) -> TrainingConfig {
        let base = tmp.path().join("dataset");
        write_split(&base, "train", 2);
        write_split(&base, "valid", 1);
        write_split(&base, "test", 1);

        let mut config = TrainingConfig::default();
        config.data.base_dir = base;
        config.data.image_size = 32;
        config.model.width_multiplier = 0.35;
        config.model.hidden_units = 8;
        config.model.pretrained_backbone = None;
        config.schedule.batch_size = 2;
        config.schedule.epochs_initial = 1;
        config.schedule.epochs_fine_tune = 1;
        config.schedule.fine_tune_at = 20;
        config.output.model_dir = tmp.path().join("saved_models");
        config
    }

    #[test]
    fn test_two_phase_run_writes_every_artifact() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);

        let outcome = run_training::<TestBackend>(&config, &Default::default(), false).unwrap();

        assert_eq!(outcome.history.initial.len(), 1);
        assert_eq!(outcome.history.fine_tune.as_ref().map(|h| h.len()), Some(1));
        assert_eq!(outcome.test.num_samples, 2);
        assert_eq!(outcome.class_indices, "{'fire': 0, 'water': 1}");
        assert_eq!(outcome.distributions.len(), 3);

        assert!(outcome.model_stem.with_extension("mpk").exists());
        assert!(outcome.model_stem.with_extension("json").exists());
        assert!(outcome.history_path.exists());
        assert!(config.output.model_dir.join("accuracy_history.svg").exists());
        assert!(config.output.model_dir.join("loss_history.svg").exists());

        let saved = TrainingHistory::load(&outcome.history_path).unwrap();
        assert_eq!(saved.class_names, vec!["fire", "water"]);
        assert!(saved.test.is_some());
    }

    #[test]
    fn test_mismatched_class_sets_fail_before_training() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        std::fs::create_dir_all(config.data.base_dir.join("test").join("glass")).unwrap();
        image::RgbImage::from_pixel(4, 4, image::Rgb([1, 2, 3]))
            .save(config.data.base_dir.join("test").join("glass").join("0.png"))
            .unwrap();

        assert!(run_training::<TestBackend>(&config, &Default::default(), false).is_err());
        assert!(!config.output.model_dir.join("training_history.json").exists());
    }
}
