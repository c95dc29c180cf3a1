//! Fit loop for one training phase.
//!
//! Each epoch shuffles the training indices with the trainer's seeded RNG,
//! builds batches lazily (decode, resize, augment), steps Adam, then
//! validates on the inner backend and runs the epoch-end callbacks.

use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use civic_core::{
    EpochMetrics, Error, PhaseHistory, Result, TrainingConfig, TrainingLogger, TrainingPhase,
};
use civic_dataset::{ImageBatch, ImageBatcher, ImageFolderDataset, ImageItem};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::callbacks::{EarlyStopping, ModelCheckpoint, ReduceLrOnPlateau};
use crate::evaluator::{batch_progress, count_correct, evaluate_in_order};
use crate::model::CivicClassifier;

/// Keras Adam default epsilon
const ADAM_EPSILON: f32 = 1e-7;

/// What to run in one `fit_phase` call
#[derive(Debug, Clone, Copy)]
pub struct PhaseSettings {
    pub phase: TrainingPhase,
    pub epochs: usize,
    pub learning_rate: f64,
}

pub struct Trainer<B: AutodiffBackend> {
    device: B::Device,
    batch_size: usize,
    plateau: ReduceLrOnPlateau,
    early_stopping: EarlyStopping,
    checkpoint: ModelCheckpoint,
    rng: ChaCha8Rng,
    show_progress: bool,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(config: &TrainingConfig, checkpoint: ModelCheckpoint, device: B::Device) -> Self {
        Self {
            device,
            batch_size: config.schedule.batch_size.max(1),
            plateau: ReduceLrOnPlateau::new(config.callbacks.reduce_lr.clone()),
            early_stopping: EarlyStopping::new(config.callbacks.early_stopping.clone()),
            checkpoint,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            show_progress: true,
        }
    }

    /// Show per-batch progress bars (on by default).
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn checkpoint(&self) -> &ModelCheckpoint {
        &self.checkpoint
    }

    /// Run one phase with a fresh Adam optimizer.
    ///
    /// Plateau and early-stopping state start over; the checkpoint's best
    /// value carries over from earlier phases.
    pub fn fit_phase(
        &mut self,
        mut model: CivicClassifier<B>,
        settings: PhaseSettings,
        train: &ImageFolderDataset,
        valid: &ImageFolderDataset,
    ) -> Result<(CivicClassifier<B>, PhaseHistory)> {
        if train.samples().is_empty() {
            return Err(Error::Training("training split has no samples".into()));
        }

        self.plateau.reset();
        self.early_stopping.reset();

        let mut optimizer = AdamConfig::new()
            .with_epsilon(ADAM_EPSILON)
            .init::<B, CivicClassifier<B>>();
        let mut learning_rate = settings.learning_rate;
        let mut best_model: Option<CivicClassifier<B>> = None;
        let mut history = PhaseHistory::new(settings.phase);
        let mut logger = TrainingLogger::new(settings.phase.to_string(), settings.epochs);

        tracing::info!(
            "Starting {} phase: {} epochs, lr {:.1e}, {} train / {} valid samples",
            settings.phase,
            settings.epochs,
            learning_rate,
            train.samples().len(),
            valid.samples().len()
        );

        for epoch in 0..settings.epochs {
            logger.start_epoch(epoch);

            let (trained, loss, accuracy) = self.train_epoch(model, &mut optimizer, learning_rate, train)?;
            model = trained;

            let mut order: Vec<usize> = (0..valid.samples().len()).collect();
            order.shuffle(&mut self.rng);
            let val = evaluate_in_order(
                &model.valid(),
                valid,
                &order,
                self.batch_size,
                &self.device,
                false,
            )?;

            let metrics = EpochMetrics {
                epoch,
                loss,
                accuracy,
                val_loss: val.loss,
                val_accuracy: val.accuracy,
                learning_rate,
            };
            logger.end_epoch(&metrics);
            history.epochs.push(metrics.clone());

            if let Some(reduced) = self.plateau.on_epoch_end(val.loss, learning_rate) {
                learning_rate = reduced;
                logger.log_lr_reduced(epoch, reduced);
            }

            let decision = self.early_stopping.on_epoch_end(epoch, val.loss);
            if decision.improved && self.early_stopping.restore_best_weights() {
                best_model = Some(model.clone());
            }
            if decision.stop {
                history.stopped_epoch = Some(epoch);
                let mut restored_from = None;
                if self.early_stopping.restore_best_weights() {
                    if let Some(best) = best_model.take() {
                        model = best;
                        restored_from = self.early_stopping.best_epoch();
                    }
                }
                logger.log_early_stop(epoch, restored_from);
            }

            if let Some(previous) = self.checkpoint.on_epoch_end(settings.phase, &metrics, &model)? {
                logger.log_checkpoint(epoch, previous, metrics.val_accuracy, self.checkpoint.stem());
            }

            if decision.stop {
                break;
            }
        }

        logger.log_complete(history.len());
        Ok((model, history))
    }

    /// One pass over the shuffled training split.
    ///
    /// Returns the updated model, the sample-weighted mean loss and accuracy.
    fn train_epoch<O>(
        &mut self,
        mut model: CivicClassifier<B>,
        optimizer: &mut O,
        learning_rate: f64,
        train: &ImageFolderDataset,
    ) -> Result<(CivicClassifier<B>, f64, f64)>
    where
        O: Optimizer<CivicClassifier<B>, B>,
    {
        let batcher = ImageBatcher::new(train.image_size());
        let loss_fn = CrossEntropyLossConfig::new().init(&self.device);

        let mut order: Vec<usize> = (0..train.samples().len()).collect();
        order.shuffle(&mut self.rng);

        let progress = batch_progress(
            order.len().div_ceil(self.batch_size),
            self.show_progress,
            "train",
        );
        let mut loss_sum = 0.0f64;
        let mut correct = 0usize;
        let mut seen = 0usize;

        for chunk in order.chunks(self.batch_size) {
            let rng = &mut self.rng;
            let items = chunk
                .iter()
                .map(|&i| train.load_augmented(i, rng))
                .collect::<Result<Vec<ImageItem>>>()?;
            let n = items.len();

            let batch: ImageBatch<B> = batcher.batch(items, &self.device);
            let logits = model.forward(batch.images);
            let loss = loss_fn.forward(logits.clone(), batch.targets.clone());

            let loss_value: f64 = loss.clone().into_scalar().elem();
            loss_sum += loss_value * n as f64;
            correct += count_correct(logits, batch.targets);
            seen += n;

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(learning_rate, model, grads);

            progress.inc(1);
            progress.set_message(format!("train loss {:.4}", loss_sum / seen as f64));
        }
        progress.finish_and_clear();

        let seen = seen.max(1) as f64;
        Ok((model, loss_sum / seen, correct as f64 / seen))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactMetadata;
    use crate::model::ClassifierConfig;
    use burn::backend::{Autodiff, NdArray};
    use civic_core::{AugmentationConfig, ImageSample};
    use civic_dataset::Augmenter;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    fn split(dir: &std::path::Path, per_class: usize) -> ImageFolderDataset {
        std::fs::create_dir_all(dir).unwrap();
        let mut samples = Vec::new();
        for label in 0..2usize {
            for i in 0..per_class {
                let path = dir.join(format!("{label}_{i}.png"));
                let color = if label == 0 { [230, 30, 30] } else { [30, 30, 230] };
                image::RgbImage::from_pixel(24, 24, image::Rgb(color)).save(&path).unwrap();
                samples.push(ImageSample::new(path, label, if label == 0 { "fire" } else { "water" }));
            }
        }
        ImageFolderDataset::new(samples, 32)
    }

    fn config(tmp: &TempDir, epochs: usize) -> TrainingConfig {
        let mut config = TrainingConfig::default();
        config.schedule.batch_size = 2;
        config.schedule.epochs_initial = epochs;
        config.output.model_dir = tmp.path().join("models");
        config
    }

    fn classifier() -> ClassifierConfig {
        ClassifierConfig::new(2).with_hidden_units(8).with_width_multiplier(0.35)
    }

    #[test]
    fn test_fit_phase_records_history_and_checkpoints() {
        let tmp = TempDir::new().unwrap();
        let train = split(&tmp.path().join("train"), 2)
            .with_augmentation(Augmenter::new(AugmentationConfig::default()));
        let valid = split(&tmp.path().join("valid"), 1);
        let config = config(&tmp, 2);

        let stem = config.model_stem();
        let metadata = ArtifactMetadata::new(classifier(), vec!["fire".into(), "water".into()], 32);
        let device = Default::default();
        let mut trainer = Trainer::<TestBackend>::new(&config, ModelCheckpoint::new(&stem, metadata), device)
            .with_progress(false);

        let model = classifier().init_frozen::<TestBackend>(None, &device).unwrap();
        let settings = PhaseSettings {
            phase: TrainingPhase::Initial,
            epochs: 2,
            learning_rate: 1e-3,
        };
        let (_model, history) = trainer.fit_phase(model, settings, &train, &valid).unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history.phase, TrainingPhase::Initial);
        for m in &history.epochs {
            assert!(m.loss.is_finite());
            assert!((0.0..=1.0).contains(&m.val_accuracy));
            assert_eq!(m.learning_rate, 1e-3);
        }
        // the first epoch always beats -inf
        assert!(stem.with_extension("mpk").exists());
        assert!(stem.with_extension("meta.json").exists());
    }

    #[test]
    fn test_fit_phase_rejects_empty_training_split() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp, 1);
        let metadata = ArtifactMetadata::new(classifier(), vec!["a".into(), "b".into()], 32);
        let device = Default::default();
        let mut trainer =
            Trainer::<TestBackend>::new(&config, ModelCheckpoint::new(config.model_stem(), metadata), device)
                .with_progress(false);
        let model = classifier().init::<TestBackend>(&device);
        let empty = ImageFolderDataset::new(Vec::new(), 32);
        let settings = PhaseSettings {
            phase: TrainingPhase::Initial,
            epochs: 1,
            learning_rate: 1e-3,
        };
        assert!(trainer.fit_phase(model, settings, &empty, &empty).is_err());
    }
}
