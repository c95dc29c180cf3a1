//! The model behind `/predict`.

use std::path::Path;
use std::sync::Mutex;

use civic_core::{Error, Prediction, Result};
use civic_training::backend::{Backend, InferenceBackend};
use civic_training::Predictor;
use image::DynamicImage;

/// Anything that can label a decoded image.
///
/// Called from the blocking pool, so implementations may block.
pub trait ImageClassifier: Send + Sync {
    fn classify(&self, image: &DynamicImage) -> Result<Prediction>;
}

/// A [`Predictor`] behind a mutex
pub struct ModelClassifier<B: Backend> {
    predictor: Mutex<Predictor<B>>,
}

impl<B: Backend> ModelClassifier<B> {
    pub fn new(predictor: Predictor<B>) -> Self {
        Self {
            predictor: Mutex::new(predictor),
        }
    }
}

impl ModelClassifier<InferenceBackend> {
    /// Load the artifact at `stem` on the default device.
    pub fn load(stem: &Path) -> Result<Self> {
        let predictor = Predictor::load(stem, civic_training::default_device())?;
        Ok(Self::new(predictor))
    }
}

impl<B: Backend> ImageClassifier for ModelClassifier<B> {
    fn classify(&self, image: &DynamicImage) -> Result<Prediction> {
        let predictor = self
            .predictor
            .lock()
            .map_err(|_| Error::Inference("model lock poisoned".into()))?;
        predictor.predict(image)
    }
}
