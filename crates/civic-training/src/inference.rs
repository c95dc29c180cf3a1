//! Single-image prediction with a saved classifier.

use std::path::Path;

use burn::tensor::{backend::Backend, Tensor, TensorData};
use civic_core::{Error, Prediction, Result, CLASS_NAMES, NUM_CLASSES};
use civic_dataset::preprocess::image_to_chw;
use image::DynamicImage;

use crate::artifact::load_artifact;
use crate::model::CivicClassifier;

/// A loaded model plus the preprocessing it was trained with
pub struct Predictor<B: Backend> {
    model: CivicClassifier<B>,
    device: B::Device,
    image_size: usize,
    class_names: Vec<String>,
}

impl<B: Backend> Predictor<B> {
    pub fn new(
        model: CivicClassifier<B>,
        device: B::Device,
        image_size: usize,
        class_names: Vec<String>,
    ) -> Result<Self> {
        if model.num_classes() != class_names.len() {
            return Err(Error::Model(format!(
                "model has {} outputs but {} labels were given",
                model.num_classes(),
                class_names.len()
            )));
        }
        Ok(Self {
            model,
            device,
            image_size,
            class_names,
        })
    }

    /// Load a saved artifact for serving.
    ///
    /// Predictions are labelled with the fixed civic label set, so the
    /// artifact must have exactly that many outputs. A differing label order
    /// in the metadata is logged but the fixed list still wins.
    pub fn load(stem: &Path, device: B::Device) -> Result<Self> {
        let (model, metadata) = load_artifact::<B>(stem, &device)?;
        if model.num_classes() != NUM_CLASSES {
            return Err(Error::Model(format!(
                "model at {:?} has {} classes, expected {}",
                stem,
                model.num_classes(),
                NUM_CLASSES
            )));
        }
        if metadata.class_names != CLASS_NAMES {
            tracing::warn!(
                "Model was trained with labels {:?}; serving with {:?}",
                metadata.class_names,
                CLASS_NAMES
            );
        }

        let class_names = CLASS_NAMES.iter().map(|s| s.to_string()).collect();
        Self::new(model, device, metadata.image_size, class_names)
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// Softmax probabilities for one decoded image
    pub fn probabilities(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        let size = self.image_size;
        let pixels = image_to_chw(image, size);
        let input = Tensor::<B, 4>::from_data(TensorData::new(pixels, [1, 3, size, size]), &self.device);

        self.model
            .forward_probabilities(input)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| Error::Inference(format!("failed to read probabilities: {:?}", e)))
    }

    /// Most likely class and its probability
    pub fn predict(&self, image: &DynamicImage) -> Result<Prediction> {
        let probabilities = self.probabilities(image)?;
        Prediction::from_probabilities(&probabilities, self.class_names.as_slice())
            .ok_or_else(|| Error::Inference("model produced no probabilities".into()))
    }
}
