//! The civic issue classifier: MobileNetV2 backbone plus a dense head.

use std::path::Path;

use burn::{
    config::Config,
    module::Module,
    tensor::{activation::softmax, backend::Backend, Tensor},
};
use civic_core::ModelConfig;

use super::head::ClassificationHead;
use super::mobilenet::{MobileNetV2, MobileNetV2Config};
use crate::freeze::{LayerSpec, TrainablePlan};

/// Architecture hyperparameters, stored next to every saved model
#[derive(Config, Debug, PartialEq)]
pub struct ClassifierConfig {
    pub num_classes: usize,

    #[config(default = "512")]
    pub hidden_units: usize,

    #[config(default = "0.5")]
    pub dropout: f64,

    /// Backbone width multiplier
    #[config(default = "1.0")]
    pub width_multiplier: f64,
}

impl ClassifierConfig {
    pub fn from_model_config(model: &ModelConfig, num_classes: usize) -> Self {
        Self::new(num_classes)
            .with_hidden_units(model.hidden_units)
            .with_dropout(model.dropout)
            .with_width_multiplier(model.width_multiplier)
    }

    /// Build the model with random weights and nothing frozen.
    pub fn init<B: Backend>(&self, device: &B::Device) -> CivicClassifier<B> {
        let backbone = MobileNetV2Config::new()
            .with_width_multiplier(self.width_multiplier)
            .init(device);
        let head = ClassificationHead::new(
            backbone.out_channels(),
            self.hidden_units,
            self.dropout,
            self.num_classes,
            device,
        );

        CivicClassifier {
            backbone,
            head,
            num_classes: self.num_classes,
        }
    }

    /// Build the model for the first training phase.
    ///
    /// Loads the pretrained backbone when a path is given, then freezes the
    /// whole backbone.
    pub fn init_frozen<B: Backend>(
        &self,
        pretrained: Option<&Path>,
        device: &B::Device,
    ) -> civic_core::Result<CivicClassifier<B>> {
        let mut model = self.init(device);
        if let Some(path) = pretrained {
            model.backbone = model.backbone.load_pretrained(path, device)?;
        }
        let plan = TrainablePlan::frozen(model.backbone.num_layers());
        model.with_backbone_trainable(&plan)
    }

    /// Rebuild a phase-one model for fine-tuning.
    ///
    /// The weights move into a freshly built module tree, so nothing stays
    /// frozen from phase one, then `fine_tune_at` trailing backbone layers
    /// are unfrozen except the batch norms.
    pub fn init_fine_tune<B: Backend>(
        &self,
        model: CivicClassifier<B>,
        fine_tune_at: usize,
        device: &B::Device,
    ) -> civic_core::Result<(CivicClassifier<B>, TrainablePlan)> {
        let fresh = self.init::<B>(device).load_record(model.into_record());
        let plan = TrainablePlan::fine_tune(&fresh.backbone_layers(), fine_tune_at);
        let fresh = fresh.with_backbone_trainable(&plan)?;
        Ok((fresh, plan))
    }
}

#[derive(Module, Debug)]
pub struct CivicClassifier<B: Backend> {
    pub backbone: MobileNetV2<B>,
    pub head: ClassificationHead<B>,
    num_classes: usize,
}

impl<B: Backend> CivicClassifier<B> {
    /// Logits `[N, num_classes]` for images `[N, 3, H, W]` in `[0, 1]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.backbone.forward(images))
    }

    /// Class probabilities (softmax over the logits)
    pub fn forward_probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn backbone_layers(&self) -> Vec<LayerSpec> {
        self.backbone.layer_specs()
    }

    /// Apply a trainable plan to the backbone; the head is left untouched.
    pub fn with_backbone_trainable(self, plan: &TrainablePlan) -> civic_core::Result<Self> {
        Ok(Self {
            backbone: self.backbone.with_trainable(plan)?,
            head: self.head,
            num_classes: self.num_classes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::nn::loss::CrossEntropyLossConfig;
    use burn::optim::{AdamConfig, GradientsParams, Optimizer};
    use burn::tensor::{Distribution, Int, TensorData};

    type TestBackend = NdArray;
    type TrainBackend = Autodiff<NdArray>;

    fn values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
        tensor.into_data().convert::<f32>().to_vec().unwrap()
    }

    fn config() -> ClassifierConfig {
        ClassifierConfig::new(8)
            .with_hidden_units(16)
            .with_width_multiplier(0.35)
    }

    #[test]
    fn test_config_from_model_config() {
        let cfg = ClassifierConfig::from_model_config(&ModelConfig::default(), 8);
        assert_eq!(cfg.num_classes, 8);
        assert_eq!(cfg.hidden_units, 512);
        assert_eq!(cfg.dropout, 0.5);
        assert_eq!(cfg.width_multiplier, 1.0);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let device = Default::default();
        let model = config().init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::random([3, 3, 32, 32], Distribution::Default, &device);

        let probs = model.forward_probabilities(x);
        assert_eq!(probs.dims(), [3, 8]);

        let sums: Vec<f32> = probs.sum_dim(1).into_data().to_vec().unwrap();
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-4));
    }

    #[test]
    fn test_init_frozen_without_pretrained_file() {
        let device = Default::default();
        let tmp = tempfile::TempDir::new().unwrap();
        let missing = tmp.path().join("absent_backbone");
        let model = config()
            .init_frozen::<TestBackend>(Some(&missing), &device)
            .unwrap();
        assert!(model.backbone.stem.norm.is_frozen());
        assert_eq!(model.num_classes(), 8);
    }

    #[test]
    fn test_fine_tune_rebuild_trains_only_the_tail() {
        let device = Default::default();
        let config = ClassifierConfig::new(2)
            .with_hidden_units(8)
            .with_width_multiplier(0.35);
        let phase_one = config.init_frozen::<TrainBackend>(None, &device).unwrap();
        let (model, plan) = config.init_fine_tune(phase_one, 70, &device).unwrap();
        assert_eq!(plan.len(), 154);
        assert!(!plan.is_trainable(1));
        assert!(plan.is_trainable(151));

        let backbone = &model.backbone;
        let stem = values(backbone.stem.conv.weight.val());
        let leading = values(backbone.blocks[0].depthwise.conv.weight.val());
        let tail = values(backbone.blocks[16].project.conv.weight.val());
        let last = values(backbone.last_conv.conv.weight.val());
        let last_gamma = values(backbone.last_conv.norm.batch_norm.gamma.val());
        let head = values(model.head.fc2.weight.val());

        let images = Tensor::<TrainBackend, 4>::random([2, 3, 32, 32], Distribution::Default, &device);
        let targets = Tensor::<TrainBackend, 1, Int>::from_data(TensorData::new(vec![0i64, 1], [2]), &device);
        let loss = CrossEntropyLossConfig::new()
            .init(&device)
            .forward(model.forward(images), targets);
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        let mut optimizer = AdamConfig::new().init::<TrainBackend, CivicClassifier<TrainBackend>>();
        let model = optimizer.step(1e-2, model, grads);

        let backbone = &model.backbone;
        assert_eq!(values(backbone.stem.conv.weight.val()), stem);
        assert_eq!(values(backbone.blocks[0].depthwise.conv.weight.val()), leading);
        assert_eq!(values(backbone.last_conv.norm.batch_norm.gamma.val()), last_gamma);
        assert_ne!(values(backbone.blocks[16].project.conv.weight.val()), tail);
        assert_ne!(values(backbone.last_conv.conv.weight.val()), last);
        assert_ne!(values(model.head.fc2.weight.val()), head);
    }
}
