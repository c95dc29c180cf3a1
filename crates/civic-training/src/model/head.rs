use burn::{
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Global pooling, a hidden dense layer with dropout, then class logits
#[derive(Module, Debug)]
pub struct ClassificationHead<B: Backend> {
    pub global_pool: AdaptiveAvgPool2d,
    pub fc1: Linear<B>,
    pub relu: Relu,
    pub dropout: Dropout,
    pub fc2: Linear<B>,
}

impl<B: Backend> ClassificationHead<B> {
    pub fn new(
        in_features: usize,
        hidden_units: usize,
        dropout: f64,
        num_classes: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc1: LinearConfig::new(in_features, hidden_units).init(device),
            relu: Relu::new(),
            dropout: DropoutConfig::new(dropout).init(),
            fc2: LinearConfig::new(hidden_units, num_classes).init(device),
        }
    }

    /// `[N, C, H, W]` features to `[N, num_classes]` logits
    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.global_pool.forward(features);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.relu.forward(self.fc1.forward(x));
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }
}
