//! MobileNetV2 feature extractor.
//!
//! Layout follows the ImageNet MobileNetV2: a strided 3x3 stem, seventeen
//! inverted residual blocks and a final 1x1 convolution. The backbone also
//! publishes a flat layer catalogue ([`MobileNetV2::layer_specs`]) in the
//! usual Keras order so fine-tuning can address layers by position.

use std::path::Path;

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d,
    },
    tensor::{backend::Backend, Tensor},
};
use civic_core::Error;

use crate::artifact::ArtifactRecorder;
use crate::freeze::{LayerKind, LayerSpec, TrainablePlan};
use crate::model::pretrained::ImagenetWeights;

/// `(expansion, channels, repeats, first stride)` per stage
pub(crate) const INVERTED_RESIDUAL_SETTINGS: [(usize, usize, usize, usize); 7] = [
    (1, 16, 1, 1),
    (6, 24, 2, 2),
    (6, 32, 3, 2),
    (6, 64, 4, 2),
    (6, 96, 3, 1),
    (6, 160, 3, 2),
    (6, 320, 1, 1),
];

const BN_EPSILON: f64 = 1e-3;
const BN_MOMENTUM: f64 = 1e-3;

/// Round `value` to a multiple of `divisor`, never dropping more than 10%.
pub fn make_divisible(value: f64, divisor: usize) -> usize {
    let d = divisor as f64;
    let mut rounded = (((value + d / 2.0) / d).floor() * d).max(d);
    if rounded < 0.9 * value {
        rounded += d;
    }
    rounded as usize
}

#[derive(Config, Debug)]
pub struct MobileNetV2Config {
    /// Channel width multiplier (alpha)
    #[config(default = "1.0")]
    pub width_multiplier: f64,

    /// Input channels
    #[config(default = "3")]
    pub in_channels: usize,
}

impl MobileNetV2Config {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MobileNetV2<B> {
        let alpha = self.width_multiplier;
        let stem_channels = make_divisible(32.0 * alpha, 8);
        let stem = ConvNormAct::new(self.in_channels, stem_channels, 3, 2, false, true, device);

        let mut blocks = Vec::with_capacity(17);
        let mut in_channels = stem_channels;
        for (expansion, channels, repeats, stride) in INVERTED_RESIDUAL_SETTINGS {
            let out_channels = make_divisible((channels as f64 * alpha).floor(), 8);
            for i in 0..repeats {
                let stride = if i == 0 { stride } else { 1 };
                let expand = !blocks.is_empty();
                blocks.push(InvertedResidual::new(
                    in_channels,
                    out_channels,
                    expansion,
                    stride,
                    expand,
                    device,
                ));
                in_channels = out_channels;
            }
        }

        let out_channels = if alpha > 1.0 {
            make_divisible(1280.0 * alpha, 8)
        } else {
            1280
        };
        let last_conv = ConvNormAct::new(in_channels, out_channels, 1, 1, false, true, device);

        MobileNetV2 {
            stem,
            blocks,
            last_conv,
            out_channels,
        }
    }
}

/// Batch normalization that can be frozen.
///
/// A frozen norm has no gradients and always normalizes with its running
/// statistics, on any backend.
#[derive(Module, Debug)]
pub struct Norm<B: Backend> {
    pub batch_norm: BatchNorm<B>,
    frozen: bool,
}

impl<B: Backend> Norm<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            batch_norm: BatchNormConfig::new(channels)
                .with_epsilon(BN_EPSILON)
                .with_momentum(BN_MOMENTUM)
                .init(device),
            frozen: false,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn with_trainable(self, trainable: bool) -> Self {
        if trainable {
            self
        } else {
            Self {
                batch_norm: self.batch_norm.no_grad(),
                frozen: true,
            }
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        if !self.frozen {
            return self.batch_norm.forward(x);
        }

        let bn = &self.batch_norm;
        let gamma = bn.gamma.val();
        let shape = [1, gamma.dims()[0], 1, 1];
        let mean = bn.running_mean.value().reshape(shape);
        let std = bn.running_var.value().add_scalar(bn.epsilon).sqrt().reshape(shape);

        x.sub(mean)
            .div(std)
            .mul(gamma.reshape(shape))
            .add(bn.beta.val().reshape(shape))
    }
}

/// Convolution, batch norm and optional ReLU6
#[derive(Module, Debug)]
pub struct ConvNormAct<B: Backend> {
    pub conv: Conv2d<B>,
    pub norm: Norm<B>,
    depthwise: bool,
    relu6: bool,
}

impl<B: Backend> ConvNormAct<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        depthwise: bool,
        relu6: bool,
        device: &B::Device,
    ) -> Self {
        let padding = (kernel_size - 1) / 2;
        let groups = if depthwise { in_channels } else { 1 };
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_groups(groups)
            .with_bias(false)
            .init(device);

        Self {
            conv,
            norm: Norm::new(out_channels, device),
            depthwise,
            relu6,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.norm.forward(self.conv.forward(x));
        if self.relu6 {
            x.clamp(0.0, 6.0)
        } else {
            x
        }
    }

    fn push_specs(&self, conv: &str, norm: &str, act: &str, specs: &mut Vec<LayerSpec>) {
        let kind = if self.depthwise {
            LayerKind::DepthwiseConv2D
        } else {
            LayerKind::Conv2D
        };
        specs.push(LayerSpec::new(conv, kind));
        specs.push(LayerSpec::new(norm, LayerKind::BatchNormalization));
        if self.relu6 {
            specs.push(LayerSpec::new(act, LayerKind::ReLU));
        }
    }

    fn with_trainable(self, flags: &mut impl Iterator<Item = bool>) -> Self {
        let conv_trainable = flags.next().unwrap_or(false);
        let norm_trainable = flags.next().unwrap_or(false);
        if self.relu6 {
            flags.next();
        }

        Self {
            conv: if conv_trainable { self.conv } else { self.conv.no_grad() },
            norm: self.norm.with_trainable(norm_trainable),
            depthwise: self.depthwise,
            relu6: self.relu6,
        }
    }
}

/// Expand (1x1), depthwise (3x3), project (1x1, linear)
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    pub expand: Option<ConvNormAct<B>>,
    pub depthwise: ConvNormAct<B>,
    pub project: ConvNormAct<B>,
    stride: usize,
    use_residual: bool,
}

impl<B: Backend> InvertedResidual<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        expansion: usize,
        stride: usize,
        expand: bool,
        device: &B::Device,
    ) -> Self {
        let hidden = in_channels * expansion;
        let expand = expand.then(|| ConvNormAct::new(in_channels, hidden, 1, 1, false, true, device));

        Self {
            expand,
            depthwise: ConvNormAct::new(hidden, hidden, 3, stride, true, true, device),
            project: ConvNormAct::new(hidden, out_channels, 1, 1, false, false, device),
            stride,
            use_residual: stride == 1 && in_channels == out_channels,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = match &self.expand {
            Some(expand) => expand.forward(x.clone()),
            None => x.clone(),
        };
        let out = self.project.forward(self.depthwise.forward(out));

        if self.use_residual {
            x + out
        } else {
            out
        }
    }

    fn push_specs(&self, block_id: usize, specs: &mut Vec<LayerSpec>) {
        let prefix = if block_id == 0 {
            "expanded_conv_".to_string()
        } else {
            format!("block_{block_id}_")
        };

        if let Some(expand) = &self.expand {
            expand.push_specs(
                &format!("{prefix}expand"),
                &format!("{prefix}expand_BN"),
                &format!("{prefix}expand_relu"),
                specs,
            );
        }
        if self.stride == 2 {
            specs.push(LayerSpec::new(format!("{prefix}pad"), LayerKind::ZeroPadding2D));
        }
        self.depthwise.push_specs(
            &format!("{prefix}depthwise"),
            &format!("{prefix}depthwise_BN"),
            &format!("{prefix}depthwise_relu"),
            specs,
        );
        self.project.push_specs(
            &format!("{prefix}project"),
            &format!("{prefix}project_BN"),
            "",
            specs,
        );
        if self.use_residual {
            specs.push(LayerSpec::new(format!("{prefix}add"), LayerKind::Add));
        }
    }

    fn with_trainable(self, flags: &mut impl Iterator<Item = bool>) -> Self {
        let expand = self.expand.map(|expand| expand.with_trainable(flags));
        if self.stride == 2 {
            flags.next();
        }
        let depthwise = self.depthwise.with_trainable(flags);
        let project = self.project.with_trainable(flags);
        if self.use_residual {
            flags.next();
        }

        Self {
            expand,
            depthwise,
            project,
            stride: self.stride,
            use_residual: self.use_residual,
        }
    }
}

/// MobileNetV2 without its ImageNet classifier
#[derive(Module, Debug)]
pub struct MobileNetV2<B: Backend> {
    pub stem: ConvNormAct<B>,
    pub blocks: Vec<InvertedResidual<B>>,
    pub last_conv: ConvNormAct<B>,
    out_channels: usize,
}

impl<B: Backend> MobileNetV2<B> {
    /// Feature maps `[N, out_channels, H/32, W/32]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.stem.forward(x);
        for block in &self.blocks {
            x = block.forward(x);
        }
        self.last_conv.forward(x)
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Ordered layer catalogue, input layer included
    pub fn layer_specs(&self) -> Vec<LayerSpec> {
        let mut specs = vec![LayerSpec::new("input_1", LayerKind::Input)];
        self.stem.push_specs("Conv1", "bn_Conv1", "Conv1_relu", &mut specs);
        for (block_id, block) in self.blocks.iter().enumerate() {
            block.push_specs(block_id, &mut specs);
        }
        self.last_conv.push_specs("Conv_1", "Conv_1_bn", "out_relu", &mut specs);
        specs
    }

    pub fn num_layers(&self) -> usize {
        self.layer_specs().len()
    }

    /// Freeze every layer whose flag is off.
    ///
    /// Flags are consumed in catalogue order. Meant for freshly built or
    /// freshly loaded modules: a flag that is on leaves the layer as it is.
    pub fn with_trainable(self, plan: &TrainablePlan) -> civic_core::Result<Self> {
        let expected = self.num_layers();
        if plan.len() != expected {
            return Err(Error::Model(format!(
                "trainable plan has {} entries, backbone has {} layers",
                plan.len(),
                expected
            )));
        }

        let mut flags = plan.flags().iter().copied();
        flags.next(); // input layer

        let stem = self.stem.with_trainable(&mut flags);
        let blocks = self
            .blocks
            .into_iter()
            .map(|block| block.with_trainable(&mut flags))
            .collect();
        let last_conv = self.last_conv.with_trainable(&mut flags);

        Ok(Self {
            stem,
            blocks,
            last_conv,
            out_channels: self.out_channels,
        })
    }

    /// Load pretrained weights from `path`.
    ///
    /// A `.safetensors` file is read as an ImageNet MobileNetV2 checkpoint
    /// (torchvision or timm naming); any other path is a burn record
    /// (`<path>.mpk`) of this backbone. A missing file is not an error: the
    /// backbone keeps its random initialization and a warning is logged.
    pub fn load_pretrained(self, path: &Path, device: &B::Device) -> civic_core::Result<Self> {
        let is_safetensors = path.extension().is_some_and(|ext| ext == "safetensors");
        let file = if is_safetensors {
            path.to_path_buf()
        } else {
            path.with_extension("mpk")
        };
        if !file.exists() {
            tracing::warn!(
                "Pretrained backbone not found at {:?}; using random initialization",
                file
            );
            return Ok(self);
        }

        tracing::info!("Loading pretrained backbone from {:?}", file);
        if is_safetensors {
            let weights = ImagenetWeights::open(&file)?;
            tracing::debug!("{} tensors in {:?}", weights.len(), file);
            let (backbone, _) = self.import_imagenet(&weights, device)?;
            return Ok(backbone);
        }

        self.load_file(file.clone(), &ArtifactRecorder::new(), device)
            .map_err(|e| Error::Model(format!("failed to load backbone {:?}: {}", file, e)))
    }
}
