//! ImageNet MobileNetV2 weights from a `.safetensors` file.
//!
//! Two key layouts are recognised: torchvision (`features.N.*`) and timm
//! (`conv_stem`, `blocks.i.j.*`, `conv_head`). Every convolution and batch
//! norm of the backbone is matched by name and shape. Keys with no
//! counterpart, such as the 1000-way ImageNet classifier, are skipped.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use burn::{
    module::{Param, RunningState},
    tensor::{backend::Backend, Tensor, TensorData},
};
use civic_core::{Error, Result};
use safetensors::{tensor::Dtype, SafeTensors};
use tracing::{debug, info, warn};

use super::mobilenet::{ConvNormAct, MobileNetV2, INVERTED_RESIDUAL_SETTINGS};

/// One tensor from the file, widened to `f32`
#[derive(Debug, Clone)]
pub struct RawTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl RawTensor {
    fn to_tensor<B: Backend, const D: usize>(&self, device: &B::Device) -> Tensor<B, D> {
        Tensor::from_data(TensorData::new(self.data.clone(), self.shape.clone()), device)
    }
}

/// Parameter naming scheme of the source checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLayout {
    Torchvision,
    Timm,
}

/// A convolution + batch norm pair of the backbone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvSlot {
    Stem,
    Expand(usize),
    Depthwise { block: usize, expanded: bool },
    Project { block: usize, expanded: bool },
    Last,
}

/// `(stage, index within stage)` of a flat block index
fn stage_of(block: usize) -> (usize, usize) {
    let mut remaining = block;
    for (stage, (_, _, repeats, _)) in INVERTED_RESIDUAL_SETTINGS.iter().enumerate() {
        if remaining < *repeats {
            return (stage, remaining);
        }
        remaining -= repeats;
    }
    (INVERTED_RESIDUAL_SETTINGS.len(), remaining)
}

fn block_count() -> usize {
    INVERTED_RESIDUAL_SETTINGS.iter().map(|(_, _, n, _)| n).sum()
}

impl KeyLayout {
    fn detect<'a>(mut keys: impl Iterator<Item = &'a String>) -> Option<Self> {
        keys.find_map(|key| {
            if key.starts_with("features.") {
                Some(Self::Torchvision)
            } else if key.starts_with("conv_stem.") || key.starts_with("blocks.") {
                Some(Self::Timm)
            } else {
                None
            }
        })
    }

    /// `(convolution prefix, batch norm prefix)` for `slot`
    pub fn prefixes(self, slot: ConvSlot) -> (String, String) {
        match self {
            Self::Torchvision => match slot {
                ConvSlot::Stem => ("features.0.0".into(), "features.0.1".into()),
                ConvSlot::Last => {
                    let f = block_count() + 1;
                    (format!("features.{f}.0"), format!("features.{f}.1"))
                }
                ConvSlot::Expand(block) => {
                    let f = block + 1;
                    (format!("features.{f}.conv.0.0"), format!("features.{f}.conv.0.1"))
                }
                ConvSlot::Depthwise { block, expanded } => {
                    let (f, i) = (block + 1, usize::from(expanded));
                    (format!("features.{f}.conv.{i}.0"), format!("features.{f}.conv.{i}.1"))
                }
                ConvSlot::Project { block, expanded } => {
                    let (f, i) = (block + 1, usize::from(expanded) + 1);
                    (format!("features.{f}.conv.{i}"), format!("features.{f}.conv.{}", i + 1))
                }
            },
            Self::Timm => match slot {
                ConvSlot::Stem => ("conv_stem".into(), "bn1".into()),
                ConvSlot::Last => ("conv_head".into(), "bn2".into()),
                ConvSlot::Expand(block) => {
                    let (s, j) = stage_of(block);
                    (format!("blocks.{s}.{j}.conv_pw"), format!("blocks.{s}.{j}.bn1"))
                }
                ConvSlot::Depthwise { block, expanded } => {
                    let (s, j) = stage_of(block);
                    let bn = if expanded { "bn2" } else { "bn1" };
                    (format!("blocks.{s}.{j}.conv_dw"), format!("blocks.{s}.{j}.{bn}"))
                }
                ConvSlot::Project { block, expanded } => {
                    let (s, j) = stage_of(block);
                    let (conv, bn) = if expanded { ("conv_pwl", "bn3") } else { ("conv_pw", "bn2") };
                    (format!("blocks.{s}.{j}.{conv}"), format!("blocks.{s}.{j}.{bn}"))
                }
            },
        }
    }
}

/// Tensors of a MobileNetV2 ImageNet checkpoint
pub struct ImagenetWeights {
    tensors: HashMap<String, RawTensor>,
    layout: KeyLayout,
}

impl ImagenetWeights {
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes).map_err(|e| match e {
            Error::Model(msg) => Error::Model(format!("{:?}: {}", path, msg)),
            other => other,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let file = SafeTensors::deserialize(bytes)
            .map_err(|e| Error::Model(format!("invalid safetensors: {:?}", e)))?;

        let mut tensors = HashMap::new();
        for (name, view) in file.tensors() {
            let data = view.data();
            let values: Vec<f32> = match view.dtype() {
                Dtype::F32 => data
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
                Dtype::F16 => data
                    .chunks_exact(2)
                    .map(|b| half::f16::from_le_bytes([b[0], b[1]]).to_f32())
                    .collect(),
                Dtype::BF16 => data
                    .chunks_exact(2)
                    .map(|b| half::bf16::from_le_bytes([b[0], b[1]]).to_f32())
                    .collect(),
                other => {
                    debug!("Skipping {} with dtype {:?}", name, other);
                    continue;
                }
            };
            tensors.insert(
                name,
                RawTensor {
                    shape: view.shape().to_vec(),
                    data: values,
                },
            );
        }

        let layout = KeyLayout::detect(tensors.keys())
            .ok_or_else(|| Error::Model("no MobileNetV2 keys (torchvision or timm) found".into()))?;
        Ok(Self { tensors, layout })
    }

    pub fn layout(&self) -> KeyLayout {
        self.layout
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    fn get(&self, prefix: &str, name: &str) -> Option<&RawTensor> {
        self.tensors.get(&format!("{prefix}.{name}"))
    }
}

/// Copied vs. expected backbone tensors
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    pub copied: usize,
    pub expected: usize,
}

fn copy_param<B: Backend, const D: usize>(
    param: &mut Param<Tensor<B, D>>,
    raw: Option<&RawTensor>,
    device: &B::Device,
) -> bool {
    match raw {
        Some(raw) if raw.shape.as_slice() == param.val().dims().as_slice() => {
            *param = Param::from_tensor(raw.to_tensor(device));
            true
        }
        _ => false,
    }
}

fn copy_state<B: Backend>(
    state: &mut RunningState<Tensor<B, 1>>,
    raw: Option<&RawTensor>,
    device: &B::Device,
) -> bool {
    match raw {
        Some(raw) if raw.shape.as_slice() == state.value().dims().as_slice() => {
            *state = RunningState::new(raw.to_tensor(device));
            true
        }
        _ => false,
    }
}

fn import_layer<B: Backend>(
    layer: &mut ConvNormAct<B>,
    slot: ConvSlot,
    weights: &ImagenetWeights,
    device: &B::Device,
    report: &mut ImportReport,
) {
    let (conv, norm) = weights.layout.prefixes(slot);
    let bn = &mut layer.norm.batch_norm;
    let results = [
        copy_param(&mut layer.conv.weight, weights.get(&conv, "weight"), device),
        copy_param(&mut bn.gamma, weights.get(&norm, "weight"), device),
        copy_param(&mut bn.beta, weights.get(&norm, "bias"), device),
        copy_state(&mut bn.running_mean, weights.get(&norm, "running_mean"), device),
        copy_state(&mut bn.running_var, weights.get(&norm, "running_var"), device),
    ];

    let copied = results.iter().filter(|ok| **ok).count();
    if copied < results.len() {
        debug!("{}: {}/{} tensors matched", conv, copied, results.len());
    }
    report.copied += copied;
    report.expected += results.len();
}

impl<B: Backend> MobileNetV2<B> {
    /// Copy matching tensors from `weights` into the backbone.
    ///
    /// Fails when nothing matched, e.g. a checkpoint of another width.
    pub fn import_imagenet(
        mut self,
        weights: &ImagenetWeights,
        device: &B::Device,
    ) -> Result<(Self, ImportReport)> {
        let mut report = ImportReport::default();

        import_layer(&mut self.stem, ConvSlot::Stem, weights, device, &mut report);
        for (block, layer) in self.blocks.iter_mut().enumerate() {
            let expanded = layer.expand.is_some();
            if let Some(expand) = layer.expand.as_mut() {
                import_layer(expand, ConvSlot::Expand(block), weights, device, &mut report);
            }
            import_layer(
                &mut layer.depthwise,
                ConvSlot::Depthwise { block, expanded },
                weights,
                device,
                &mut report,
            );
            import_layer(
                &mut layer.project,
                ConvSlot::Project { block, expanded },
                weights,
                device,
                &mut report,
            );
        }
        import_layer(&mut self.last_conv, ConvSlot::Last, weights, device, &mut report);

        if report.copied == 0 {
            return Err(Error::Model(format!(
                "no backbone tensors matched the {:?} checkpoint",
                weights.layout
            )));
        }
        if report.copied < report.expected {
            warn!(
                "Pretrained import is partial: {}/{} backbone tensors matched",
                report.copied, report.expected
            );
        } else {
            info!("Imported {} pretrained backbone tensors ({:?} layout)", report.copied, weights.layout);
        }
        Ok((self, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MobileNetV2Config;
    use burn::backend::NdArray;
    use safetensors::tensor::TensorView;

    type TestBackend = NdArray;

    fn small() -> MobileNetV2<TestBackend> {
        MobileNetV2Config::new()
            .with_width_multiplier(0.35)
            .init(&Default::default())
    }

    fn values<const D: usize>(tensor: Tensor<TestBackend, D>) -> Vec<f32> {
        tensor.into_data().to_vec().unwrap()
    }

    fn slots(model: &MobileNetV2<TestBackend>) -> Vec<(ConvSlot, &ConvNormAct<TestBackend>)> {
        let mut out = vec![(ConvSlot::Stem, &model.stem)];
        for (block, layer) in model.blocks.iter().enumerate() {
            let expanded = layer.expand.is_some();
            if let Some(expand) = &layer.expand {
                out.push((ConvSlot::Expand(block), expand));
            }
            out.push((ConvSlot::Depthwise { block, expanded }, &layer.depthwise));
            out.push((ConvSlot::Project { block, expanded }, &layer.project));
        }
        out.push((ConvSlot::Last, &model.last_conv));
        out
    }

    /// Serialize `model`'s conv weights under `layout` names, with constant
    /// batch norm statistics so the import is observable.
    fn export(model: &MobileNetV2<TestBackend>, layout: KeyLayout) -> Vec<u8> {
        let mut entries: Vec<(String, Vec<usize>, Vec<u8>)> = Vec::new();
        let mut push = |name: String, shape: Vec<usize>, data: Vec<f32>| {
            let bytes = data.iter().flat_map(|v| v.to_le_bytes()).collect();
            entries.push((name, shape, bytes));
        };

        for (slot, layer) in slots(model) {
            let (conv, norm) = layout.prefixes(slot);
            let weight = layer.conv.weight.val();
            push(format!("{conv}.weight"), weight.dims().to_vec(), values(weight));
            let channels = layer.norm.batch_norm.gamma.val().dims()[0];
            push(format!("{norm}.weight"), vec![channels], vec![1.5; channels]);
            push(format!("{norm}.bias"), vec![channels], vec![0.25; channels]);
            push(format!("{norm}.running_mean"), vec![channels], vec![0.5; channels]);
            push(format!("{norm}.running_var"), vec![channels], vec![2.0; channels]);
        }
        push("classifier.1.weight".into(), vec![1000, 4], vec![0.0; 4000]);

        let views: Vec<(String, TensorView<'_>)> = entries
            .iter()
            .map(|(name, shape, bytes)| {
                (name.clone(), TensorView::new(Dtype::F32, shape.clone(), bytes).unwrap())
            })
            .collect();
        safetensors::tensor::serialize(views, &None).unwrap()
    }

    #[test]
    fn test_torchvision_prefixes() {
        let layout = KeyLayout::Torchvision;
        assert_eq!(layout.prefixes(ConvSlot::Stem), ("features.0.0".into(), "features.0.1".into()));
        assert_eq!(
            layout.prefixes(ConvSlot::Depthwise { block: 0, expanded: false }),
            ("features.1.conv.0.0".into(), "features.1.conv.0.1".into())
        );
        assert_eq!(
            layout.prefixes(ConvSlot::Project { block: 0, expanded: false }),
            ("features.1.conv.1".into(), "features.1.conv.2".into())
        );
        assert_eq!(
            layout.prefixes(ConvSlot::Expand(1)),
            ("features.2.conv.0.0".into(), "features.2.conv.0.1".into())
        );
        assert_eq!(
            layout.prefixes(ConvSlot::Project { block: 1, expanded: true }),
            ("features.2.conv.2".into(), "features.2.conv.3".into())
        );
        assert_eq!(layout.prefixes(ConvSlot::Last), ("features.18.0".into(), "features.18.1".into()));
    }

    #[test]
    fn test_timm_prefixes() {
        let layout = KeyLayout::Timm;
        assert_eq!(layout.prefixes(ConvSlot::Stem), ("conv_stem".into(), "bn1".into()));
        assert_eq!(
            layout.prefixes(ConvSlot::Project { block: 0, expanded: false }),
            ("blocks.0.0.conv_pw".into(), "blocks.0.0.bn2".into())
        );
        // block 3 is the first block of the third stage
        assert_eq!(
            layout.prefixes(ConvSlot::Expand(3)),
            ("blocks.2.0.conv_pw".into(), "blocks.2.0.bn1".into())
        );
        assert_eq!(
            layout.prefixes(ConvSlot::Project { block: 16, expanded: true }),
            ("blocks.6.0.conv_pwl".into(), "blocks.6.0.bn3".into())
        );
        assert_eq!(layout.prefixes(ConvSlot::Last), ("conv_head".into(), "bn2".into()));
    }

    #[test]
    fn test_import_copies_every_backbone_tensor() {
        for layout in [KeyLayout::Torchvision, KeyLayout::Timm] {
            let source = small();
            let weights = ImagenetWeights::from_bytes(&export(&source, layout)).unwrap();
            assert_eq!(weights.layout(), layout);

            let (target, report) = small().import_imagenet(&weights, &Default::default()).unwrap();
            assert_eq!(report.copied, report.expected);
            assert_eq!(report.expected, slots(&source).len() * 5);

            assert_eq!(values(target.stem.conv.weight.val()), values(source.stem.conv.weight.val()));
            assert_eq!(
                values(target.blocks[16].project.conv.weight.val()),
                values(source.blocks[16].project.conv.weight.val())
            );
            let bn = &target.last_conv.norm.batch_norm;
            assert!(values(bn.running_var.value()).iter().all(|v| *v == 2.0));
            assert!(values(bn.running_mean.value()).iter().all(|v| *v == 0.5));
            assert!(values(bn.gamma.val()).iter().all(|v| *v == 1.5));
        }
    }

    #[test]
    fn test_load_pretrained_reads_safetensors_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mobilenet_v2.safetensors");
        let source = small();
        std::fs::write(&path, export(&source, KeyLayout::Timm)).unwrap();

        let target = small().load_pretrained(&path, &Default::default()).unwrap();
        assert_eq!(values(target.stem.conv.weight.val()), values(source.stem.conv.weight.val()));
        assert_eq!(
            values(target.last_conv.conv.weight.val()),
            values(source.last_conv.conv.weight.val())
        );
    }

    #[test]
    fn test_import_of_other_width_is_partial() {
        let wide = MobileNetV2Config::new().init::<TestBackend>(&Default::default());
        let weights = ImagenetWeights::from_bytes(&export(&wide, KeyLayout::Torchvision)).unwrap();

        // only the 1280-channel head norm lines up between alpha 1.0 and 0.35
        let (_, report) = small().import_imagenet(&weights, &Default::default()).unwrap();
        assert!(report.copied > 0);
        assert!(report.copied < report.expected);
    }

    #[test]
    fn test_unknown_layout_is_rejected() {
        let bytes: Vec<u8> = [0f32; 16].iter().flat_map(|v| v.to_le_bytes()).collect();
        let serialize = |name: &str| {
            let view = TensorView::new(Dtype::F32, vec![16], &bytes).unwrap();
            safetensors::tensor::serialize(vec![(name.to_string(), view)], &None).unwrap()
        };

        assert!(ImagenetWeights::from_bytes(&serialize("head.weight")).is_err());
        assert!(ImagenetWeights::from_bytes(b"garbage").is_err());

        // recognised layout, but no tensor fits the backbone
        let weights = ImagenetWeights::from_bytes(&serialize("features.0.0.weight")).unwrap();
        assert!(small().import_imagenet(&weights, &Default::default()).is_err());
    }
}
