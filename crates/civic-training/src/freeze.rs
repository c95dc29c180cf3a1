//! Layer catalogue and trainability plans.
//!
//! The backbone exposes its layers as a flat, ordered list. A
//! [`TrainablePlan`] assigns one flag per entry; the backbone then disables
//! gradients on every parameterised layer whose flag is off.

use serde::{Deserialize, Serialize};

/// Kind of a backbone layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerKind {
    Input,
    Conv2D,
    DepthwiseConv2D,
    BatchNormalization,
    ReLU,
    ZeroPadding2D,
    Add,
}

impl LayerKind {
    /// Whether the layer owns trainable parameters
    pub fn has_parameters(self) -> bool {
        matches!(
            self,
            LayerKind::Conv2D | LayerKind::DepthwiseConv2D | LayerKind::BatchNormalization
        )
    }

    pub fn is_normalization(self) -> bool {
        self == LayerKind::BatchNormalization
    }
}

/// One entry of the layer catalogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    pub kind: LayerKind,
}

impl LayerSpec {
    pub fn new(name: impl Into<String>, kind: LayerKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Per-layer trainable flags, aligned with a layer catalogue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainablePlan {
    flags: Vec<bool>,
}

impl TrainablePlan {
    /// Every layer frozen
    pub fn frozen(num_layers: usize) -> Self {
        Self {
            flags: vec![false; num_layers],
        }
    }

    /// Every layer trainable
    pub fn trainable(num_layers: usize) -> Self {
        Self {
            flags: vec![true; num_layers],
        }
    }

    /// Fine-tuning plan.
    ///
    /// Layers before `num_layers - fine_tune_at` stay frozen, normalization
    /// layers stay frozen everywhere, and everything else becomes trainable.
    /// A `fine_tune_at` larger than the catalogue unfreezes the whole
    /// backbone except its normalization layers.
    pub fn fine_tune(layers: &[LayerSpec], fine_tune_at: usize) -> Self {
        let cutoff = layers.len().saturating_sub(fine_tune_at);
        let flags = layers
            .iter()
            .enumerate()
            .map(|(i, layer)| i >= cutoff && !layer.kind.is_normalization())
            .collect();
        Self { flags }
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn is_trainable(&self, index: usize) -> bool {
        self.flags.get(index).copied().unwrap_or(false)
    }

    pub fn flags(&self) -> &[bool] {
        &self.flags
    }

    /// `(trainable, frozen)` counts over layers that own parameters
    pub fn parameterised_counts(&self, layers: &[LayerSpec]) -> (usize, usize) {
        layers
            .iter()
            .zip(&self.flags)
            .filter(|(layer, _)| layer.kind.has_parameters())
            .fold((0, 0), |(t, f), (_, &on)| if on { (t + 1, f) } else { (t, f + 1) })
    }
}
