//! Backend selection.
//!
//! NdArray (CPU) is the default. Enable the `wgpu` or `cuda` feature of this
//! crate to train on a GPU; `cuda` wins when both are on.

use burn::backend::Autodiff;
pub use burn::tensor::backend::Backend;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn::backend::Cuda;

#[cfg(all(feature = "wgpu", not(feature = "cuda")))]
pub type DefaultBackend = burn::backend::Wgpu;

#[cfg(not(any(feature = "wgpu", feature = "cuda")))]
pub type DefaultBackend = burn::backend::NdArray;

/// Backend used for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Backend used for serving
pub type InferenceBackend = DefaultBackend;

/// Default device of the selected backend
pub fn default_device() -> <DefaultBackend as Backend>::Device {
    Default::default()
}

/// Human-readable name of the selected backend
pub fn backend_name() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA (GPU)"
    } else if cfg!(feature = "wgpu") {
        "WGPU (GPU)"
    } else {
        "NdArray (CPU)"
    }
}
