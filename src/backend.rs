//! Backend selection
//!
//! Training runs on CUDA when the `cuda` feature is enabled and falls back to
//! the NdArray CPU backend otherwise.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(not(feature = "cuda"), any(feature = "ndarray", feature = "cpu")))]
pub type DefaultBackend = burn_ndarray::NdArray;

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray"), not(feature = "cpu")))]
compile_error!("Enable either the `cuda` or the `ndarray` feature");

/// Backend used for inference, evaluation and export
pub type InferenceBackend = DefaultBackend;

/// Autodiff backend used for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Device of the selected backend
pub fn default_device() -> <DefaultBackend as Backend>::Device {
    <DefaultBackend as Backend>::Device::default()
}

/// Human-readable backend name for banners and logs
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(all(not(feature = "cuda"), any(feature = "ndarray", feature = "cpu")))]
    {
        "NdArray (CPU)"
    }
}
