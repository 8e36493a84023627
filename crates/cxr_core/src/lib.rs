//! # cxr_core
//!
//! Core types for cxr-rs chest X-ray classification and explanation.
//!
//! This crate provides:
//! - [`XaiError`] taxonomy shared by every stage of the pipeline
//! - [`LabelSet`] for the fixed, ordered class names
//! - [`ImageTensor`] wrapper for Burn tensors with shape validation
//! - [`CaptureContext`] for per-call activation/gradient capture
//! - Backend type aliases
//!
//! ## Shape Convention
//!
//! Image tensors follow the convention `(1, C, H, W)`:
//! - `1`: a single image per inference call
//! - `C`: colour channels (always 3, RGB)
//! - `H`, `W`: spatial resolution (224 for the reference classifier)

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod capture;
mod error;
mod labels;
mod tensor;

pub use capture::CaptureContext;
pub use error::{Result, XaiError};
pub use labels::{LabelSet, CHEST_XRAY_LABELS};
pub use tensor::{ImageTensor, IMAGE_CHANNELS, IMAGE_SIZE};

/// Backend type aliases for convenience
pub mod backend {
    #[cfg(any(feature = "backend-ndarray", feature = "backend-wgpu"))]
    pub use burn_autodiff::Autodiff;

    #[cfg(feature = "backend-ndarray")]
    pub use burn_ndarray::NdArray;

    #[cfg(feature = "backend-wgpu")]
    pub use burn_wgpu::Wgpu;

    /// Autodiff-enabled CPU backend used for explanations.
    #[cfg(feature = "backend-ndarray")]
    pub type CpuBackend = Autodiff<NdArray>;
}
