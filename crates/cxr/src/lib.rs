//! # cxr
//!
//! Chest X-ray classification with Grad-CAM explanations.
//!
//! cxr-rs takes an encoded radiograph and returns:
//!
//! - **Scores**: an independent sigmoid probability for each of a fixed set of findings
//! - **Prediction**: the highest-scoring finding
//! - **Overlay**: the original image blended with a Grad-CAM heatmap of the
//!   regions that drove the prediction
//!
//! Results are cached by content fingerprint, so repeated uploads of the same
//! bytes are answered without another forward/backward pass.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cxr::prelude::*;
//!
//! let device = Default::default();
//! let config = PipelineConfig::load("pipeline.json")?;
//! let pipeline = Pipeline::<CpuBackend>::from_config(config, &device)?;
//!
//! let explanation = pipeline.explain_image(&std::fs::read("chest.png")?)?;
//! for (label, p) in &explanation.probabilities {
//!     println!("{label:<14} {p:.3}");
//! }
//! std::fs::write("chest.gradcam.jpg", &explanation.overlay_image)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `backend-ndarray` (default): CPU backend using ndarray
//! - `backend-wgpu`: GPU backend using WGPU

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Re-export all crates
pub use cxr_core as core;
pub use cxr_explain as explain;
pub use cxr_models as models;
pub use cxr_pipeline as pipeline;
pub use cxr_transforms as transforms;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use cxr::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use cxr_core::{ImageTensor, LabelSet, Result, XaiError, CHEST_XRAY_LABELS};

    #[cfg(feature = "backend-ndarray")]
    pub use cxr_core::backend::CpuBackend;

    // Models
    pub use cxr_models::{save_classifier, Classifier, ClassifierConfig, DenseNetConfig};

    // Explain
    pub use cxr_explain::{Explainer, ImportanceMap};

    // Transforms
    pub use cxr_transforms::{OverlayCompositor, OverlayConfig, OverlayFormat, PreprocessConfig, Preprocessor};

    // Pipeline
    pub use cxr_pipeline::{
        CacheStats, Explanation, ExplanationSummary, Fingerprint, Pipeline, PipelineConfig,
        PipelineStats,
    };
}
