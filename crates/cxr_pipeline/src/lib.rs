//! # cxr_pipeline
//!
//! The cached request path of cxr-rs.
//!
//! This crate provides:
//! - [`Fingerprint`] content keys (SHA-256 of the raw image bytes)
//! - [`ResultCache`], a bounded strict-FIFO result cache
//! - [`PipelineConfig`], loadable from JSON
//! - [`Pipeline`], which decodes, classifies, explains, composites and caches
//!
//! ## Example
//!
//! ```rust,ignore
//! use cxr_core::backend::CpuBackend;
//! use cxr_pipeline::{Pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::load("pipeline.json")?;
//! let pipeline = Pipeline::<CpuBackend>::from_config(config, &Default::default())?;
//!
//! let explanation = pipeline.explain_image(&std::fs::read("chest.png")?)?;
//! println!("{} ({:.2})", explanation.predicted_label, explanation.confidence());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod cache;
mod config;
mod fingerprint;
mod pipeline;

pub use cache::{CacheStats, ResultCache, DEFAULT_CACHE_CAPACITY};
pub use config::PipelineConfig;
pub use fingerprint::Fingerprint;
pub use pipeline::{Explanation, ExplanationSummary, LabelScore, Pipeline, PipelineStats};
