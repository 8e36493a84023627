//! # cxr_models
//!
//! Chest X-ray classifier for cxr-rs.
//!
//! This crate provides:
//! - [`XrayDenseNet`] - DenseNet feature extractor with a sigmoid multi-label head
//! - [`Classifier`] - the frozen, load-once handle the explainer runs against
//! - [`checkpoint`] - weights and metadata persistence

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod classifier;
pub mod cnn;

pub use checkpoint::{
    load_densenet, load_model, save_classifier, save_model, CheckpointError, CheckpointMetadata,
};
pub use classifier::{Classifier, ClassifierConfig, FEATURE_LAYER};
pub use cnn::*;
