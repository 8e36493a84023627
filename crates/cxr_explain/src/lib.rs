//! # cxr_explain
//!
//! Explainability for cxr-rs: Grad-CAM over the classifier's last convolutional block.
//!
//! This crate provides:
//! - [`grad_cam`] attribution from captured activations and gradients
//! - [`ImportanceMap`] upsampling and normalization
//! - [`Explainer`], which runs the forward/backward pass and produces the map

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod attribution;
mod explainer;

pub use attribution::{grad_cam, AttributionMap, ImportanceMap};
pub use explainer::{argmax, Explained, Explainer};
