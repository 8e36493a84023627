//! # cxr_transforms
//!
//! Image transforms on either side of the classifier.
//!
//! This crate provides:
//! - [`Preprocessor`]: decode, convert to RGB, resize and normalize into an [`ImageTensor`](cxr_core::ImageTensor)
//! - [`OverlayCompositor`]: colour an importance map, blend it over the original and encode it
//!
//! ## Example
//!
//! ```rust,ignore
//! use cxr_transforms::{decode, to_rgb, OverlayCompositor, Preprocessor};
//!
//! let rgb = to_rgb(&decode(&bytes)?)?;
//! let input = Preprocessor::new().prepare::<Inner>(&rgb, &device)?;
//! let explained = explainer.explain(input)?;
//! let jpeg = OverlayCompositor::new().composite(&rgb, &explained.importance)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod overlay;
mod preprocess;

pub use overlay::{blend, heatmap, jet, OverlayCompositor, OverlayConfig, OverlayFormat};
pub use preprocess::{
    decode, resize_rgb, to_rgb, PreprocessConfig, Preprocessor, IMAGENET_MEAN, IMAGENET_STD,
    RESIZE_FILTER,
};
