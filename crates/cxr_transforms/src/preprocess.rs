//! Image decoding and classifier input preparation.
//!
//! The order of operations matches the pipeline the classifier was trained
//! with: resize to the input resolution, scale to `[0, 1]`, then normalize each
//! channel with the ImageNet statistics.

use burn::prelude::*;
use cxr_core::{ImageTensor, Result, XaiError, IMAGE_SIZE};
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, GenericImageView, RgbImage};
use serde::{Deserialize, Serialize};

/// ImageNet channel means (RGB).
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet channel standard deviations (RGB).
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Resampling filter shared by preprocessing and overlay compositing.
///
/// Triangle is an antialiased bilinear filter and deterministic.
pub const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// Configuration for [`Preprocessor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Side of the square classifier input.
    pub image_size: u32,
    /// Per-channel mean subtracted after scaling to `[0, 1]`.
    pub mean: [f32; 3],
    /// Per-channel standard deviation divided after mean subtraction.
    pub std: [f32; 3],
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            image_size: IMAGE_SIZE as u32,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }
}

/// Decode image bytes.
///
/// # Errors
///
/// Returns [`XaiError::Decode`] for empty or undecodable input.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(XaiError::Decode("empty input".to_string()));
    }
    image::load_from_memory(bytes).map_err(|e| XaiError::Decode(e.to_string()))
}

/// Force a decoded image to 8-bit RGB.
///
/// Grayscale, alpha and 16-bit/float layouts are converted; alpha is dropped.
///
/// # Errors
///
/// Returns [`XaiError::UnsupportedFormat`] if the image has no pixels or a
/// colour layout that cannot be reduced to RGB.
pub fn to_rgb(image: &DynamicImage) -> Result<RgbImage> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(XaiError::UnsupportedFormat(format!(
            "image has zero area ({width}x{height})"
        )));
    }

    match image.color() {
        ColorType::L8
        | ColorType::La8
        | ColorType::Rgb8
        | ColorType::Rgba8
        | ColorType::L16
        | ColorType::La16
        | ColorType::Rgb16
        | ColorType::Rgba16
        | ColorType::Rgb32F
        | ColorType::Rgba32F => Ok(image.to_rgb8()),
        other => Err(XaiError::UnsupportedFormat(format!(
            "cannot convert {other:?} to RGB"
        ))),
    }
}

/// Resize to `size`x`size` with [`RESIZE_FILTER`].
pub fn resize_rgb(image: &RgbImage, size: u32) -> RgbImage {
    if image.dimensions() == (size, size) {
        return image.clone();
    }
    image::imageops::resize(image, size, size, RESIZE_FILTER)
}

/// Deterministic image -> normalized tensor transform.
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    /// Create a preprocessor with the reference configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from config.
    #[must_use]
    pub fn from_config(config: PreprocessConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Side of the square output.
    pub fn image_size(&self) -> u32 {
        self.config.image_size
    }

    /// Normalized channel-major values for an RGB image.
    pub fn normalize(&self, image: &RgbImage) -> Vec<f32> {
        let resized = resize_rgb(image, self.config.image_size);
        let plane = resized.width() as usize * resized.height() as usize;
        let mut data = vec![0.0f32; 3 * plane];

        for (i, pixel) in resized.pixels().enumerate() {
            for c in 0..3 {
                let scaled = f32::from(pixel[c]) / 255.0;
                data[c * plane + i] = (scaled - self.config.mean[c]) / self.config.std[c];
            }
        }
        data
    }

    /// Turn an RGB image into the classifier input tensor.
    pub fn prepare<B: Backend>(&self, image: &RgbImage, device: &B::Device) -> Result<ImageTensor<B>> {
        let size = self.config.image_size as usize;
        ImageTensor::from_chw(self.normalize(image), size, size, device)
    }

    /// Decode, convert and prepare in one step.
    pub fn prepare_bytes<B: Backend>(&self, bytes: &[u8], device: &B::Device) -> Result<ImageTensor<B>> {
        let rgb = to_rgb(&decode(bytes)?)?;
        self.prepare(&rgb, device)
    }
}
