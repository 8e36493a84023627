//! Heatmap overlay compositing.
//!
//! Turns a normalized importance map into a jet-coloured heatmap, blends it
//! over the resized original image and encodes the result.

use cxr_core::{Result, XaiError};
use cxr_explain::ImportanceMap;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::preprocess::resize_rgb;

/// Encoding of the overlay image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayFormat {
    /// Lossy JPEG.
    Jpeg,
    /// Lossless PNG.
    Png,
}

impl OverlayFormat {
    /// Conventional file extension.
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }

    /// MIME type of the encoded bytes.
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

/// Configuration for [`OverlayCompositor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Weight of the original image in the blend.
    pub image_weight: f32,
    /// Weight of the heatmap in the blend.
    pub heatmap_weight: f32,
    /// Output encoding.
    pub format: OverlayFormat,
    /// JPEG quality (1-100), ignored for PNG.
    pub jpeg_quality: u8,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            image_weight: 0.6,
            heatmap_weight: 0.4,
            format: OverlayFormat::Jpeg,
            jpeg_quality: 95,
        }
    }
}

impl OverlayConfig {
    /// Set the output encoding.
    #[must_use]
    pub fn with_format(mut self, format: OverlayFormat) -> Self {
        self.format = format;
        self
    }
}

/// Jet colour ramp: dark blue at 0, through cyan, green and yellow, to dark red at 255.
pub fn jet(level: u8) -> Rgb<u8> {
    let v = f32::from(level) / 255.0;
    let channel = |centre: f32| {
        let intensity = (1.5 - (4.0 * v - centre).abs()).clamp(0.0, 1.0);
        (intensity * 255.0).round() as u8
    };
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

/// Colour an importance map with the jet ramp.
///
/// Values are quantized with `floor(255 * v)` before the lookup.
pub fn heatmap(importance: &ImportanceMap) -> RgbImage {
    let width = importance.width() as u32;
    RgbImage::from_fn(width, importance.height() as u32, |x, y| {
        let value = importance.values()[(y * width + x) as usize];
        jet((255.0 * value.clamp(0.0, 1.0)) as u8)
    })
}

/// Weighted per-channel blend `round(a * wa + b * wb)`, saturated to `u8`.
pub fn blend(base: &RgbImage, overlay: &RgbImage, base_weight: f32, overlay_weight: f32) -> Result<RgbImage> {
    if base.dimensions() != overlay.dimensions() {
        return Err(XaiError::Inference(format!(
            "cannot blend {:?} with {:?}",
            base.dimensions(),
            overlay.dimensions()
        )));
    }

    let mut out = RgbImage::new(base.width(), base.height());
    for ((dst, a), b) in out.pixels_mut().zip(base.pixels()).zip(overlay.pixels()) {
        for c in 0..3 {
            let mixed = f32::from(a[c]) * base_weight + f32::from(b[c]) * overlay_weight;
            dst[c] = mixed.round().clamp(0.0, 255.0) as u8;
        }
    }
    Ok(out)
}

/// Blends an importance map over the original image and encodes it.
#[derive(Debug, Clone, Default)]
pub struct OverlayCompositor {
    config: OverlayConfig,
}

impl OverlayCompositor {
    /// Create a compositor with the reference blend weights and JPEG output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from config.
    #[must_use]
    pub fn from_config(config: OverlayConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// Blend without encoding.
    ///
    /// The original is resized to the (square) importance map resolution.
    pub fn render(&self, original: &RgbImage, importance: &ImportanceMap) -> Result<RgbImage> {
        if importance.height() != importance.width() {
            return Err(XaiError::Inference(format!(
                "importance map must be square, got {}x{}",
                importance.height(),
                importance.width()
            )));
        }
        let base = resize_rgb(original, importance.width() as u32);
        blend(
            &base,
            &heatmap(importance),
            self.config.image_weight,
            self.config.heatmap_weight,
        )
    }

    /// Blend and encode.
    pub fn composite(&self, original: &RgbImage, importance: &ImportanceMap) -> Result<Vec<u8>> {
        let blended = self.render(original, importance)?;
        self.encode(&blended)
    }

    /// Encode an RGB image in the configured format.
    pub fn encode(&self, image: &RgbImage) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        let written = match self.config.format {
            OverlayFormat::Jpeg => image.write_with_encoder(JpegEncoder::new_with_quality(
                &mut bytes,
                self.config.jpeg_quality.clamp(1, 100),
            )),
            OverlayFormat::Png => image.write_with_encoder(PngEncoder::new(&mut bytes)),
        };
        written.map_err(|e| XaiError::Inference(format!("overlay encoding failed: {e}")))?;
        tracing::trace!("Encoded {:?} overlay, {} bytes", self.config.format, bytes.len());
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(jet(0), Rgb([0, 0, 128]));
        assert_eq!(jet(255), Rgb([128, 0, 0]));
        // mid-scale is green dominated
        let mid = jet(128);
        assert!(mid[1] > mid[0] && mid[1] > mid[2]);
    }

    #[test]
    fn test_blend_weights() {
        let base = RgbImage::from_pixel(2, 2, Rgb([100, 200, 0]));
        let overlay = RgbImage::from_pixel(2, 2, Rgb([0, 100, 255]));
        let out = blend(&base, &overlay, 0.6, 0.4).unwrap();
        assert_eq!(out.get_pixel(1, 1), &Rgb([60, 160, 102]));
    }

    #[test]
    fn test_blend_rejects_size_mismatch() {
        let base = RgbImage::new(2, 2);
        let overlay = RgbImage::new(3, 2);
        assert!(blend(&base, &overlay, 0.5, 0.5).is_err());
    }

    #[test]
    fn test_zero_map_is_blue_tinted() {
        let original = RgbImage::from_pixel(50, 30, Rgb([128, 128, 128]));
        let importance = ImportanceMap::zeros(16, 16);
        let out = OverlayCompositor::new().render(&original, &importance).unwrap();

        assert_eq!(out.dimensions(), (16, 16));
        // 0.6 * 128 + 0.4 * (0, 0, 128)
        assert_eq!(out.get_pixel(0, 0), &Rgb([77, 77, 128]));
    }

    #[test]
    fn test_composite_decodes_to_map_resolution() {
        let original = RgbImage::from_pixel(300, 240, Rgb([90, 90, 90]));
        let values = (0..224 * 224).map(|i| (i % 224) as f32 / 223.0).collect();
        let importance = ImportanceMap::new(224, 224, values).unwrap();

        for format in [OverlayFormat::Jpeg, OverlayFormat::Png] {
            let compositor = OverlayCompositor::from_config(OverlayConfig::default().with_format(format));
            let bytes = compositor.composite(&original, &importance).unwrap();
            assert!(!bytes.is_empty());

            let decoded = image::load_from_memory(&bytes).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (224, 224));
        }
    }

    #[test]
    fn test_format_metadata() {
        assert_eq!(OverlayFormat::Jpeg.extension(), "jpg");
        assert_eq!(OverlayFormat::Png.mime_type(), "image/png");
        assert_eq!(serde_json::to_string(&OverlayFormat::Png).unwrap(), "\"png\"");
    }
}
