//! Attribution map computation.

use burn::prelude::*;
use cxr_core::{Result, XaiError};
use serde::{Deserialize, Serialize};

/// Low-resolution class activation map from the feature layer.
#[derive(Debug, Clone)]
pub struct AttributionMap<B: Backend> {
    /// The attribution values, shape `(1, 1, H', W')`.
    pub values: Tensor<B, 4>,
    /// Target class the map explains.
    pub target_class: Option<usize>,
}

impl<B: Backend> AttributionMap<B> {
    /// Create a new attribution map.
    pub fn new(values: Tensor<B, 4>) -> Self {
        Self {
            values,
            target_class: None,
        }
    }

    /// Set the target class.
    pub fn with_target_class(mut self, class: usize) -> Self {
        self.target_class = Some(class);
        self
    }

    /// Get the shape of the attribution map.
    pub fn shape(&self) -> [usize; 4] {
        self.values.dims()
    }

    /// Copy the first map of the batch to the host.
    pub fn to_importance_map(&self) -> Result<ImportanceMap> {
        let [_, _, height, width] = self.values.dims();
        let values = self
            .values
            .clone()
            .slice([0..1, 0..1, 0..height, 0..width])
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| XaiError::Inference(format!("{e:?}")))?;
        ImportanceMap::new(height, width, values)
    }
}

/// Compute Grad-CAM for the feature layer of a CNN.
///
/// # Arguments
///
/// * `activations` - Feature-layer output (batch, channels, H, W)
/// * `gradients` - Gradient of the target score w.r.t. `activations`
///
/// # Returns
///
/// Rectified attribution map of shape (batch, 1, H, W).
pub fn grad_cam<B: Backend>(activations: Tensor<B, 4>, gradients: Tensor<B, 4>) -> AttributionMap<B> {
    // Global average pool the gradients: (batch, channels, H, W) -> (batch, channels, 1, 1)
    let weights = gradients.mean_dim(3).mean_dim(2);

    // Weighted sum over channels: -> (batch, 1, H, W)
    let cam = (activations * weights).sum_dim(1);

    // ReLU
    AttributionMap::new(cam.clamp_min(0.0))
}

/// A single-channel spatial importance map, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportanceMap {
    height: usize,
    width: usize,
    values: Vec<f32>,
}

impl ImportanceMap {
    /// Create a map from row-major values.
    ///
    /// # Errors
    ///
    /// Returns an inference error if the value count does not match the shape.
    pub fn new(height: usize, width: usize, values: Vec<f32>) -> Result<Self> {
        if height == 0 || width == 0 || values.len() != height * width {
            return Err(XaiError::Inference(format!(
                "importance map of {height}x{width} cannot hold {} values",
                values.len()
            )));
        }
        Ok(Self {
            height,
            width,
            values,
        })
    }

    /// A map of zeros.
    pub fn zeros(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            values: vec![0.0; height * width],
        }
    }

    /// Map height.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Map width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Row-major values.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Value at row `y`, column `x`.
    pub fn get(&self, y: usize, x: usize) -> Option<f32> {
        (y < self.height && x < self.width).then(|| self.values[y * self.width + x])
    }

    /// Smallest and largest value.
    pub fn min_max(&self) -> (f32, f32) {
        self.values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }

    /// Resize with bilinear interpolation using half-pixel centres.
    ///
    /// Corners are not pinned (`align_corners = false`): output pixel `d` samples
    /// source coordinate `(d + 0.5) * in / out - 0.5`, clamped at the low edge.
    /// An empty map has nothing to sample and resizes to zeros.
    pub fn upsample_bilinear(&self, out_height: usize, out_width: usize) -> Self {
        if self.values.is_empty() {
            return Self::zeros(out_height, out_width);
        }
        let rows = source_taps(self.height, out_height);
        let cols = source_taps(self.width, out_width);

        let mut values = Vec::with_capacity(out_height * out_width);
        for &(y0, y1, ly) in &rows {
            for &(x0, x1, lx) in &cols {
                let top = self.values[y0 * self.width + x0] * (1.0 - lx)
                    + self.values[y0 * self.width + x1] * lx;
                let bottom = self.values[y1 * self.width + x0] * (1.0 - lx)
                    + self.values[y1 * self.width + x1] * lx;
                values.push(top * (1.0 - ly) + bottom * ly);
            }
        }

        Self {
            height: out_height,
            width: out_width,
            values,
        }
    }

    /// Min-max normalize to `[0, 1]`.
    ///
    /// A spatially constant map has no range to stretch and becomes all zeros.
    pub fn normalize(mut self) -> Self {
        let (min, max) = self.min_max();
        let range = max - min;

        if range > 0.0 && range.is_finite() {
            for value in &mut self.values {
                *value = (*value - min) / range;
            }
        } else {
            self.values.fill(0.0);
        }
        self
    }
}

/// For each output index: (lower source index, upper source index, upper weight).
fn source_taps(in_len: usize, out_len: usize) -> Vec<(usize, usize, f32)> {
    if in_len == 0 {
        return vec![(0, 0, 0.0); out_len];
    }
    let scale = in_len as f32 / out_len as f32;
    (0..out_len)
        .map(|d| {
            let src = ((d as f32 + 0.5) * scale - 0.5).max(0.0);
            let lo = (src.floor() as usize).min(in_len - 1);
            let hi = (lo + 1).min(in_len - 1);
            (lo, hi, src - lo as f32)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxr_core::backend::NdArray;

    type TestBackend = NdArray;

    fn tensor(data: Vec<f32>, shape: [usize; 4]) -> Tensor<TestBackend, 4> {
        let device = Default::default();
        Tensor::from_data(burn::tensor::TensorData::new(data, shape), &device)
    }

    #[test]
    fn test_grad_cam_weights_channels_by_mean_gradient() {
        // channel 0 constant, channel 1 ramps; only channel 1 has a positive mean gradient
        let activations = tensor(vec![1.0, 1.0, 1.0, 1.0, 0.5, 1.0, 1.5, 2.0], [1, 2, 2, 2]);
        let gradients = tensor(vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.4], [1, 2, 2, 2]);

        let cam = grad_cam(activations, gradients).with_target_class(1);
        assert_eq!(cam.shape(), [1, 1, 2, 2]);
        assert_eq!(cam.target_class, Some(1));

        let map = cam.to_importance_map().unwrap();
        let expected = [0.05, 0.1, 0.15, 0.2];
        for (value, expected) in map.values().iter().zip(expected) {
            assert!((value - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_grad_cam_rectifies_negative_evidence() {
        let activations = tensor(vec![1.0, 2.0, 3.0, 4.0], [1, 1, 2, 2]);
        let gradients = tensor(vec![-1.0; 4], [1, 1, 2, 2]);

        let map = grad_cam(activations, gradients).to_importance_map().unwrap();
        assert!(map.values().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_normalize_spans_unit_interval() {
        let map = ImportanceMap::new(2, 2, vec![2.0, 4.0, 6.0, 10.0]).unwrap().normalize();
        assert_eq!(map.values(), &[0.0, 0.25, 0.5, 1.0]);
    }

    #[test]
    fn test_normalize_constant_map_is_zero() {
        let map = ImportanceMap::new(3, 3, vec![0.7; 9]).unwrap().normalize();
        assert!(map.values().iter().all(|&v| v == 0.0));

        let map = ImportanceMap::zeros(2, 2).normalize();
        assert!(map.values().iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_upsample_matches_half_pixel_convention() {
        // 1x2 -> 1x4 with align_corners=false gives [a, .75a+.25b, .25a+.75b, b]
        let map = ImportanceMap::new(1, 2, vec![0.0, 1.0]).unwrap();
        let up = map.upsample_bilinear(1, 4);
        let expected = [0.0, 0.25, 0.75, 1.0];
        for (value, expected) in up.values().iter().zip(expected) {
            assert!((value - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_upsample_shape_and_constant_preservation() {
        let map = ImportanceMap::new(7, 7, vec![0.3; 49]).unwrap();
        let up = map.upsample_bilinear(224, 224);
        assert_eq!((up.height(), up.width()), (224, 224));
        assert!(up.values().iter().all(|v| (v - 0.3).abs() < 1e-6));
    }

    #[test]
    fn test_upsample_of_empty_map_is_zeros() {
        let up = ImportanceMap::zeros(0, 5).upsample_bilinear(4, 6);
        assert_eq!((up.height(), up.width()), (4, 6));
        assert!(up.values().iter().all(|v| *v == 0.0));

        let up = ImportanceMap::zeros(3, 0).upsample_bilinear(2, 2).normalize();
        assert_eq!(up.values(), &[0.0; 4]);
        assert!(ImportanceMap::zeros(2, 2).upsample_bilinear(0, 3).values().is_empty());
    }

    #[test]
    fn test_importance_map_rejects_bad_shape() {
        assert!(ImportanceMap::new(2, 2, vec![0.0; 3]).is_err());
        assert!(ImportanceMap::new(0, 2, vec![]).is_err());
        assert_eq!(ImportanceMap::zeros(2, 3).get(1, 2), Some(0.0));
        assert_eq!(ImportanceMap::zeros(2, 3).get(2, 0), None);
    }

    #[test]
    fn test_importance_map_serde() {
        let map = ImportanceMap::new(1, 2, vec![0.0, 1.0]).unwrap();
        let json = serde_json::to_string(&map).unwrap();
        let decoded: ImportanceMap = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, map);
    }
}
