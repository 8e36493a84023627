//! Image tensor types.

use burn::prelude::*;
use burn::tensor::TensorData;

use crate::error::{Result, XaiError};

/// Input resolution of the reference classifier.
pub const IMAGE_SIZE: usize = 224;

/// Number of colour channels fed to the classifier.
pub const IMAGE_CHANNELS: usize = 3;

/// A normalized image tensor with shape metadata.
///
/// Wraps a Burn tensor and ensures the shape follows the `(1, 3, H, W)`
/// convention expected by the classifier. An `ImageTensor` is built for one
/// inference call and never shared between calls.
///
/// # Example
///
/// ```rust,ignore
/// use cxr_core::ImageTensor;
///
/// let data = vec![0.0f32; 3 * 224 * 224];
/// let tensor = ImageTensor::<NdArray>::from_chw(data, 224, 224, &device)?;
/// ```
#[derive(Debug, Clone)]
pub struct ImageTensor<B: Backend> {
    inner: Tensor<B, 4>,
    height: usize,
    width: usize,
}

impl<B: Backend> ImageTensor<B> {
    /// Create a new ImageTensor from a Burn tensor.
    ///
    /// # Errors
    ///
    /// Returns an inference error if the tensor is not a single 3-channel image.
    pub fn new(tensor: Tensor<B, 4>) -> Result<Self> {
        let [batch, channels, height, width] = tensor.dims();
        if batch != 1 || channels != IMAGE_CHANNELS || height == 0 || width == 0 {
            return Err(XaiError::Inference(format!(
                "expected image tensor of shape [1, {IMAGE_CHANNELS}, H, W], got [{batch}, {channels}, {height}, {width}]"
            )));
        }
        Ok(Self {
            inner: tensor,
            height,
            width,
        })
    }

    /// Create an ImageTensor from channel-major (CHW) values.
    ///
    /// # Errors
    ///
    /// Returns an inference error if `data` does not hold exactly
    /// `3 * height * width` values.
    pub fn from_chw(data: Vec<f32>, height: usize, width: usize, device: &B::Device) -> Result<Self> {
        let expected = IMAGE_CHANNELS * height * width;
        if data.len() != expected {
            return Err(XaiError::Inference(format!(
                "expected {expected} tensor values, got {}",
                data.len()
            )));
        }
        let tensor = Tensor::from_data(
            TensorData::new(data, [1, IMAGE_CHANNELS, height, width]),
            device,
        );
        Self::new(tensor)
    }

    /// Image height in pixels.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Image width in pixels.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Get a reference to the underlying Burn tensor.
    #[must_use]
    pub const fn inner(&self) -> &Tensor<B, 4> {
        &self.inner
    }

    /// Consume self and return the underlying Burn tensor.
    #[must_use]
    pub fn into_inner(self) -> Tensor<B, 4> {
        self.inner
    }

    /// Get the device the tensor is on.
    pub fn device(&self) -> B::Device {
        self.inner.device()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_from_chw_shape() {
        let device = Default::default();
        let data = vec![0.5f32; 3 * 4 * 6];
        let tensor = ImageTensor::<TestBackend>::from_chw(data, 4, 6, &device).unwrap();
        assert_eq!(tensor.height(), 4);
        assert_eq!(tensor.width(), 6);
        assert_eq!(tensor.inner().dims(), [1, 3, 4, 6]);
    }

    #[test]
    fn test_from_chw_rejects_wrong_length() {
        let device = Default::default();
        let result = ImageTensor::<TestBackend>::from_chw(vec![0.0; 10], 4, 4, &device);
        assert!(matches!(result, Err(XaiError::Inference(_))));
    }

    #[test]
    fn test_new_rejects_wrong_channels() {
        let device = Default::default();
        let tensor = Tensor::<TestBackend, 4>::zeros([1, 1, 8, 8], &device);
        assert!(ImageTensor::new(tensor).is_err());
    }
}
