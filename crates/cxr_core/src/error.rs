//! Error types for cxr_core.

use thiserror::Error;

/// Result type alias using [`XaiError`].
pub type Result<T> = std::result::Result<T, XaiError>;

/// Errors raised by the inference-and-explanation engine.
///
/// `Decode`, `UnsupportedFormat` and `Inference` are per-request errors that
/// are attributable to one image. `Configuration` is only raised while the
/// engine is being constructed and means it cannot serve requests at all.
#[derive(Error, Debug)]
pub enum XaiError {
    /// The input bytes could not be decoded as an image.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The image decoded but its pixel layout cannot be reduced to RGB.
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// The forward or backward pass could not complete.
    #[error("Inference error: {0}")]
    Inference(String),

    /// The parameter artifact is missing or does not match the architecture.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl XaiError {
    /// Whether the error is scoped to a single request.
    ///
    /// Configuration errors are fatal at startup and never per-request.
    #[must_use]
    pub const fn is_per_request(&self) -> bool {
        !matches!(self, Self::Configuration(_))
    }

    /// Shorthand for an inference error built from any displayable value.
    pub fn inference(err: impl std::fmt::Display) -> Self {
        Self::Inference(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = XaiError::Decode("bad header".to_string());
        assert_eq!(err.to_string(), "Decode error: bad header");

        let err = XaiError::Configuration("missing weights".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing weights");
    }

    #[test]
    fn test_per_request_classification() {
        assert!(XaiError::Decode(String::new()).is_per_request());
        assert!(XaiError::UnsupportedFormat(String::new()).is_per_request());
        assert!(XaiError::inference("oom").is_per_request());
        assert!(!XaiError::Configuration(String::new()).is_per_request());
    }
}
