//! Per-call activation and gradient capture.

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

/// Activation and gradient captured at the instrumented feature layer.
///
/// A capture context is created by the caller for exactly one inference call
/// and handed to the classifier's forward pass, which records the feature-layer
/// output as a gradient-tracked leaf. After the backward pass the caller asks
/// the context to pull the gradient flowing into that leaf. Nothing is shared
/// between contexts, so concurrent calls cannot observe each other's tensors.
#[derive(Debug)]
pub struct CaptureContext<B: AutodiffBackend> {
    layer: &'static str,
    activation: Option<Tensor<B, 4>>,
    gradient: Option<Tensor<B::InnerBackend, 4>>,
}

impl<B: AutodiffBackend> CaptureContext<B> {
    /// Create an empty capture context for the named layer.
    pub fn new(layer: &'static str) -> Self {
        Self {
            layer,
            activation: None,
            gradient: None,
        }
    }

    /// Name of the instrumented layer.
    #[must_use]
    pub const fn layer(&self) -> &'static str {
        self.layer
    }

    /// Store the layer output produced by the forward pass.
    ///
    /// A later forward call through the same context replaces the activation
    /// and drops any gradient captured for the previous one.
    pub fn record_activation(&mut self, activation: Tensor<B, 4>) {
        self.activation = Some(activation);
        self.gradient = None;
    }

    /// Pull the gradient of the stored activation out of a backward pass.
    ///
    /// Returns `true` if a gradient reached the activation.
    pub fn record_gradient(&mut self, gradients: &B::Gradients) -> bool {
        self.gradient = self
            .activation
            .as_ref()
            .and_then(|activation| activation.grad(gradients));
        self.gradient.is_some()
    }

    /// The captured activation, if a forward pass ran.
    #[must_use]
    pub fn activation(&self) -> Option<&Tensor<B, 4>> {
        self.activation.as_ref()
    }

    /// The captured gradient, if a backward pass reached the activation.
    #[must_use]
    pub fn gradient(&self) -> Option<&Tensor<B::InnerBackend, 4>> {
        self.gradient.as_ref()
    }

    /// Consume the context, returning detached activation and gradient.
    ///
    /// Returns `None` unless both a forward and a backward pass were captured.
    pub fn into_maps(self) -> Option<(Tensor<B::InnerBackend, 4>, Tensor<B::InnerBackend, 4>)> {
        match (self.activation, self.gradient) {
            (Some(activation), Some(gradient)) => Some((activation.inner(), gradient)),
            _ => None,
        }
    }

    /// Clear stored tensors.
    pub fn clear(&mut self) {
        self.activation = None;
        self.gradient = None;
    }
}
