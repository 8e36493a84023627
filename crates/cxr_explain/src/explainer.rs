//! Gradient-weighted class activation mapping over a frozen classifier.

use std::time::Instant;

use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::AutodiffBackend;
use cxr_core::{CaptureContext, ImageTensor, LabelSet, Result, XaiError};
use cxr_models::{Classifier, FEATURE_LAYER};
use parking_lot::Mutex;

use crate::attribution::{grad_cam, ImportanceMap};

/// Outcome of one explanation call.
#[derive(Debug, Clone, PartialEq)]
pub struct Explained {
    /// Index of the highest-scoring class (lowest index on ties).
    pub predicted_index: usize,
    /// Independent sigmoid score per class, in label order.
    pub probabilities: Vec<f32>,
    /// Normalized importance at input resolution.
    pub importance: ImportanceMap,
}

/// Runs one forward and one backward pass per call and turns the captured
/// feature-layer activation and gradient into an importance map.
///
/// Burn module parameters are not `Sync`, so the classifier sits behind a
/// mutex. The forward pass, the backward pass and the release of the gradient
/// store happen under the lock; map arithmetic runs after it is released.
#[derive(Debug)]
pub struct Explainer<B: AutodiffBackend> {
    classifier: Mutex<Classifier<B>>,
    labels: LabelSet,
}

impl<B: AutodiffBackend> Explainer<B> {
    /// Create an explainer over a loaded classifier.
    pub fn new(classifier: Classifier<B>) -> Self {
        let labels = classifier.labels().clone();
        Self {
            classifier: Mutex::new(classifier),
            labels,
        }
    }

    /// The classifier's label set.
    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// Classify `input` and explain the top-scoring class.
    ///
    /// # Errors
    ///
    /// Returns [`XaiError::Inference`] if the forward or backward pass fails,
    /// yields non-finite scores, or no gradient reaches the feature layer.
    pub fn explain(&self, input: ImageTensor<B::InnerBackend>) -> Result<Explained> {
        let (height, width) = (input.height(), input.width());
        let start = Instant::now();

        let (predicted_index, probabilities, activation, gradient) = {
            let classifier = self.classifier.lock();
            let mut capture = CaptureContext::<B>::new(FEATURE_LAYER);

            let logits = classifier.forward(input, &mut capture)?;
            let probabilities = sigmoid(logits.clone().inner())
                .into_data()
                .to_vec::<f32>()
                .map_err(|e| XaiError::Inference(format!("{e:?}")))?;

            if probabilities.len() != self.labels.len() {
                return Err(XaiError::Inference(format!(
                    "expected {} scores, got {}",
                    self.labels.len(),
                    probabilities.len()
                )));
            }
            if probabilities.iter().any(|p| !p.is_finite()) {
                return Err(XaiError::Inference("classifier produced non-finite scores".to_string()));
            }

            let predicted_index = argmax(&probabilities);
            let score = logits.slice([0..1, predicted_index..predicted_index + 1]).sum();
            let gradients = score.backward();
            let reached = capture.record_gradient(&gradients);
            drop(gradients);

            if !reached {
                return Err(XaiError::Inference(format!(
                    "no gradient reached {}",
                    capture.layer()
                )));
            }
            let (activation, gradient) = capture.into_maps().ok_or_else(|| {
                XaiError::Inference("capture context is incomplete".to_string())
            })?;

            (predicted_index, probabilities, activation, gradient)
        };

        let importance = grad_cam(activation, gradient)
            .with_target_class(predicted_index)
            .to_importance_map()?
            .upsample_bilinear(height, width)
            .normalize();

        tracing::debug!(
            "Explained class {} ({}) in {:?}",
            predicted_index,
            self.labels.get(predicted_index).unwrap_or("?"),
            start.elapsed()
        );

        Ok(Explained {
            predicted_index,
            probabilities,
            importance,
        })
    }
}

/// Index of the largest value; the first one wins ties.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &value) in values.iter().enumerate().skip(1) {
        if value > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::module::Param;
    use cxr_core::backend::CpuBackend;
    use cxr_models::DenseNetConfig;

    type Inner = <CpuBackend as AutodiffBackend>::InnerBackend;

    fn explainer(zero_head: bool) -> Explainer<CpuBackend> {
        let device = Default::default();
        let config = DenseNetConfig::tiny(5);
        let mut model = config.init::<Inner>(&device);
        if zero_head {
            model.head.fc.weight =
                Param::from_tensor(Tensor::zeros([config.feature_channels(), 5], &device));
        }
        Explainer::new(Classifier::from_model(model, LabelSet::chest_xray()).unwrap())
    }

    fn gradient_image(size: usize) -> ImageTensor<Inner> {
        let device = Default::default();
        let data = (0..3 * size * size)
            .map(|i| ((i % size) as f32 / size as f32) - 0.5)
            .collect();
        ImageTensor::from_chw(data, size, size, &device).unwrap()
    }

    #[test]
    fn test_argmax_first_match() {
        assert_eq!(argmax(&[0.1, 0.9, 0.9, 0.2]), 1);
        assert_eq!(argmax(&[0.5, 0.5]), 0);
        assert_eq!(argmax(&[0.3]), 0);
    }

    #[test]
    fn test_explain_shapes_and_ranges() {
        let explainer = explainer(false);
        let out = explainer.explain(gradient_image(64)).unwrap();

        assert!(out.predicted_index < 5);
        assert_eq!(out.probabilities.len(), 5);
        assert!(out.probabilities.iter().all(|p| (0.0..=1.0).contains(p)));
        assert_eq!(out.predicted_index, argmax(&out.probabilities));

        assert_eq!((out.importance.height(), out.importance.width()), (64, 64));
        let (min, max) = out.importance.min_max();
        assert!(min >= 0.0 && max <= 1.0);
    }

    #[test]
    fn test_explain_is_deterministic() {
        let explainer = explainer(false);
        let a = explainer.explain(gradient_image(64)).unwrap();
        let b = explainer.explain(gradient_image(64)).unwrap();

        assert_eq!(a.predicted_index, b.predicted_index);
        assert_eq!(a.probabilities, b.probabilities);
        for (x, y) in a.importance.values().iter().zip(b.importance.values()) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_zero_head_gives_all_zero_map() {
        // Zero weights: every logit is the bias, every gradient is zero, the
        // raw map is constant and must normalize to zeros rather than NaN.
        let explainer = explainer(true);
        let out = explainer.explain(gradient_image(32)).unwrap();

        assert!(out.importance.values().iter().all(|&v| v == 0.0));
    }
}
