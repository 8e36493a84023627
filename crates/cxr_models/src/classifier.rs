//! Frozen chest X-ray classifier.

use std::path::Path;

use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::AutodiffBackend;
use cxr_core::{CaptureContext, ImageTensor, LabelSet, Result, XaiError};
use serde::{Deserialize, Serialize};

use crate::checkpoint::{self, CheckpointMetadata};
use crate::cnn::{DenseNetConfig, XrayDenseNet};

/// Name of the instrumented layer: the output of the last convolutional block.
pub const FEATURE_LAYER: &str = "features.norm5";

/// Architecture and label order of a classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Feature extractor and head configuration.
    pub arch: DenseNetConfig,
    /// Ordered class names; `arch.n_classes` must equal `labels.len()`.
    pub labels: LabelSet,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        let labels = LabelSet::chest_xray();
        Self {
            arch: DenseNetConfig::densenet121(labels.len()),
            labels,
        }
    }
}

impl ClassifierConfig {
    /// Create a config, sizing the head to the label set.
    pub fn new(arch: DenseNetConfig, labels: LabelSet) -> Self {
        Self {
            arch: arch.with_n_classes(labels.len()),
            labels,
        }
    }

    /// Reject configurations whose head width disagrees with the label set.
    pub fn validate(&self) -> Result<()> {
        if self.arch.n_classes != self.labels.len() {
            return Err(XaiError::Configuration(format!(
                "classification head has {} outputs but {} labels are configured",
                self.arch.n_classes,
                self.labels.len()
            )));
        }
        if self.arch.block_config.is_empty() {
            return Err(XaiError::Configuration(
                "architecture needs at least one dense block".to_string(),
            ));
        }
        Ok(())
    }
}

/// A frozen image-to-logits function over a fixed label set.
///
/// Parameters live on the inner (non-autodiff) backend so BatchNorm always uses
/// its running statistics. Only the head is replayed on the autodiff backend
/// `B`, starting from the captured feature-layer output, which is all the
/// explainer needs to differentiate.
#[derive(Debug)]
pub struct Classifier<B: AutodiffBackend> {
    model: XrayDenseNet<B::InnerBackend>,
    labels: LabelSet,
}

impl<B: AutodiffBackend> Classifier<B> {
    /// Load a classifier from a persisted parameter file.
    ///
    /// # Errors
    ///
    /// Returns [`XaiError::Configuration`] if the config is inconsistent, the
    /// file is missing or unreadable, the metadata sidecar disagrees with the
    /// config, the stored network's layout or parameter shapes differ from
    /// `config.arch`, or the head does not have exactly one output per label.
    pub fn load(path: impl AsRef<Path>, config: &ClassifierConfig, device: &B::Device) -> Result<Self> {
        let path = path.as_ref();
        config.validate()?;

        let sidecar = checkpoint::metadata_path(path);
        if sidecar.is_file() {
            CheckpointMetadata::load(&sidecar)?.verify(&config.arch, &config.labels)?;
        } else {
            tracing::debug!("No checkpoint metadata at {}", sidecar.display());
        }

        let model = checkpoint::load_densenet::<B::InnerBackend>(&config.arch, path, device)?;

        let classifier = Self::from_model(model, config.labels.clone())?;
        tracing::info!(
            "Loaded classifier {} from {} ({} classes)",
            config.arch.arch_name(),
            checkpoint::weights_path(path).display(),
            classifier.labels.len()
        );
        Ok(classifier)
    }

    /// Wrap an already-initialized model.
    ///
    /// # Errors
    ///
    /// Returns [`XaiError::Configuration`] if the head width differs from the
    /// number of labels.
    pub fn from_model(model: XrayDenseNet<B::InnerBackend>, labels: LabelSet) -> Result<Self> {
        let n_outputs = model.head.n_classes();
        if n_outputs != labels.len() {
            return Err(XaiError::Configuration(format!(
                "classification head has {} outputs but {} labels are configured",
                n_outputs,
                labels.len()
            )));
        }
        Ok(Self { model, labels })
    }

    /// The label set, in class-index order.
    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// The underlying model.
    pub fn model(&self) -> &XrayDenseNet<B::InnerBackend> {
        &self.model
    }

    /// Forward pass returning tracked logits of shape `(1, n_classes)`.
    ///
    /// The feature-layer output is recorded in `capture` as a gradient-tracked
    /// leaf, so a backward pass from any logit yields its gradient.
    pub fn forward(
        &self,
        input: ImageTensor<B::InnerBackend>,
        capture: &mut CaptureContext<B>,
    ) -> Result<Tensor<B, 2>> {
        let features = self.model.features.forward(input.into_inner());
        let [_, channels, _, _] = features.dims();
        if channels != self.model.head.in_features() {
            return Err(XaiError::Inference(format!(
                "feature layer produced {} channels, head expects {}",
                channels,
                self.model.head.in_features()
            )));
        }

        let activation = Tensor::<B, 4>::from_inner(features).require_grad();
        capture.record_activation(activation.clone());
        Ok(self.model.head.forward_tracked(activation))
    }

    /// Independent per-class sigmoid scores, without gradient tracking.
    pub fn predict(&self, input: ImageTensor<B::InnerBackend>) -> Result<Vec<f32>> {
        let logits = self.model.forward(input.into_inner());
        sigmoid(logits)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| XaiError::Inference(format!("{e:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::save_classifier;
    use crate::cnn::ClassifierHead;
    use cxr_core::backend::CpuBackend;

    type Inner = <CpuBackend as AutodiffBackend>::InnerBackend;

    fn tiny_config() -> ClassifierConfig {
        ClassifierConfig::new(DenseNetConfig::tiny(5), LabelSet::chest_xray())
    }

    fn input(value: f32) -> ImageTensor<Inner> {
        let device = Default::default();
        ImageTensor::from_chw(vec![value; 3 * 64 * 64], 64, 64, &device).unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(ClassifierConfig::default().validate().is_ok());
        let bad = ClassifierConfig {
            arch: DenseNetConfig::tiny(3),
            labels: LabelSet::chest_xray(),
        };
        assert!(matches!(bad.validate(), Err(XaiError::Configuration(_))));
    }

    #[test]
    fn test_from_model_rejects_head_mismatch() {
        let device = Default::default();
        let model = DenseNetConfig::tiny(4).init::<Inner>(&device);
        let result = Classifier::<CpuBackend>::from_model(model, LabelSet::chest_xray());
        assert!(matches!(result, Err(XaiError::Configuration(_))));
    }

    #[test]
    fn test_load_missing_weights_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let result = Classifier::<CpuBackend>::load(dir.path().join("missing"), &tiny_config(), &device);
        assert!(matches!(result, Err(XaiError::Configuration(_))));
    }

    #[test]
    fn test_load_rejects_sidecar_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights");
        let device = Default::default();

        let labels = LabelSet::new(["a", "b", "c", "d", "e"]).unwrap();
        let arch = DenseNetConfig::tiny(5);
        save_classifier(arch.init::<Inner>(&device), &arch, &labels, &path).unwrap();

        let result = Classifier::<CpuBackend>::load(&path, &tiny_config(), &device);
        assert!(matches!(result, Err(XaiError::Configuration(_))));
    }

    #[test]
    fn test_load_rejects_weights_for_another_architecture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights");
        let device = Default::default();
        let config = tiny_config();
        save_classifier(config.arch.init::<Inner>(&device), &config.arch, &config.labels, &path)
            .unwrap();
        std::fs::remove_file(checkpoint::metadata_path(&path)).unwrap();

        let deeper = ClassifierConfig::new(DenseNetConfig::densenet121(5), LabelSet::chest_xray());
        let result = Classifier::<CpuBackend>::load(&path, &deeper, &device);
        assert!(matches!(result, Err(XaiError::Configuration(_))));

        let mut wider = tiny_config();
        wider.arch.growth_rate = 8;
        let result = Classifier::<CpuBackend>::load(&path, &wider, &device);
        assert!(matches!(result, Err(XaiError::Configuration(_))));

        assert!(Classifier::<CpuBackend>::load(&path, &config, &device).is_ok());
    }

    #[test]
    fn test_forward_rejects_head_of_other_width() {
        let device = Default::default();
        let mut model = DenseNetConfig::tiny(5).init::<Inner>(&device);
        model.head = ClassifierHead::new(7, 5, &device);
        let classifier = Classifier::<CpuBackend>::from_model(model, LabelSet::chest_xray()).unwrap();

        let mut capture = CaptureContext::new(FEATURE_LAYER);
        let result = classifier.forward(input(0.1), &mut capture);
        assert!(matches!(result, Err(XaiError::Inference(_))));
    }

    #[test]
    fn test_load_and_forward() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights");
        let device = Default::default();
        let config = tiny_config();
        save_classifier(config.arch.init::<Inner>(&device), &config.arch, &config.labels, &path)
            .unwrap();

        let classifier = Classifier::<CpuBackend>::load(&path, &config, &device).unwrap();
        let mut capture = CaptureContext::new(FEATURE_LAYER);
        let logits = classifier.forward(input(0.25), &mut capture).unwrap();

        assert_eq!(logits.dims(), [1, 5]);
        assert_eq!(capture.activation().unwrap().dims(), [1, 16, 8, 8]);
    }

    #[test]
    fn test_forward_is_deterministic() {
        let device = Default::default();
        let model = DenseNetConfig::tiny(5).init::<Inner>(&device);
        let classifier = Classifier::<CpuBackend>::from_model(model, LabelSet::chest_xray()).unwrap();

        let run = || {
            let mut capture = CaptureContext::new(FEATURE_LAYER);
            classifier
                .forward(input(0.5), &mut capture)
                .unwrap()
                .inner()
                .into_data()
                .to_vec::<f32>()
                .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_predict_matches_tracked_forward() {
        let device = Default::default();
        let model = DenseNetConfig::tiny(5).init::<Inner>(&device);
        let classifier = Classifier::<CpuBackend>::from_model(model, LabelSet::chest_xray()).unwrap();

        let probs = classifier.predict(input(-0.3)).unwrap();
        let mut capture = CaptureContext::new(FEATURE_LAYER);
        let logits = classifier
            .forward(input(-0.3), &mut capture)
            .unwrap()
            .inner()
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        assert_eq!(probs.len(), 5);
        for (p, l) in probs.iter().zip(&logits) {
            assert!((p - 1.0 / (1.0 + (-l).exp())).abs() < 1e-5);
        }
    }
}
