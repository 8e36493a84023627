//! The image-in, explanation-out facade.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use burn::tensor::backend::AutodiffBackend;
use cxr_core::{LabelSet, Result, XaiError};
use cxr_explain::{Explained, Explainer};
use cxr_models::Classifier;
use cxr_transforms::{decode, to_rgb, OverlayCompositor, OverlayFormat, Preprocessor};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheStats, ResultCache};
use crate::config::PipelineConfig;
use crate::fingerprint::Fingerprint;

/// The result of explaining one image.
///
/// Shared as `Arc<Explanation>` between the cache and every caller that asked
/// for the same bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Explanation {
    /// Fingerprint of the input bytes.
    pub fingerprint: Fingerprint,
    /// Label with the highest score.
    pub predicted_label: String,
    /// Independent per-label scores in `[0, 1]`, in label-set order.
    pub probabilities: Vec<(String, f32)>,
    /// Encoded heatmap overlay.
    pub overlay_image: Vec<u8>,
    /// Encoding of `overlay_image`.
    pub overlay_format: OverlayFormat,
}

impl Explanation {
    fn assemble(
        fingerprint: Fingerprint,
        labels: &LabelSet,
        explained: &Explained,
        overlay_image: Vec<u8>,
        overlay_format: OverlayFormat,
    ) -> Result<Self> {
        let predicted_label = labels
            .get(explained.predicted_index)
            .ok_or_else(|| {
                XaiError::Inference(format!(
                    "predicted class {} is outside the label set",
                    explained.predicted_index
                ))
            })?
            .to_string();

        let probabilities = labels
            .iter()
            .zip(&explained.probabilities)
            .map(|(label, &p)| (label.to_string(), p))
            .collect();

        Ok(Self {
            fingerprint,
            predicted_label,
            probabilities,
            overlay_image,
            overlay_format,
        })
    }

    /// Score of one label.
    pub fn probability(&self, label: &str) -> Option<f32> {
        self.probabilities
            .iter()
            .find(|(name, _)| name == label)
            .map(|(_, p)| *p)
    }

    /// Score of the predicted label.
    pub fn confidence(&self) -> f32 {
        self.probability(&self.predicted_label).unwrap_or(0.0)
    }

    /// Serializable summary without the image payload.
    pub fn summary(&self) -> ExplanationSummary {
        ExplanationSummary {
            fingerprint: self.fingerprint.clone(),
            predicted_label: self.predicted_label.clone(),
            confidence: self.confidence(),
            probabilities: self
                .probabilities
                .iter()
                .map(|(label, probability)| LabelScore {
                    label: label.clone(),
                    probability: *probability,
                })
                .collect(),
        }
    }
}

/// One label's score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    /// Label name.
    pub label: String,
    /// Sigmoid score.
    pub probability: f32,
}

/// JSON-friendly view of an [`Explanation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationSummary {
    /// Fingerprint of the input bytes.
    pub fingerprint: Fingerprint,
    /// Label with the highest score.
    pub predicted_label: String,
    /// Score of the predicted label.
    pub confidence: f32,
    /// Scores in label-set order.
    pub probabilities: Vec<LabelScore>,
}

/// Pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Forward/backward passes run.
    pub explanations_computed: u64,
    /// Requests answered from the cache.
    pub cache_hits: u64,
    /// Requests that had to be computed.
    pub cache_misses: u64,
}

#[derive(Debug, Default)]
struct Counters {
    explanations_computed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

/// Turns image bytes into a cached [`Explanation`].
///
/// Built once at startup and shared by reference (or `Arc`) across threads.
pub struct Pipeline<B: AutodiffBackend> {
    explainer: Explainer<B>,
    preprocessor: Preprocessor,
    compositor: OverlayCompositor,
    cache: ResultCache<Explanation>,
    counters: Counters,
    device: B::Device,
}

impl<B: AutodiffBackend> Pipeline<B> {
    /// Load the classifier named by `config.weights` and build the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`XaiError::Configuration`] if the config is invalid or the
    /// parameters cannot be loaded.
    pub fn from_config(config: PipelineConfig, device: &B::Device) -> Result<Self> {
        config.validate()?;
        let classifier = Classifier::load(&config.weights, &config.classifier, device)?;
        Self::new(classifier, config, device)
    }

    /// Build around an already-constructed classifier.
    ///
    /// `config.weights` and `config.classifier` are not consulted.
    pub fn new(classifier: Classifier<B>, config: PipelineConfig, device: &B::Device) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            "Pipeline ready: {} labels, {}px input, cache capacity {}, {:?} overlays",
            classifier.labels().len(),
            config.preprocess.image_size,
            config.cache_capacity,
            config.overlay.format
        );

        Ok(Self {
            explainer: Explainer::new(classifier),
            preprocessor: Preprocessor::from_config(config.preprocess),
            compositor: OverlayCompositor::from_config(config.overlay),
            cache: ResultCache::new(config.cache_capacity),
            counters: Counters::default(),
            device: device.clone(),
        })
    }

    /// Classify and explain an encoded image.
    ///
    /// Identical bytes return the cached result without recomputation. Failed
    /// requests are never cached.
    ///
    /// # Errors
    ///
    /// [`XaiError::Decode`] or [`XaiError::UnsupportedFormat`] for bad input,
    /// [`XaiError::Inference`] if the model or overlay step fails.
    pub fn explain_image(&self, bytes: &[u8]) -> Result<Arc<Explanation>> {
        let fingerprint = Fingerprint::of(bytes);

        if let Some(hit) = self.cache.get(&fingerprint) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Cache hit for {}", fingerprint.short(12));
            return Ok(hit);
        }
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);

        let start = Instant::now();
        let explanation = self.compute(fingerprint.clone(), bytes).inspect_err(|e| {
            tracing::warn!("Explaining {} failed: {}", fingerprint.short(12), e);
        })?;

        tracing::debug!(
            "Explained {} as {} ({:.3}) in {:?}",
            fingerprint.short(12),
            explanation.predicted_label,
            explanation.confidence(),
            start.elapsed()
        );
        Ok(self.cache.put(fingerprint, Arc::new(explanation)))
    }

    fn compute(&self, fingerprint: Fingerprint, bytes: &[u8]) -> Result<Explanation> {
        let rgb = to_rgb(&decode(bytes)?)?;
        let input = self.preprocessor.prepare::<B::InnerBackend>(&rgb, &self.device)?;

        let explained = self.explainer.explain(input)?;
        self.counters
            .explanations_computed
            .fetch_add(1, Ordering::Relaxed);

        let overlay = self.compositor.composite(&rgb, &explained.importance)?;
        Explanation::assemble(
            fingerprint,
            self.explainer.labels(),
            &explained,
            overlay,
            self.compositor.config().format,
        )
    }

    /// The label set, in class-index order.
    pub fn labels(&self) -> &LabelSet {
        self.explainer.labels()
    }

    /// The result cache.
    pub fn cache(&self) -> &ResultCache<Explanation> {
        &self.cache
    }

    /// Cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Pipeline counters.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            explanations_computed: self.counters.explanations_computed.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
        }
    }
}

impl<B: AutodiffBackend> std::fmt::Debug for Pipeline<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("labels", self.labels())
            .field("cache", &self.cache)
            .field("stats", &self.stats())
            .finish()
    }
}
