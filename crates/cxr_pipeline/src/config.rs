//! Pipeline configuration.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use cxr_core::{Result, XaiError};
use cxr_models::ClassifierConfig;
use cxr_transforms::{OverlayConfig, PreprocessConfig};
use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_CACHE_CAPACITY;

/// Everything needed to build a [`Pipeline`](crate::Pipeline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Classifier parameter file.
    pub weights: PathBuf,
    /// Classifier architecture and labels.
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// Input preparation.
    #[serde(default)]
    pub preprocess: PreprocessConfig,
    /// Overlay blending and encoding.
    #[serde(default)]
    pub overlay: OverlayConfig,
    /// Number of cached results; 0 disables caching.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

impl PipelineConfig {
    /// Reference configuration for the given weights.
    pub fn new(weights: impl Into<PathBuf>) -> Self {
        Self {
            weights: weights.into(),
            classifier: ClassifierConfig::default(),
            preprocess: PreprocessConfig::default(),
            overlay: OverlayConfig::default(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    /// Set the classifier configuration.
    #[must_use]
    pub fn with_classifier(mut self, classifier: ClassifierConfig) -> Self {
        self.classifier = classifier;
        self
    }

    /// Set the preprocessing configuration.
    #[must_use]
    pub fn with_preprocess(mut self, preprocess: PreprocessConfig) -> Self {
        self.preprocess = preprocess;
        self
    }

    /// Set the overlay configuration.
    #[must_use]
    pub fn with_overlay(mut self, overlay: OverlayConfig) -> Self {
        self.overlay = overlay;
        self
    }

    /// Set the cache capacity.
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        self.classifier.validate()?;

        if self.preprocess.image_size == 0 {
            return Err(XaiError::Configuration("image_size must be positive".to_string()));
        }
        if self.preprocess.std.iter().any(|s| *s <= 0.0 || !s.is_finite()) {
            return Err(XaiError::Configuration(format!(
                "normalization std must be positive, got {:?}",
                self.preprocess.std
            )));
        }
        let weights = [self.overlay.image_weight, self.overlay.heatmap_weight];
        if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            return Err(XaiError::Configuration(format!(
                "overlay weights must be non-negative, got {weights:?}"
            )));
        }
        Ok(())
    }

    /// Load from a JSON file.
    ///
    /// A relative `weights` path is resolved against the config file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            XaiError::Configuration(format!("cannot open {}: {e}", path.display()))
        })?;
        let mut config: Self = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            XaiError::Configuration(format!("invalid config {}: {e}", path.display()))
        })?;

        if config.weights.is_relative() {
            if let Some(dir) = path.parent() {
                config.weights = dir.join(&config.weights);
            }
        }
        Ok(config)
    }

    /// Save as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| {
            XaiError::Configuration(format!("cannot create {}: {e}", path.display()))
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .map_err(|e| XaiError::Configuration(format!("cannot write {}: {e}", path.display())))
    }
}
