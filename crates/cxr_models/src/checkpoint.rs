//! Model checkpointing and serialization utilities.
//!
//! Weights are stored with Burn's named MessagePack recorder (`*.mpk`). Next to
//! the weights a JSON sidecar (`*.json`) records the architecture and the label
//! order the classification head was trained with.
//!
//! # Example
//!
//! ```rust,ignore
//! use cxr_models::checkpoint::{save_model, load_model};
//! use cxr_models::DenseNetConfig;
//!
//! let config = DenseNetConfig::densenet121(5);
//! let model = config.init::<NdArray>(&device);
//!
//! save_model(model, "weights/best_densenet")?;
//! let loaded = load_model(config.init::<NdArray>(&device), "weights/best_densenet", &device)?;
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use burn::module::{Module, ModuleVisitor, ParamId};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use cxr_core::{LabelSet, XaiError};
use serde::{Deserialize, Serialize};

use crate::cnn::{DenseNetConfig, XrayDenseNet, XrayDenseNetRecord};

/// File extension of the weights record.
pub const WEIGHTS_EXTENSION: &str = "mpk";

/// File extension of the metadata sidecar.
pub const METADATA_EXTENSION: &str = "json";

type Recorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Path of the weights record for a checkpoint path (with or without extension).
pub fn weights_path(path: impl AsRef<Path>) -> PathBuf {
    path.as_ref().with_extension(WEIGHTS_EXTENSION)
}

/// Path of the metadata sidecar for a checkpoint path.
pub fn metadata_path(path: impl AsRef<Path>) -> PathBuf {
    path.as_ref().with_extension(METADATA_EXTENSION)
}

/// Save a model's parameters.
pub fn save_model<B, M>(model: M, path: impl AsRef<Path>) -> Result<()>
where
    B: Backend,
    M: Module<B>,
{
    let path = weights_path(path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| CheckpointError::Save(e.to_string()))?;
    }

    model
        .save_file(path, &Recorder::new())
        .map_err(|e| CheckpointError::Save(e.to_string()))
}

/// Load parameters from a checkpoint into an initialized model.
///
/// # Errors
///
/// Returns [`CheckpointError::NotFound`] if the weights file does not exist and
/// [`CheckpointError::Load`] if the record cannot be read.
pub fn load_model<B, M>(model: M, path: impl AsRef<Path>, device: &B::Device) -> Result<M>
where
    B: Backend,
    M: Module<B>,
{
    let path = weights_path(path);
    if !path.is_file() {
        return Err(CheckpointError::NotFound(path));
    }

    model
        .load_file(path, &Recorder::new(), device)
        .map_err(|e| CheckpointError::Load(e.to_string()))
}

/// Load a DenseNet checkpoint, rejecting records built for another architecture.
///
/// Unlike [`load_model`], the record is read on its own first and compared with
/// `config`: block, transition and layer counts, then every parameter shape.
///
/// # Errors
///
/// Returns [`CheckpointError::Mismatch`] if the stored network has a different
/// layout than `config` describes.
pub fn load_densenet<B: Backend>(
    config: &DenseNetConfig,
    path: impl AsRef<Path>,
    device: &B::Device,
) -> Result<XrayDenseNet<B>> {
    let path = weights_path(path);
    if !path.is_file() {
        return Err(CheckpointError::NotFound(path));
    }

    let record = <Recorder as burn::record::Recorder<B>>::load::<XrayDenseNetRecord<B>>(
        &Recorder::new(),
        path,
        device,
    )
    .map_err(|e| CheckpointError::Load(e.to_string()))?;
    check_layout(config, &record)?;

    let model = config.init::<B>(device);
    let expected = parameter_shapes::<B, _>(&model);
    let model = model.load_record(record);
    let found = parameter_shapes::<B, _>(&model);

    if expected.len() != found.len() {
        return Err(CheckpointError::Mismatch(format!(
            "checkpoint has {} parameter tensors, {} expects {}",
            found.len(),
            config.arch_name(),
            expected.len()
        )));
    }
    let first_difference = expected
        .iter()
        .zip(&found)
        .enumerate()
        .find(|(_, (want, got))| want != got);
    if let Some((i, (want, got))) = first_difference {
        return Err(CheckpointError::Mismatch(format!(
            "parameter #{i} has shape {got:?}, {} expects {want:?}",
            config.arch_name()
        )));
    }
    Ok(model)
}

/// Vec-valued submodules must agree in length before the record is applied.
fn check_layout<B: Backend>(
    config: &DenseNetConfig,
    record: &XrayDenseNetRecord<B>,
) -> Result<()> {
    let blocks = &record.features.blocks;
    let transitions = record.features.transitions.len();
    let expected_transitions = config.block_config.len().saturating_sub(1);

    if blocks.len() != config.block_config.len() || transitions != expected_transitions {
        return Err(CheckpointError::Mismatch(format!(
            "checkpoint has {} dense blocks and {} transitions, {} expects {} and {}",
            blocks.len(),
            transitions,
            config.arch_name(),
            config.block_config.len(),
            expected_transitions
        )));
    }
    for (i, (block, &n_layers)) in blocks.iter().zip(&config.block_config).enumerate() {
        if block.layers.len() != n_layers {
            return Err(CheckpointError::Mismatch(format!(
                "dense block {i} has {} layers, {} expects {n_layers}",
                block.layers.len(),
                config.arch_name()
            )));
        }
    }
    Ok(())
}

/// Collects the shape of every float tensor in visiting order.
struct ParamShapes(Vec<Vec<usize>>);

impl<B: Backend> ModuleVisitor<B> for ParamShapes {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        self.0.push(tensor.dims().to_vec());
    }
}

fn parameter_shapes<B: Backend, M: Module<B>>(model: &M) -> Vec<Vec<usize>> {
    let mut shapes = ParamShapes(Vec::new());
    model.visit(&mut shapes);
    shapes.0
}

/// Save a classifier together with its metadata sidecar.
pub fn save_classifier<B: Backend>(
    model: XrayDenseNet<B>,
    config: &DenseNetConfig,
    labels: &LabelSet,
    path: impl AsRef<Path>,
) -> Result<()> {
    let path = path.as_ref();
    if config.n_classes != labels.len() {
        return Err(CheckpointError::Mismatch(format!(
            "config has {} classes but {} labels were given",
            config.n_classes,
            labels.len()
        )));
    }

    save_model(model, path)?;
    CheckpointMetadata::new(config.arch_name())
        .with_config(config)
        .with_labels(labels)
        .save(metadata_path(path))
}

/// Model checkpoint metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Model architecture name.
    pub arch: String,
    /// Model configuration as JSON.
    pub config_json: String,
    /// Label order of the classification head.
    pub labels: Vec<String>,
    /// Additional metadata.
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl CheckpointMetadata {
    /// Create new metadata for a model.
    pub fn new(arch: impl Into<String>) -> Self {
        Self {
            arch: arch.into(),
            config_json: String::new(),
            labels: Vec::new(),
            extra: HashMap::new(),
        }
    }

    /// Set the config JSON.
    #[must_use]
    pub fn with_config<C: Serialize>(mut self, config: &C) -> Self {
        self.config_json = serde_json::to_string(config).unwrap_or_default();
        self
    }

    /// Set the label order.
    #[must_use]
    pub fn with_labels(mut self, labels: &LabelSet) -> Self {
        self.labels = labels.iter().map(str::to_string).collect();
        self
    }

    /// Add extra metadata.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Parse the stored architecture config.
    pub fn config(&self) -> Result<DenseNetConfig> {
        serde_json::from_str(&self.config_json).map_err(|e| CheckpointError::InvalidFormat(e.to_string()))
    }

    /// Check that this checkpoint was produced for the given architecture and labels.
    pub fn verify(&self, config: &DenseNetConfig, labels: &LabelSet) -> Result<()> {
        if self.arch != config.arch_name() {
            return Err(CheckpointError::Mismatch(format!(
                "checkpoint architecture {} does not match configured {}",
                self.arch,
                config.arch_name()
            )));
        }
        let expected: Vec<&str> = labels.iter().collect();
        if self.labels != expected {
            return Err(CheckpointError::Mismatch(format!(
                "checkpoint labels {:?} do not match configured {:?}",
                self.labels, expected
            )));
        }
        Ok(())
    }

    /// Save metadata to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).map_err(|e| CheckpointError::Save(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| CheckpointError::Save(e.to_string()))?;
        Ok(())
    }

    /// Load metadata from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json =
            std::fs::read_to_string(path).map_err(|e| CheckpointError::Load(e.to_string()))?;
        serde_json::from_str(&json).map_err(|e| CheckpointError::InvalidFormat(e.to_string()))
    }
}

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Checkpoint-related errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Error saving checkpoint.
    #[error("Failed to save checkpoint: {0}")]
    Save(String),

    /// Error loading checkpoint.
    #[error("Failed to load checkpoint: {0}")]
    Load(String),

    /// Weights file does not exist.
    #[error("Checkpoint not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Invalid format.
    #[error("Invalid checkpoint format: {0}")]
    InvalidFormat(String),

    /// Checkpoint does not match the configured architecture.
    #[error("Checkpoint mismatch: {0}")]
    Mismatch(String),
}

impl From<CheckpointError> for XaiError {
    fn from(err: CheckpointError) -> Self {
        XaiError::Configuration(err.to_string())
    }
}
