//! Fixed, ordered label sets.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, XaiError};

/// Pathology labels the reference chest X-ray classifier was trained on.
pub const CHEST_XRAY_LABELS: [&str; 5] = [
    "Atelectasis",
    "Effusion",
    "Pneumonia",
    "Cardiomegaly",
    "Nodule",
];

/// An ordered, immutable sequence of class names.
///
/// The index of a label is its class identity: logits, probabilities and the
/// classification head all use the same ordering. Cloning is cheap, the names
/// are shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelSet {
    names: Arc<[String]>,
}

impl LabelSet {
    /// Create a label set.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the set is empty, a name is blank, or a
    /// name appears twice.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(XaiError::Configuration(
                "label set must contain at least one label".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if name.trim().is_empty() {
                return Err(XaiError::Configuration("label names must not be blank".to_string()));
            }
            if !seen.insert(name.as_str()) {
                return Err(XaiError::Configuration(format!("duplicate label: {name}")));
            }
        }

        Ok(Self {
            names: names.into(),
        })
    }

    /// The five-label chest X-ray set.
    #[must_use]
    pub fn chest_xray() -> Self {
        Self {
            names: CHEST_XRAY_LABELS.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false for a constructed label set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Label name at a class index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Class index of a label name.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Iterate over label names in class order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl Default for LabelSet {
    fn default() -> Self {
        Self::chest_xray()
    }
}

impl TryFrom<Vec<String>> for LabelSet {
    type Error = XaiError;

    fn try_from(names: Vec<String>) -> Result<Self> {
        Self::new(names)
    }
}

impl From<LabelSet> for Vec<String> {
    fn from(labels: LabelSet) -> Self {
        labels.names.to_vec()
    }
}
