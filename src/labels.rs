//! Class labels and treatment recommendations.

use std::fmt;
use std::path::Path;

use crate::error::ModelError;

/// Which of the two served detectors a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Fruit,
    Leaf,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::Fruit, ModelKind::Leaf];

    pub fn name(self) -> &'static str {
        match self {
            ModelKind::Fruit => "fruit",
            ModelKind::Leaf => "leaf",
        }
    }

    pub(crate) fn env_prefix(self) -> &'static str {
        match self {
            ModelKind::Fruit => "FRUIT",
            ModelKind::Leaf => "LEAF",
        }
    }

    fn builtin_labels(self) -> &'static [&'static str] {
        match self {
            ModelKind::Fruit => &FRUIT_CLASSES,
            ModelKind::Leaf => &LEAF_CLASSES,
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// Order must match the training folders.
const FRUIT_CLASSES: [&str; 4] = [
    "Apple___Apple_scab",
    "Apple___Black_rot",
    "Apple___Cedar_apple_rust",
    "Apple___healthy",
];

const LEAF_CLASSES: [&str; 4] = [
    "AppleLeaf___Apple_scab",
    "AppleLeaf___Black_rot",
    "AppleLeaf___Cedar_apple_rust",
    "AppleLeaf___healthy",
];

// Indexed by class position, shared by both detectors.
const TREATMENTS: [&str; 4] = [
    "Apple scab: remove and destroy fallen leaves, prune to improve air flow, \
     and apply a captan or myclobutanil fungicide from green tip until petal fall.",
    "Black rot: cut out cankers and mummified fruit, sanitize pruning tools, \
     and spray captan or thiophanate-methyl during bloom and early fruit set.",
    "Cedar apple rust: remove nearby juniper hosts where possible and apply \
     myclobutanil or mancozeb from pink bud through the first cover spray.",
    "Healthy: no treatment needed. Keep monitoring and maintain regular \
     pruning, watering and orchard sanitation.",
];

/// Ordered class names for one model plus the treatment table.
#[derive(Debug, Clone)]
pub struct LabelCatalog {
    labels: Vec<String>,
}

impl LabelCatalog {
    pub fn builtin(kind: ModelKind) -> Self {
        Self {
            labels: kind.builtin_labels().iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn from_labels<I, S>(labels: I) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(ModelError::NoLabels);
        }
        Ok(Self { labels })
    }

    /// One label per line, blank lines skipped.
    pub fn from_class_list(path: &Path) -> Result<Self, ModelError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ModelError::ClassList {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_labels(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty()),
        )
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn treatment(&self, index: usize) -> Option<&'static str> {
        TREATMENTS.get(index).copied()
    }
}

pub fn is_healthy(label: &str) -> bool {
    label.to_lowercase().contains("healthy")
}
