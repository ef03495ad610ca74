use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::models::{FeatureVector, StressLabel, FEATURE_COUNT, FEATURE_NAMES};

/// A pre-trained stress classifier. Implementations are read-only once
/// loaded and shared across requests.
pub trait StressClassifier: Send + Sync {
    fn classify(&self, row: &[f64; FEATURE_COUNT]) -> i64;

    fn version(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum ClassifierLoadError {
    #[error("failed to read classifier artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("classifier artifact is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("feature order mismatch at column {index}: expected {expected}, artifact has {found}")]
    FeatureOrder {
        index: usize,
        expected: &'static str,
        found: String,
    },

    #[error("artifact declares {0} features, expected 20")]
    FeatureCount(usize),

    #[error("tree {tree} is invalid: {reason}")]
    InvalidTree { tree: usize, reason: String },

    #[error("artifact contains no trees")]
    Empty,

    #[error("artifact declares no classes")]
    NoClasses,

    #[error("tree {tree} predicts class {class}, which the artifact does not declare")]
    UndeclaredClass { tree: usize, class: i64 },
}

/// Maps a feature vector onto the shared classifier and its label table.
#[derive(Clone)]
pub struct ClassifierAdapter {
    inner: Arc<dyn StressClassifier>,
}

impl ClassifierAdapter {
    pub fn new(inner: Arc<dyn StressClassifier>) -> Self {
        Self { inner }
    }

    pub fn classify(&self, features: &FeatureVector) -> (i64, StressLabel) {
        let class_id = self.inner.classify(&features.to_row());
        (class_id, StressLabel::from_class_id(class_id))
    }

    pub fn version(&self) -> &str {
        self.inner.version()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        class: i64,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct DecisionTree {
    nodes: Vec<TreeNode>,
}

impl DecisionTree {
    fn validate(&self, index: usize, classes: &[i64]) -> Result<(), ClassifierLoadError> {
        let invalid = |reason: String| ClassifierLoadError::InvalidTree {
            tree: index,
            reason,
        };

        if self.nodes.is_empty() {
            return Err(invalid("no nodes".to_string()));
        }

        for (position, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= FEATURE_COUNT {
                        return Err(invalid(format!(
                            "node {position} splits on unknown feature {feature}"
                        )));
                    }
                    // Children must point forward, which also rules out cycles.
                    for child in [*left, *right] {
                        if child <= position || child >= self.nodes.len() {
                            return Err(invalid(format!(
                                "node {position} has out-of-range child {child}"
                            )));
                        }
                    }
                }
                TreeNode::Leaf { class } => {
                    if !classes.contains(class) {
                        return Err(ClassifierLoadError::UndeclaredClass {
                            tree: index,
                            class: *class,
                        });
                    }
                }
            }
        }

        Ok(())
    }

    fn predict(&self, row: &[f64; FEATURE_COUNT]) -> i64 {
        let mut position = 0;
        loop {
            match &self.nodes[position] {
                TreeNode::Leaf { class } => return *class,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    position = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ForestArtifact {
    version: String,
    feature_order: Vec<String>,
    classes: Vec<i64>,
    trees: Vec<DecisionTree>,
}

/// Majority-vote decision forest exported by the offline training job.
#[derive(Debug)]
pub struct ForestClassifier {
    version: String,
    classes: Vec<i64>,
    trees: Vec<DecisionTree>,
}

impl ForestClassifier {
    pub fn load(path: &Path) -> Result<Self, ClassifierLoadError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ClassifierLoadError> {
        let artifact: ForestArtifact = serde_json::from_str(raw)?;

        if artifact.feature_order.len() != FEATURE_COUNT {
            return Err(ClassifierLoadError::FeatureCount(
                artifact.feature_order.len(),
            ));
        }
        for (index, (found, expected)) in artifact
            .feature_order
            .iter()
            .zip(FEATURE_NAMES.iter())
            .enumerate()
        {
            if found != expected {
                return Err(ClassifierLoadError::FeatureOrder {
                    index,
                    expected: *expected,
                    found: found.clone(),
                });
            }
        }

        if artifact.classes.is_empty() {
            return Err(ClassifierLoadError::NoClasses);
        }
        if artifact.trees.is_empty() {
            return Err(ClassifierLoadError::Empty);
        }
        for (index, tree) in artifact.trees.iter().enumerate() {
            tree.validate(index, &artifact.classes)?;
        }

        Ok(Self {
            version: artifact.version,
            classes: artifact.classes,
            trees: artifact.trees,
        })
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    /// Class ids the training job declared, in artifact order.
    pub fn classes(&self) -> &[i64] {
        &self.classes
    }
}

impl StressClassifier for ForestClassifier {
    fn classify(&self, row: &[f64; FEATURE_COUNT]) -> i64 {
        let mut votes: std::collections::BTreeMap<i64, usize> = std::collections::BTreeMap::new();
        for tree in self.trees.iter() {
            *votes.entry(tree.predict(row)).or_insert(0) += 1;
        }

        // BTreeMap iterates ascending, so ties resolve to the lowest class id.
        let mut winner = (0, 0);
        for (class, count) in votes {
            if count > winner.1 {
                winner = (class, count);
            }
        }
        winner.0
    }

    fn version(&self) -> &str {
        &self.version
    }
}
