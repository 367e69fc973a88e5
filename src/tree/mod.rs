//! Arena-based decision tree: nodes are indexed by [`NodeId`] instead of
//! owning their children through shared pointers, so a tree is cheap to
//! move/clone and has no cyclic ownership to unwind.

mod fit;

pub use fit::{fit_tree, FeatureInput, FitInput};

use crate::error::{Error, Result};
use crate::split::Split;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// One node in the arena: a binary interior split, a ternary
/// `time_stamps_window` interior split (pre/inside/post), or a leaf
/// carrying the fitted linear weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    Interior {
        split: Split,
        greater: NodeId,
        smaller: NodeId,
    },
    /// A `time_stamps_window` split routes to one of three children via
    /// `Split::test_window` instead of a single boolean test.
    Interior3 {
        split: Split,
        pre_window: NodeId,
        in_window: NodeId,
        post_window: NodeId,
    },
    Leaf {
        intercept: f64,
        /// Ordered (discrete_output, numerical_output, discrete_input,
        /// numerical_input, subfeatures) to match the weight-vector
        /// convention.
        weights: Vec<(String, f64)>,
    },
}

/// Per-column standardization captured at fit time: raw feature values are
/// standardized before weighting and the leaf contribution is rescaled
/// back to raw units on transform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Standardization {
    pub mean: f64,
    pub stddev: f64,
}

impl Standardization {
    pub fn fit(values: &[f64]) -> Self {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return Self {
                mean: 0.0,
                stddev: 1.0,
            };
        }
        let mean = finite.iter().sum::<f64>() / finite.len() as f64;
        let var = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / finite.len() as f64;
        let stddev = var.sqrt();
        Self {
            mean,
            stddev: if stddev > 1e-12 { stddev } else { 1.0 },
        }
    }

    pub fn standardize(&self, value: f64) -> f64 {
        (value - self.mean) / self.stddev
    }
}

/// Root node plus the arena backing it. Subfeatures are themselves
/// `DecisionTree`s over a subtable, boxed one level deeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    root: NodeId,
    standardization: std::collections::HashMap<String, Standardization>,
}

impl DecisionTree {
    pub(crate) fn from_arena(
        nodes: Vec<Node>,
        root: NodeId,
        standardization: std::collections::HashMap<String, Standardization>,
    ) -> Self {
        Self {
            nodes,
            root,
            standardization,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Walks the tree for a single row's feature values, returning the
    /// leaf's raw-units contribution: `intercept + sum_k w_k * x_k`, with
    /// `x_k` standardized at fit time and the final sum rescaled back to
    /// raw units.
    pub fn predict_row(&self, features: &std::collections::HashMap<String, f64>) -> Result<f64> {
        let mut current = self.root;
        loop {
            match self.node(current) {
                Node::Interior {
                    split,
                    greater,
                    smaller,
                } => {
                    let goes_greater = self.route(split, features)?;
                    current = if goes_greater { *greater } else { *smaller };
                }
                Node::Interior3 {
                    split,
                    pre_window,
                    in_window,
                    post_window,
                } => {
                    let value = *features.get(&split.feature_name).ok_or_else(|| {
                        Error::invalid(format!(
                            "missing feature '{}' for split routing",
                            split.feature_name
                        ))
                    })?;
                    current = match split.test_window(value) {
                        Some(-1) => *pre_window,
                        Some(1) => *post_window,
                        _ => *in_window,
                    };
                }
                Node::Leaf { intercept, weights } => {
                    let mut total = *intercept;
                    for (name, w) in weights {
                        let raw = *features.get(name).unwrap_or(&0.0);
                        let standardized = self
                            .standardization
                            .get(name)
                            .map(|s| s.standardize(raw))
                            .unwrap_or(raw);
                        total += w * standardized;
                    }
                    return Ok(total);
                }
            }
        }
    }

    fn route(&self, split: &Split, features: &std::collections::HashMap<String, f64>) -> Result<bool> {
        use crate::split::DataUsed::*;
        let value = *features.get(&split.feature_name).ok_or_else(|| {
            Error::invalid(format!(
                "missing feature '{}' for split routing",
                split.feature_name
            ))
        })?;
        match split.data_used {
            DiscreteInputIsNan | DiscreteOutputIsNan => Ok(split.test_is_nan(value.is_nan())),
            CategoricalInput | CategoricalOutput | SameUnitsCategorical | SameUnitsCategoricalTs => {
                Ok(split.test_category(value as i64).unwrap_or(false))
            }
            TimeStampsWindow => Ok(matches!(split.test_window(value), Some(1))),
            _ => Ok(split.test_threshold(value).unwrap_or(false)),
        }
    }

    pub fn predict_batch(
        &self,
        rows: &[std::collections::HashMap<String, f64>],
    ) -> Result<Vec<f64>> {
        rows.iter().map(|r| self.predict_row(r)).collect()
    }
}
