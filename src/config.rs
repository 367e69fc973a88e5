//! Hyperparameters and engine-wide configuration.
//!
//! R reference in the teacher was `Calibration::load` (JSON in, struct out);
//! here the same shape carries the fitter's knobs instead of percentile
//! scaling parameters.

use crate::aggregation::Aggregation;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Every knob the Candidate Tree Builder, Decision Tree fitter, Tree Fitter
/// and Boosting Ensemble consult.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// Aggregations eligible for candidate generation.
    pub aggregations: Vec<Aggregation>,
    /// Uniform survival sampling rate in (0, 1], or disabled entirely.
    pub share_aggregations: Option<f64>,
    /// When set, only the candidate at `feature_ix mod N` survives.
    pub round_robin: Option<usize>,
    /// Multiplier applied to the `ceil(sqrt(N))` default bin count.
    pub grid_factor: f64,
    /// Maximum recursion depth for a full (non-probe) fit.
    pub max_depth: usize,
    /// Minimum matches required to keep recursing into a node.
    pub min_num_samples: usize,
    /// L2 regularization strength (lambda) and the minimum reduction to split on.
    pub regularization: f64,
    /// Shallow depth used during the probing pass.
    pub max_length_probe: usize,
    /// How many probed candidates advance to the refit pass.
    pub num_trees: usize,
    /// Outer boosting rounds.
    pub num_rounds: usize,
    /// Consecutive non-improving rounds before the ensemble stops early.
    pub early_stopping_rounds: usize,
    /// Maximum category-set size allowed when merging categorical bins.
    pub allow_sets: usize,
    /// Minimum match count a category or word id needs to keep its
    /// mapping entry (spec §4.M).
    pub min_document_frequency: usize,
    /// RNG seed, broadcast from rank 0 to all workers.
    pub seed: u64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            aggregations: Aggregation::default_set(),
            share_aggregations: None,
            round_robin: None,
            grid_factor: 1.0,
            max_depth: 4,
            min_num_samples: 30,
            regularization: 1e-3,
            max_length_probe: 1,
            num_trees: 10,
            num_rounds: 50,
            early_stopping_rounds: 5,
            allow_sets: 1,
            min_document_frequency: 1,
            seed: 0,
        }
    }
}

impl Hyperparameters {
    pub fn validate(&self) -> Result<()> {
        if let Some(s) = self.share_aggregations {
            if !(s > 0.0 && s <= 1.0) {
                return Err(Error::invalid(format!(
                    "share_aggregations must be in (0, 1], got {s}"
                )));
            }
        }
        if self.grid_factor <= 0.0 {
            return Err(Error::invalid("grid_factor must be positive"));
        }
        if self.max_length_probe > self.max_depth {
            return Err(Error::invalid(
                "max_length_probe cannot exceed max_depth",
            ));
        }
        if self.regularization < 0.0 {
            return Err(Error::invalid("regularization must be non-negative"));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let params: Self = serde_json::from_slice(&bytes)?;
        params.validate()?;
        Ok(params)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

/// Bundles hyperparameters with resource-scoping knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub hyperparameters: Hyperparameters,
    /// Bytes by which a memory-mapped pool grows when it must extend.
    pub mmap_growth_increment: usize,
    /// Worker count for the join-on-scope task pool (0 = rayon default).
    pub num_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hyperparameters: Hyperparameters::default(),
            mmap_growth_increment: 1 << 20,
            num_workers: 0,
        }
    }
}
