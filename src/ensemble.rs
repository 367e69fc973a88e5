//! Boosting ensemble: an ordered list of decision trees with one update
//! rate (η) each.

use crate::config::Hyperparameters;
use crate::fitter::fit_round;
use crate::loss::{LossState, Task};
use crate::tree::{DecisionTree, FitInput};
use std::collections::HashMap;

/// One committed tree plus the scalar it was scaled by before joining the
/// ensemble.
#[derive(Debug, Clone)]
pub struct EnsembleMember {
    pub tree: DecisionTree,
    pub update_rate: f64,
}

/// Ordered list of [`EnsembleMember`]s; per-row prediction is the sum of
/// `update_rate * tree_contribution` across members.
#[derive(Debug, Clone, Default)]
pub struct Ensemble {
    members: Vec<EnsembleMember>,
}

impl Ensemble {
    pub fn new() -> Self {
        Self { members: Vec::new() }
    }

    pub fn from_members(members: Vec<EnsembleMember>) -> Self {
        Self { members }
    }

    pub fn members(&self) -> &[EnsembleMember] {
        &self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn predict_row(&self, features: &HashMap<String, f64>) -> f64 {
        self.members
            .iter()
            .map(|m| m.update_rate * m.tree.predict_row(features).unwrap_or(0.0))
            .sum()
    }
}

/// Supplies the per-round feature columns for the tree fitter; callers own
/// the join/aggregation pipeline that produces these from the raw schema.
pub trait FeatureSource {
    fn build_features(&mut self, round: usize) -> Vec<crate::tree::FeatureInput>;
}

/// Runs the boosting loop described in §4.J: recompute g/h, fit a round of
/// trees, compute each one's update rate, append it, and stop early if the
/// validation loss stalls for `early_stopping_rounds`.
pub fn fit_ensemble(
    task: Task,
    y_train: Vec<f64>,
    validation: Option<(&[HashMap<String, f64>], &[f64])>,
    source: &mut dyn FeatureSource,
    hyperparameters: &Hyperparameters,
) -> (Ensemble, LossState) {
    let mut loss_state = LossState::new(task, y_train);
    let mut ensemble = Ensemble::new();
    let mut best_validation_loss = f64::INFINITY;
    let mut rounds_without_improvement = 0usize;

    for round in 0..hyperparameters.num_rounds {
        let features = source.build_features(round);
        if features.is_empty() {
            break;
        }

        let fit_input = FitInput {
            g: loss_state.g().to_vec(),
            h: loss_state.h().to_vec(),
            features,
        };
        let trees = fit_round(&fit_input, hyperparameters);
        if trees.is_empty() {
            break;
        }

        for tree in trees {
            let contribution: Vec<f64> = (0..fit_input.g.len())
                .map(|row| {
                    let mut features = HashMap::new();
                    for f in &fit_input.features {
                        features.insert(f.name.clone(), f.values[row]);
                    }
                    tree.predict_row(&features).unwrap_or(0.0)
                })
                .collect();

            let eta = loss_state.update_rate(&contribution);
            loss_state.apply_update(&contribution, eta).unwrap();
            ensemble.members.push(EnsembleMember {
                tree,
                update_rate: eta,
            });
        }
        loss_state.commit();

        if let Some((rows, targets)) = validation {
            let predictions: Vec<f64> = rows.iter().map(|r| ensemble.predict_row(r)).collect();
            let validation_loss = mean_squared_error(&predictions, targets);
            if validation_loss + 1e-9 < best_validation_loss {
                best_validation_loss = validation_loss;
                rounds_without_improvement = 0;
            } else {
                rounds_without_improvement += 1;
                if rounds_without_improvement >= hyperparameters.early_stopping_rounds {
                    break;
                }
            }
        }
    }

    (ensemble, loss_state)
}

fn mean_squared_error(predictions: &[f64], targets: &[f64]) -> f64 {
    predictions
        .iter()
        .zip(targets)
        .map(|(p, t)| (p - t).powi(2))
        .sum::<f64>()
        / predictions.len().max(1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::split::DataUsed;
    use crate::tree::FeatureInput;

    struct ConstantFeatureSource {
        values: Vec<f64>,
        rounds_emitted: usize,
    }

    impl FeatureSource for ConstantFeatureSource {
        fn build_features(&mut self, _round: usize) -> Vec<FeatureInput> {
            if self.rounds_emitted >= 3 {
                return Vec::new();
            }
            self.rounds_emitted += 1;
            vec![FeatureInput {
                name: "x".into(),
                data_used: DataUsed::NumericalInput,
                column_index: 0,
                values: self.values.clone(),
                is_categorical: false,
                word_ids: None,
            }]
        }
    }

    #[test]
    fn ensemble_reduces_training_loss_over_rounds() {
        let mut hp = Hyperparameters::default();
        hp.num_rounds = 3;
        hp.num_trees = 1;
        hp.max_depth = 2;
        hp.min_num_samples = 1;
        hp.regularization = 1e-6;

        let x = vec![1.0, 2.0, 8.0, 9.0];
        let y = vec![-10.0, -10.0, 10.0, 10.0];
        let mut source = ConstantFeatureSource {
            values: x,
            rounds_emitted: 0,
        };

        let (ensemble, loss_state) = fit_ensemble(Task::Regression, y.clone(), None, &mut source, &hp);
        assert!(!ensemble.is_empty());

        let final_g_magnitude: f64 = loss_state.g().iter().map(|g| g.abs()).sum();
        let initial_g_magnitude: f64 = y.iter().map(|v| v.abs()).sum();
        assert!(final_g_magnitude < initial_g_magnitude);
    }
}
