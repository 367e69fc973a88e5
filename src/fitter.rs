//! Tree Fitter: builds candidates, probes them shallowly, then refits the
//! winners at full depth.

use crate::config::Hyperparameters;
use crate::tree::{fit_tree, DecisionTree, FitInput};

/// The outcome of probing one candidate feature set: its shallow-depth
/// loss value, used only to rank candidates before the refit pass.
struct ProbeResult {
    feature_index: usize,
    probe_loss: f64,
}

fn total_loss(g: &[f64], h: &[f64], regularization: f64) -> f64 {
    let sum_g: f64 = g.iter().sum();
    let sum_h: f64 = h.iter().sum();
    -0.5 * (sum_g * sum_g) / (sum_h + regularization)
}

/// Fits one round's tree(s) for a single loss state.
///
/// 1. The caller has already built `input.features` (the candidate
///    value-source columns for this node, per §4.E).
/// 2. Each feature is probed independently at `max_length_probe` depth and
///    scored by its resulting loss.
/// 3. The top `num_trees` probed features (by loss) above the
///    regularization threshold advance; if `max_depth > max_length_probe`
///    they are refit at full depth, each becoming one tree in the
///    returned list.
pub fn fit_round(input: &FitInput, hyperparameters: &Hyperparameters) -> Vec<DecisionTree> {
    if input.features.is_empty() {
        return Vec::new();
    }

    let mut probe_hp = hyperparameters.clone();
    probe_hp.max_depth = hyperparameters.max_length_probe.max(1);

    let mut probes: Vec<ProbeResult> = input
        .features
        .iter()
        .enumerate()
        .map(|(i, feature)| {
            let single = FitInput {
                g: input.g.clone(),
                h: input.h.clone(),
                features: vec![feature.clone()],
            };
            let tree = fit_tree(&single, &probe_hp);
            let predictions = predict_training_rows(&tree, &single);
            let residual_loss = total_loss(
                &subtract(&input.g, &predictions),
                &input.h,
                hyperparameters.regularization,
            );
            ProbeResult {
                feature_index: i,
                probe_loss: residual_loss,
            }
        })
        .collect();

    probes.sort_by(|a, b| a.probe_loss.partial_cmp(&b.probe_loss).unwrap());
    probes.truncate(hyperparameters.num_trees.max(1));

    let mut trees = Vec::new();
    for probe in probes {
        let feature = input.features[probe.feature_index].clone();
        let refit_input = FitInput {
            g: input.g.clone(),
            h: input.h.clone(),
            features: vec![feature],
        };
        let refit_hp = if hyperparameters.max_depth > hyperparameters.max_length_probe {
            hyperparameters.clone()
        } else {
            probe_hp.clone()
        };
        trees.push(fit_tree(&refit_input, &refit_hp));
    }
    trees
}

fn subtract(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| x - y).collect()
}

fn predict_training_rows(tree: &DecisionTree, input: &FitInput) -> Vec<f64> {
    let n = input.g.len();
    (0..n)
        .map(|row| {
            let mut features = std::collections::HashMap::new();
            for f in &input.features {
                features.insert(f.name.clone(), f.values[row]);
            }
            tree.predict_row(&features).unwrap_or(0.0)
        })
        .collect()
}
