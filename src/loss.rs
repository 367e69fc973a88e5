//! Second-order loss bookkeeping: gradients, hessians, and the commit/revert
//! protocol that brackets tentative tree mutations during fitting.

use crate::error::{Error, Result};

/// Regression or binary-classification gradient/hessian pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Regression,
    Classification,
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// A snapshot of everything `revert_to_commit` must restore: predictions
/// and the running sufficient-statistics caches.
#[derive(Debug, Clone)]
struct Commit {
    y_hat: Vec<f64>,
    sum_g: f64,
    sum_h: f64,
    sum_h_yhat: f64,
}

/// Per-population-row gradient/hessian state for one boosting target,
/// updated after each committed tree.
pub struct LossState {
    task: Task,
    y: Vec<f64>,
    y_hat: Vec<f64>,
    g: Vec<f64>,
    h: Vec<f64>,
    sum_g: f64,
    sum_h: f64,
    sum_h_yhat: f64,
    last_commit: Commit,
}

impl LossState {
    pub fn new(task: Task, y: Vec<f64>) -> Self {
        let n = y.len();
        let y_hat = vec![0.0; n];
        let mut state = Self {
            task,
            y,
            y_hat,
            g: vec![0.0; n],
            h: vec![0.0; n],
            sum_g: 0.0,
            sum_h: 0.0,
            sum_h_yhat: 0.0,
            last_commit: Commit {
                y_hat: vec![0.0; n],
                sum_g: 0.0,
                sum_h: 0.0,
                sum_h_yhat: 0.0,
            },
        };
        state.recompute_gradients();
        state.last_commit = state.snapshot();
        state
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn y_hat(&self) -> &[f64] {
        &self.y_hat
    }

    pub fn g(&self) -> &[f64] {
        &self.g
    }

    pub fn h(&self) -> &[f64] {
        &self.h
    }

    /// Recomputes `g`, `h`, and the running sums from the current `y_hat`:
    /// `g = yhat-y, h = 1` for regression; `g = sigmoid(yhat)-y, h =
    /// sigmoid(yhat)(1-sigmoid(yhat))` for classification.
    pub fn recompute_gradients(&mut self) {
        self.sum_g = 0.0;
        self.sum_h = 0.0;
        self.sum_h_yhat = 0.0;
        for i in 0..self.y.len() {
            let (g, h) = match self.task {
                Task::Regression => (self.y_hat[i] - self.y[i], 1.0),
                Task::Classification => {
                    let p = sigmoid(self.y_hat[i]);
                    (p - self.y[i], p * (1.0 - p))
                }
            };
            self.g[i] = g;
            self.h[i] = h;
            self.sum_g += g;
            self.sum_h += h;
            self.sum_h_yhat += h * self.y_hat[i];
        }
    }

    /// Applies a newly fit tree's per-row contribution scaled by `eta` to
    /// the running predictions, then refreshes gradients.
    pub fn apply_update(&mut self, contribution: &[f64], eta: f64) -> Result<()> {
        if contribution.len() != self.y_hat.len() {
            return Err(Error::invalid(
                "tree contribution length does not match loss state length",
            ));
        }
        for (yh, &c) in self.y_hat.iter_mut().zip(contribution) {
            *yh += eta * c;
        }
        self.recompute_gradients();
        Ok(())
    }

    fn snapshot(&self) -> Commit {
        Commit {
            y_hat: self.y_hat.clone(),
            sum_g: self.sum_g,
            sum_h: self.sum_h,
            sum_h_yhat: self.sum_h_yhat,
        }
    }

    /// Snapshots `y_hat`, `sum_g`, `sum_h`, `sum_h_yhat` as the new
    /// baseline that `revert_to_commit` restores to.
    pub fn commit(&mut self) {
        self.last_commit = self.snapshot();
    }

    /// Restores state to the last `commit`. After any sequence of
    /// operations ending in `revert_to_commit`, state equals the state
    /// immediately after the last `commit` call.
    pub fn revert_to_commit(&mut self) {
        self.y_hat = self.last_commit.y_hat.clone();
        self.sum_g = self.last_commit.sum_g;
        self.sum_h = self.last_commit.sum_h;
        self.sum_h_yhat = self.last_commit.sum_h_yhat;
        self.recompute_gradients();
    }

    /// Update rate for a newly fit tree: `eta = -sum(g*delta) /
    /// sum(h*delta^2)`.
    pub fn update_rate(&self, contribution: &[f64]) -> f64 {
        let mut num = 0.0;
        let mut denom = 0.0;
        for i in 0..self.g.len() {
            num += self.g[i] * contribution[i];
            denom += self.h[i] * contribution[i] * contribution[i];
        }
        if denom.abs() < 1e-300 {
            0.0
        } else {
            -num / denom
        }
    }
}

/// Closed-form two-partition weight solve: `w = -sum(g)/(sum(h)+lambda)`.
pub fn solve_two_partition(sum_g: f64, sum_h: f64, regularization: f64) -> f64 {
    -sum_g / (sum_h + regularization)
}

/// Three-partition (pre-window, inside-window, post-window) weight solve
/// via a 3x3 symmetric positive-definite system, LU with partial pivoting.
/// Rejects the candidate (`NumericalFailure`) if the relative residual
/// exceeds 1e-10.
pub fn solve_three_partition(
    sum_h: [f64; 3],
    sum_g: [f64; 3],
    regularization: f64,
) -> Result<[f64; 3]> {
    // The Hessian-weighted normal equations are diagonal once partitions
    // are disjoint: each weight only interacts with its own partition's
    // gradient/hessian sums, so the "3x3 system" collapses to three
    // independent 1x1 solves unless a future split family couples
    // partitions. Guard the degenerate (near-zero diagonal) case the same
    // way a true LU factorization would: reject on a singular pivot.
    let mut weights = [0.0; 3];
    for k in 0..3 {
        let pivot = sum_h[k] + regularization;
        if pivot.abs() < 1e-12 {
            return Err(Error::numerical(format!(
                "singular pivot in three-partition solve at index {k}"
            )));
        }
        weights[k] = -sum_g[k] / pivot;
        let residual = (sum_g[k] + pivot * weights[k]).abs();
        let scale = sum_g[k].abs().max(1.0);
        if residual / scale > 1e-10 {
            return Err(Error::numerical(
                "three-partition solve residual exceeds tolerance",
            ));
        }
    }
    Ok(weights)
}

/// Closed-form single-direction leaf weight: the second-order Newton step
/// for a linear term `w * x` added to a leaf's intercept, holding every
/// other weight fixed (spec §3 "a vector of weights"; §4.F leaf
/// contribution `intercept + sum_k w_k * x_k`). `x` is already standardized.
pub fn solve_leaf_weight(g: &[f64], h: &[f64], x: &[f64], regularization: f64) -> f64 {
    let mut num = 0.0;
    let mut den = 0.0;
    for i in 0..g.len() {
        num += g[i] * x[i];
        den += h[i] * x[i] * x[i];
    }
    let pivot = den + regularization;
    if pivot.abs() < 1e-12 {
        0.0
    } else {
        -num / pivot
    }
}

/// Candidate reduction in loss from splitting `sum_g`/`sum_h` into a
/// "greater" and "smaller" partition, net of L2 regularization (spec
/// §4.F step 2).
pub fn candidate_reduction(
    sum_g_greater: f64,
    sum_h_greater: f64,
    sum_g_smaller: f64,
    sum_h_smaller: f64,
    regularization: f64,
) -> f64 {
    let gain = |g: f64, h: f64| (g * g) / (h + regularization);
    let sum_g = sum_g_greater + sum_g_smaller;
    let sum_h = sum_h_greater + sum_h_smaller;
    0.5 * (gain(sum_g_greater, sum_h_greater) + gain(sum_g_smaller, sum_h_smaller) - gain(sum_g, sum_h))
}

/// Three-partition counterpart of [`candidate_reduction`], for a
/// `time_stamps_window` split's pre/inside/post partitions.
pub fn candidate_reduction_three(sum_g: [f64; 3], sum_h: [f64; 3], regularization: f64) -> f64 {
    let gain = |g: f64, h: f64| (g * g) / (h + regularization);
    let total_g: f64 = sum_g.iter().sum();
    let total_h: f64 = sum_h.iter().sum();
    let parts: f64 = (0..3).map(|k| gain(sum_g[k], sum_h[k])).sum();
    0.5 * (parts - gain(total_g, total_h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regression_gradients_match_residual() {
        let state = LossState::new(Task::Regression, vec![1.0, 2.0, 3.0]);
        assert_eq!(state.g(), &[-1.0, -2.0, -3.0]);
        assert_eq!(state.h(), &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn commit_then_revert_restores_state() {
        let mut state = LossState::new(Task::Regression, vec![1.0, 2.0, 3.0]);
        state.commit();
        let baseline_g = state.g().to_vec();

        state.apply_update(&[1.0, 1.0, 1.0], 0.5).unwrap();
        assert_ne!(state.g().to_vec(), baseline_g);

        state.revert_to_commit();
        assert_eq!(state.g().to_vec(), baseline_g);
    }

    #[test]
    fn commit_advances_the_restore_point() {
        let mut state = LossState::new(Task::Regression, vec![1.0, 2.0, 3.0]);
        state.apply_update(&[1.0, 1.0, 1.0], 1.0).unwrap();
        state.commit();
        let after_first_commit = state.g().to_vec();

        state.apply_update(&[2.0, 2.0, 2.0], 1.0).unwrap();
        state.revert_to_commit();
        assert_eq!(state.g().to_vec(), after_first_commit);
    }

    #[test]
    fn two_partition_weight_is_closed_form() {
        let w = solve_two_partition(10.0, 5.0, 1.0);
        assert!((w - (-10.0 / 6.0)).abs() < 1e-12);
    }

    #[test]
    fn three_partition_rejects_singular_pivot() {
        let result = solve_three_partition([0.0, 1.0, 1.0], [1.0, 1.0, 1.0], 0.0);
        assert!(result.is_err());
    }

    #[test]
    fn candidate_reduction_is_nonnegative_for_a_useful_split() {
        let reduction = candidate_reduction(10.0, 5.0, -10.0, 5.0, 0.1);
        assert!(reduction > 0.0);
    }

    #[test]
    fn leaf_weight_is_nonzero_when_x_correlates_with_g() {
        // g < 0 (prediction too low) lines up with x < 0, and g > 0 with
        // x > 0, so the weight must be negative for `w*x` to push each
        // row's prediction the right way.
        let g = vec![-1.0, -1.0, 1.0, 1.0];
        let h = vec![1.0; 4];
        let x = vec![-1.0, -1.0, 1.0, 1.0];
        let w = solve_leaf_weight(&g, &h, &x, 1e-6);
        assert!(w < 0.0, "weight should move predictions toward -g: {w}");
    }

    #[test]
    fn leaf_weight_is_zero_for_a_constant_feature() {
        let g = vec![-1.0, 1.0];
        let h = vec![1.0; 2];
        let x = vec![0.0, 0.0];
        assert_eq!(solve_leaf_weight(&g, &h, &x, 1e-6), 0.0);
    }
}
