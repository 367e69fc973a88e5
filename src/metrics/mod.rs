//! Scoring metrics over prediction/target column pairs.

mod accuracy;
mod auc;
mod regression;

pub use accuracy::Accuracy;
pub use auc::Auc;
pub use regression::{CrossEntropy, Mae, R2, Rmse};

use crate::communicator::Communicator;
use crate::error::{Error, Result};

/// Validates that predictions and targets line up one-to-one before any
/// metric touches them.
pub(crate) fn check_equal_shape(predictions: &[f64], targets: &[f64]) -> Result<()> {
    if predictions.len() != targets.len() {
        return Err(Error::invalid(format!(
            "predictions ({}) and targets ({}) must have equal length",
            predictions.len(),
            targets.len()
        )));
    }
    Ok(())
}

/// Sums a per-row contribution across an optional communicator: with one
/// present, the reduction runs through `all_reduce_sum` to get the same
/// bit-identical-across-workers guarantee every other reduction in this
/// crate relies on; without one, it is a plain sequential sum.
pub(crate) fn reduce_sum(values: &[f64], communicator: Option<&Communicator>) -> f64 {
    match communicator {
        Some(comm) => comm.all_reduce_sum(values.len(), |i| values[i]),
        None => values.iter().sum(),
    }
}
