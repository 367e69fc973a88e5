use super::{check_equal_shape, reduce_sum};
use crate::communicator::Communicator;
use crate::error::Result;

/// Root-mean-squared error.
pub struct Rmse {
    pub value: f64,
}

impl Rmse {
    pub fn score(
        predictions: &[f64],
        targets: &[f64],
        communicator: Option<&Communicator>,
    ) -> Result<Self> {
        check_equal_shape(predictions, targets)?;
        let squared_errors: Vec<f64> = predictions
            .iter()
            .zip(targets)
            .map(|(p, t)| (p - t).powi(2))
            .collect();
        let sum = reduce_sum(&squared_errors, communicator);
        Ok(Self {
            value: (sum / predictions.len().max(1) as f64).sqrt(),
        })
    }
}

/// Mean absolute error.
pub struct Mae {
    pub value: f64,
}

impl Mae {
    pub fn score(
        predictions: &[f64],
        targets: &[f64],
        communicator: Option<&Communicator>,
    ) -> Result<Self> {
        check_equal_shape(predictions, targets)?;
        let absolute_errors: Vec<f64> = predictions
            .iter()
            .zip(targets)
            .map(|(p, t)| (p - t).abs())
            .collect();
        let sum = reduce_sum(&absolute_errors, communicator);
        Ok(Self {
            value: sum / predictions.len().max(1) as f64,
        })
    }
}

/// Coefficient of determination.
pub struct R2 {
    pub value: f64,
}

impl R2 {
    pub fn score(
        predictions: &[f64],
        targets: &[f64],
        communicator: Option<&Communicator>,
    ) -> Result<Self> {
        check_equal_shape(predictions, targets)?;
        let mean = reduce_sum(targets, communicator) / targets.len().max(1) as f64;
        let residual_ss: f64 = reduce_sum(
            &predictions
                .iter()
                .zip(targets)
                .map(|(p, t)| (t - p).powi(2))
                .collect::<Vec<_>>(),
            communicator,
        );
        let total_ss: f64 = reduce_sum(
            &targets.iter().map(|t| (t - mean).powi(2)).collect::<Vec<_>>(),
            communicator,
        );
        let value = if total_ss.abs() < 1e-300 {
            if residual_ss.abs() < 1e-300 {
                1.0
            } else {
                0.0
            }
        } else {
            1.0 - residual_ss / total_ss
        };
        Ok(Self { value })
    }
}

/// Binary cross-entropy. Targets must be in `{0, 1}`; returns `-1.0`
/// ("undefined") if a prediction hits exactly 0 or 1.
pub struct CrossEntropy {
    pub value: f64,
}

impl CrossEntropy {
    pub fn score(
        predictions: &[f64],
        targets: &[f64],
        communicator: Option<&Communicator>,
    ) -> Result<Self> {
        check_equal_shape(predictions, targets)?;
        let mut terms = Vec::with_capacity(predictions.len());
        for (&p, &t) in predictions.iter().zip(targets) {
            if p <= 0.0 || p >= 1.0 {
                return Ok(Self { value: -1.0 });
            }
            terms.push(-(t * p.ln() + (1.0 - t) * (1.0 - p).ln()));
        }
        let sum = reduce_sum(&terms, communicator);
        Ok(Self {
            value: sum / predictions.len().max(1) as f64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rmse_of_perfect_predictions_is_zero() {
        let r = Rmse::score(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0], None).unwrap();
        assert_eq!(r.value, 0.0);
    }

    #[test]
    fn r2_of_perfect_predictions_is_one() {
        let r = R2::score(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0], None).unwrap();
        assert!((r.value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn cross_entropy_returns_undefined_on_saturated_prediction() {
        let r = CrossEntropy::score(&[0.0, 0.5], &[0.0, 1.0], None).unwrap();
        assert_eq!(r.value, -1.0);
    }

    #[test]
    fn cross_entropy_is_finite_for_interior_predictions() {
        let r = CrossEntropy::score(&[0.5, 0.5], &[0.0, 1.0], None).unwrap();
        assert!(r.value.is_finite());
    }
}
