use super::check_equal_shape;
use crate::communicator::Communicator;
use crate::error::Result;

/// Accuracy swept across every distinct prediction value used as a
/// threshold; `f_accuracy` is the best observed accuracy over that sweep.
pub struct Accuracy {
    pub thresholds: Vec<f64>,
    pub accuracy: Vec<f64>,
    pub f_accuracy: f64,
}

impl Accuracy {
    pub fn score(
        predictions: &[f64],
        targets: &[f64],
        _communicator: Option<&Communicator>,
    ) -> Result<Self> {
        check_equal_shape(predictions, targets)?;

        let mut thresholds: Vec<f64> = predictions.to_vec();
        thresholds.sort_by(|a, b| a.partial_cmp(b).unwrap());
        thresholds.dedup();

        let n = predictions.len().max(1) as f64;
        let mut accuracy = Vec::with_capacity(thresholds.len());
        for &threshold in &thresholds {
            let correct = predictions
                .iter()
                .zip(targets)
                .filter(|(&p, &t)| {
                    let predicted_positive = p > threshold;
                    predicted_positive == (t > 0.5)
                })
                .count() as f64;
            accuracy.push(correct / n);
        }

        let f_accuracy = accuracy.iter().copied().fold(f64::MIN, f64::max);
        Ok(Self {
            thresholds,
            accuracy,
            f_accuracy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_separation_yields_full_accuracy() {
        let predictions = vec![0.9, 0.8, 0.2, 0.1];
        let targets = vec![1.0, 1.0, 0.0, 0.0];
        let result = Accuracy::score(&predictions, &targets, None).unwrap();
        assert_eq!(result.f_accuracy, 1.0);
    }

    #[test]
    fn curve_length_matches_distinct_predictions() {
        let predictions = vec![0.1, 0.1, 0.5, 0.9];
        let targets = vec![0.0, 1.0, 1.0, 0.0];
        let result = Accuracy::score(&predictions, &targets, None).unwrap();
        assert_eq!(result.thresholds.len(), 3);
    }
}
