use super::check_equal_shape;
use crate::communicator::Communicator;
use crate::error::Result;

const MAX_CURVE_POINTS: usize = 200;

/// Area under the ROC curve, plus the TPR/FPR curves it was computed
/// from, lift, and precision — all downsampled to at most 200 points for
/// cheap transport/plotting.
pub struct Auc {
    pub auc: f64,
    pub fpr: Vec<f64>,
    pub tpr: Vec<f64>,
    pub lift: Vec<f64>,
    pub precision: Vec<f64>,
}

impl Auc {
    /// `communicator` is accepted for interface symmetry with the other
    /// metrics; the ROC sweep itself is inherently sequential (it walks
    /// predictions in sorted order), so there is nothing to all-reduce
    /// beyond the total positive/negative counts, which this
    /// implementation computes directly.
    pub fn score(
        predictions: &[f64],
        targets: &[f64],
        _communicator: Option<&Communicator>,
    ) -> Result<Self> {
        check_equal_shape(predictions, targets)?;

        let mut rows: Vec<(f64, f64)> = predictions.iter().copied().zip(targets.iter().copied()).collect();
        // Sort descending by score; ties are compressed into one curve
        // point below rather than producing spurious intermediate steps.
        rows.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());

        let total_positive: f64 = targets.iter().filter(|&&t| t > 0.5).count() as f64;
        let total_negative: f64 = targets.len() as f64 - total_positive;

        let mut fpr = vec![0.0];
        let mut tpr = vec![0.0];
        let mut precision = vec![1.0];
        let mut cumulative_tp = 0.0;
        let mut cumulative_fp = 0.0;

        let mut i = 0;
        while i < rows.len() {
            let score = rows[i].0;
            let mut j = i;
            while j < rows.len() && rows[j].0 == score {
                if rows[j].1 > 0.5 {
                    cumulative_tp += 1.0;
                } else {
                    cumulative_fp += 1.0;
                }
                j += 1;
            }
            tpr.push(if total_positive > 0.0 {
                cumulative_tp / total_positive
            } else {
                0.0
            });
            fpr.push(if total_negative > 0.0 {
                cumulative_fp / total_negative
            } else {
                0.0
            });
            let seen = cumulative_tp + cumulative_fp;
            precision.push(if seen > 0.0 { cumulative_tp / seen } else { 1.0 });
            i = j;
        }

        let auc = trapezoidal_area(&fpr, &tpr);
        let lift: Vec<f64> = tpr
            .iter()
            .zip(&fpr)
            .map(|(t, f)| {
                let baseline = (t * total_positive + f * total_negative)
                    / (total_positive + total_negative).max(1.0);
                if baseline > 0.0 {
                    t / baseline
                } else {
                    0.0
                }
            })
            .collect();

        Ok(Self {
            auc,
            fpr: downsample(&fpr),
            tpr: downsample(&tpr),
            lift: downsample(&lift),
            precision: downsample(&precision),
        })
    }
}

fn trapezoidal_area(x: &[f64], y: &[f64]) -> f64 {
    let mut area = 0.0;
    for i in 1..x.len() {
        area += (x[i] - x[i - 1]) * (y[i] + y[i - 1]) / 2.0;
    }
    area
}

fn downsample(curve: &[f64]) -> Vec<f64> {
    if curve.len() <= MAX_CURVE_POINTS {
        return curve.to_vec();
    }
    let step = curve.len() as f64 / MAX_CURVE_POINTS as f64;
    (0..MAX_CURVE_POINTS)
        .map(|i| curve[((i as f64) * step) as usize])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_predictor_has_auc_one() {
        let predictions = vec![0.9, 0.8, 0.2, 0.1];
        let targets = vec![1.0, 1.0, 0.0, 0.0];
        let auc = Auc::score(&predictions, &targets, None).unwrap();
        assert!((auc.auc - 1.0).abs() < 1e-9);
    }

    #[test]
    fn inverse_predictor_has_auc_zero() {
        let predictions = vec![0.1, 0.2, 0.8, 0.9];
        let targets = vec![1.0, 1.0, 0.0, 0.0];
        let auc = Auc::score(&predictions, &targets, None).unwrap();
        assert!((auc.auc - 0.0).abs() < 1e-9);
    }

    #[test]
    fn constant_predictor_has_auc_half() {
        let predictions = vec![0.5, 0.5, 0.5, 0.5];
        let targets = vec![1.0, 0.0, 1.0, 0.0];
        let auc = Auc::score(&predictions, &targets, None).unwrap();
        assert!((auc.auc - 0.5).abs() < 1e-9);
    }

    #[test]
    fn curves_are_capped_at_200_points() {
        let n = 1000;
        let predictions: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let targets: Vec<f64> = (0..n).map(|i| (i % 2) as f64).collect();
        let auc = Auc::score(&predictions, &targets, None).unwrap();
        assert!(auc.tpr.len() <= 200);
        assert!(auc.fpr.len() <= 200);
    }
}
