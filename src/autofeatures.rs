//! Realizes a [`Candidate`] against a concrete match list: turns
//! `(aggregation, value source)` into one `f64` value per population row.
//! This is the bridge between the Candidate Tree Builder's enumeration and
//! the per-row feature columns the Decision Tree / Ensemble fit over.

use crate::aggregation::{Aggregation, SufficientStats};
use crate::candidates::{Candidate, ValueSource};
use crate::dataframe::DataFrame;
use crate::error::Result;
use crate::matchmaker::{find_all_matches, Match};
use crate::same_units::numerical_value;
use crate::schema::JoinSpec;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

fn resolve_value(peripheral: &DataFrame, source: &ValueSource, m: &Match) -> Result<f64> {
    match source {
        ValueSource::NotApplicable => Ok(1.0),
        ValueSource::PeripheralNumerical(col) => {
            numerical_value(peripheral, col, m.ix_input as usize)
        }
        ValueSource::PeripheralDiscrete(col) => {
            let crate::dataframe::ColumnRef::Discrete(c) = peripheral.get(col)? else {
                return Err(crate::error::Error::invalid(format!("'{col}' is not discrete")));
            };
            Ok(c.get(m.ix_input as usize)? as f64)
        }
        ValueSource::PeripheralCategorical(col) => {
            let crate::dataframe::ColumnRef::Categorical(c) = peripheral.get(col)? else {
                return Err(crate::error::Error::invalid(format!("'{col}' is not categorical")));
            };
            Ok(c.id_at(m.ix_input as usize)? as f64)
        }
        ValueSource::SameUnitsNumerical { peripheral: col, .. } => {
            numerical_value(peripheral, col, m.ix_input as usize)
        }
        ValueSource::SameUnitsDiscrete { peripheral: col, .. } => {
            let crate::dataframe::ColumnRef::Discrete(c) = peripheral.get(col)? else {
                return Err(crate::error::Error::invalid(format!("'{col}' is not discrete")));
            };
            Ok(c.get(m.ix_input as usize)? as f64)
        }
        ValueSource::TimeStampDiff => Ok(m.ts_diff),
    }
}

/// How a resolved `f64` encodes "no value" for its originating column kind,
/// so `COUNT DISTINCT` can exclude nulls from the distinct set (spec §8
/// scenario 3) the same way every column kind encodes them on disk.
#[derive(Debug, Clone, Copy, PartialEq)]
enum NullRule {
    Float,
    Discrete,
    Categorical,
    Never,
}

impl NullRule {
    fn is_null(self, v: f64) -> bool {
        match self {
            NullRule::Float => v.is_nan(),
            NullRule::Discrete => (v as i64) == i64::MIN,
            NullRule::Categorical => (v as i64) == crate::encoding::NULL_STRING_ID,
            NullRule::Never => false,
        }
    }
}

fn null_rule(source: &ValueSource) -> NullRule {
    match source {
        ValueSource::PeripheralDiscrete(_) | ValueSource::SameUnitsDiscrete { .. } => NullRule::Discrete,
        ValueSource::PeripheralCategorical(_) => NullRule::Categorical,
        ValueSource::PeripheralNumerical(_) | ValueSource::SameUnitsNumerical { .. } => NullRule::Float,
        ValueSource::NotApplicable | ValueSource::TimeStampDiff => NullRule::Never,
    }
}

/// Aggregates `values` (already grouped under one population row) per
/// `Aggregation`. Covers the aggregations whose semantics reduce to plain
/// sufficient statistics or order statistics; the time-indexed family
/// (`FIRST`/`LAST`/`EWMA`/`TREND`/`TIME_SINCE_*`) additionally consumes
/// `ts_diffs` in the same row order as `values`.
fn reduce_group(aggregation: Aggregation, values: &[f64], ts_diffs: &[f64], nulls: NullRule) -> f64 {
    if values.is_empty() {
        return match aggregation {
            Aggregation::Count | Aggregation::CountDistinct | Aggregation::CountMinusCountDistinct => 0.0,
            _ => f64::NAN,
        };
    }

    let mut stats = SufficientStats::default();
    for &v in values {
        stats.add(v);
    }

    match aggregation {
        Aggregation::Count => values.len() as f64,
        Aggregation::CountDistinct => {
            let distinct: BTreeSet<i64> = values
                .iter()
                .filter(|v| !nulls.is_null(**v))
                .map(|v| v.to_bits() as i64)
                .collect();
            distinct.len() as f64
        }
        Aggregation::CountMinusCountDistinct => {
            let non_null = values.iter().filter(|v| !nulls.is_null(**v)).count();
            let distinct: BTreeSet<i64> = values
                .iter()
                .filter(|v| !nulls.is_null(**v))
                .map(|v| v.to_bits() as i64)
                .collect();
            (non_null - distinct.len()) as f64
        }
        Aggregation::Sum => stats.sum,
        Aggregation::Avg => stats.mean(),
        Aggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        Aggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Aggregation::Stddev => stats.stddev(),
        Aggregation::Var => stats.variance(),
        Aggregation::Skew => stats.skewness(),
        Aggregation::Median => median(values),
        // Smallest peripheral row index among ts-ties is "first", largest
        // is "last" — matches the matchmaker's ascending-row-index
        // determinism guarantee (see DESIGN.md open-question decision 1).
        Aggregation::First => {
            let min_diff = ts_diffs.iter().copied().fold(f64::INFINITY, f64::min);
            values[ts_diffs.iter().position(|&d| d == min_diff).unwrap_or(0)]
        }
        Aggregation::Last => {
            let max_diff = ts_diffs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            values[ts_diffs.iter().position(|&d| d == max_diff).unwrap_or(0)]
        }
        Aggregation::Ewma(half_life) => {
            let decay = std::f64::consts::LN_2 / half_life.seconds();
            let mut weighted_sum = 0.0;
            let mut weight_total = 0.0;
            for (v, d) in values.iter().zip(ts_diffs) {
                let w = (-decay * d.max(0.0)).exp();
                weighted_sum += w * v;
                weight_total += w;
            }
            if weight_total > 0.0 {
                weighted_sum / weight_total
            } else {
                0.0
            }
        }
        Aggregation::NumMin => values.iter().copied().fold(f64::INFINITY, f64::min),
        Aggregation::NumMax => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Aggregation::CountAboveMean => {
            let mean = stats.mean();
            values.iter().filter(|&&v| v > mean).count() as f64
        }
        Aggregation::CountBelowMean => {
            let mean = stats.mean();
            values.iter().filter(|&&v| v < mean).count() as f64
        }
        Aggregation::VariationCoefficient => {
            let mean = stats.mean();
            if mean.abs() > 1e-12 {
                stats.stddev() / mean
            } else {
                f64::NAN
            }
        }
        Aggregation::AvgTimeBetween => {
            if ts_diffs.len() < 2 {
                f64::NAN
            } else {
                let mut sorted = ts_diffs.to_vec();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let span = sorted.last().unwrap() - sorted.first().unwrap();
                span / (sorted.len() - 1) as f64
            }
        }
        Aggregation::Kurtosis => kurtosis(values),
        Aggregation::Mode => mode(values),
        Aggregation::Trend => trend(values, ts_diffs),
        Aggregation::Quantile(q) => quantile(values, q),
        // "First"/"Last" here follow the same min-ts_diff/max-ts_diff
        // convention as Aggregation::First/Last above: among the rows that
        // hit the target extremum, first picks the smallest ts_diff, last
        // the largest.
        Aggregation::TimeSinceFirstMin => {
            let target = values.iter().copied().fold(f64::INFINITY, f64::min);
            time_since(values, ts_diffs, target, true)
        }
        Aggregation::TimeSinceFirstMax => {
            let target = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            time_since(values, ts_diffs, target, true)
        }
        Aggregation::TimeSinceLastMin => {
            let target = values.iter().copied().fold(f64::INFINITY, f64::min);
            time_since(values, ts_diffs, target, false)
        }
        Aggregation::TimeSinceLastMax => {
            let target = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            time_since(values, ts_diffs, target, false)
        }
    }
}

/// `ts_diff` of the row matching `target`, picking the smallest ts_diff
/// among ties when `pick_min_diff` else the largest.
fn time_since(values: &[f64], ts_diffs: &[f64], target: f64, pick_min_diff: bool) -> f64 {
    let mut best: Option<f64> = None;
    for (&v, &d) in values.iter().zip(ts_diffs) {
        if v == target {
            best = Some(match best {
                None => d,
                Some(b) => {
                    if pick_min_diff {
                        b.min(d)
                    } else {
                        b.max(d)
                    }
                }
            });
        }
    }
    best.unwrap_or(f64::NAN)
}

/// Excess kurtosis from the 4th central moment; undefined below 4 points or
/// for a constant series.
fn kurtosis(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if n < 4.0 {
        return f64::NAN;
    }
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    if variance <= 0.0 {
        return 0.0;
    }
    let m4 = values.iter().map(|v| (v - mean).powi(4)).sum::<f64>() / n;
    m4 / (variance * variance) - 3.0
}

/// Most frequent value; ties broken toward the smallest bit pattern by
/// scanning the frequency map in ascending key order.
fn mode(values: &[f64]) -> f64 {
    let mut counts: std::collections::BTreeMap<i64, usize> = std::collections::BTreeMap::new();
    for v in values {
        *counts.entry(v.to_bits() as i64).or_insert(0) += 1;
    }
    let mut best_bits = values[0].to_bits() as i64;
    let mut best_count = 0;
    for (bits, count) in counts {
        if count > best_count {
            best_count = count;
            best_bits = bits;
        }
    }
    f64::from_bits(best_bits as u64)
}

/// Least-squares slope of `values` against elapsed time. `ts_diff` counts
/// backward from the population row, so `-ts_diff` increases forward in
/// time and is the regressor.
fn trend(values: &[f64], ts_diffs: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let t: Vec<f64> = ts_diffs.iter().map(|d| -d).collect();
    let n = values.len() as f64;
    let mean_t = t.iter().sum::<f64>() / n;
    let mean_v = values.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var = 0.0;
    for i in 0..values.len() {
        cov += (t[i] - mean_t) * (values[i] - mean_v);
        var += (t[i] - mean_t).powi(2);
    }
    if var.abs() < 1e-12 {
        0.0
    } else {
        cov / var
    }
}

/// Linear-interpolation quantile (`q` as a whole percentile, e.g. `50` for
/// the median) over the sorted values.
fn quantile(values: &[f64], q: u8) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let p = q as f64 / 100.0;
    let idx = p * (n as f64 - 1.0);
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = idx - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Realizes one candidate into a `population.height()`-length `f64`
/// column, one value per population row.
pub fn realize_candidate(
    population: &DataFrame,
    peripheral: &DataFrame,
    join: &JoinSpec,
    candidate: &Candidate,
) -> Result<Vec<f64>> {
    let matches = find_all_matches(population, peripheral, join)?;
    let mut grouped: FxHashMap<u32, (Vec<f64>, Vec<f64>)> = FxHashMap::default();
    for m in &matches {
        let value = resolve_value(peripheral, &candidate.value_source, m)?;
        let entry = grouped.entry(m.ix_output).or_default();
        entry.0.push(value);
        entry.1.push(m.ts_diff);
    }

    let nulls = null_rule(&candidate.value_source);
    let mut out = Vec::with_capacity(population.height());
    for row in 0..population.height() as u32 {
        let (values, ts_diffs) = grouped.get(&row).map(|(v, t)| (v.as_slice(), t.as_slice())).unwrap_or((&[], &[]));
        out.push(reduce_group(candidate.aggregation, values, ts_diffs, nulls));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{Column, StringColumn};
    use crate::encoding::Encoding;

    fn join() -> JoinSpec {
        JoinSpec {
            population_join_key: "jk".into(),
            peripheral_join_key: "jk".into(),
            population_time_stamp: Some("ts".into()),
            peripheral_time_stamp: Some("ts".into()),
            upper_time_stamp: None,
            allow_lagged_targets: false,
            propositionalization: false,
        }
    }

    #[test]
    fn realizes_sum_over_a_time_window() {
        let enc = Encoding::new();
        let mut pop = DataFrame::new("pop", enc.clone());
        pop.add_join_key(StringColumn::from_strings("jk", &["1".into(), "1".into(), "2".into()], &enc))
            .unwrap();
        pop.add_time_stamp(Column::from_vec("ts", vec![10.0, 20.0, 15.0])).unwrap();

        let mut perip = DataFrame::new("perip", enc.clone());
        perip
            .add_join_key(StringColumn::from_strings(
                "jk",
                &["1".into(), "1".into(), "1".into(), "1".into(), "2".into()],
                &enc,
            ))
            .unwrap();
        perip
            .add_time_stamp(Column::from_vec("ts", vec![5.0, 8.0, 12.0, 18.0, 9.0]))
            .unwrap();
        perip
            .add_numerical(Column::from_vec("x", vec![1.0, 2.0, 4.0, 8.0, 16.0]))
            .unwrap();

        let candidate = Candidate {
            peripheral_table: "perip".into(),
            aggregation: Aggregation::Sum,
            value_source: ValueSource::PeripheralNumerical("x".into()),
        };
        let feature = realize_candidate(&pop, &perip, &join(), &candidate).unwrap();
        assert_eq!(feature, vec![3.0, 15.0, 16.0]);
    }

    #[test]
    fn count_over_empty_match_set_is_zero() {
        let enc = Encoding::new();
        let mut pop = DataFrame::new("pop", enc.clone());
        pop.add_join_key(StringColumn::from_strings("jk", &["9".into()], &enc)).unwrap();
        pop.add_time_stamp(Column::from_vec("ts", vec![1.0])).unwrap();

        let mut perip = DataFrame::new("perip", enc.clone());
        perip
            .add_join_key(StringColumn::from_strings("jk", &["1".into()], &enc))
            .unwrap();
        perip.add_time_stamp(Column::from_vec("ts", vec![1.0])).unwrap();

        let candidate = Candidate {
            peripheral_table: "perip".into(),
            aggregation: Aggregation::Count,
            value_source: ValueSource::NotApplicable,
        };
        let feature = realize_candidate(&pop, &perip, &join(), &candidate).unwrap();
        assert_eq!(feature, vec![0.0]);
    }

    #[test]
    fn count_distinct_excludes_null_categories() {
        // Spec §8 scenario 3: [A,A,B,C,NULL] -> 3 distinct, null excluded.
        let enc = Encoding::new();
        let mut pop = DataFrame::new("pop", enc.clone());
        pop.add_join_key(StringColumn::from_strings("jk", &["1".into()], &enc)).unwrap();

        let mut perip = DataFrame::new("perip", enc.clone());
        perip
            .add_join_key(StringColumn::from_strings(
                "jk",
                &["1".into(), "1".into(), "1".into(), "1".into(), "1".into()],
                &enc,
            ))
            .unwrap();
        perip
            .add_categorical(StringColumn::from_strings(
                "cat",
                &["A".into(), "A".into(), "B".into(), "C".into(), "".into()],
                &enc,
            ))
            .unwrap();

        let candidate = Candidate {
            peripheral_table: "perip".into(),
            aggregation: Aggregation::CountDistinct,
            value_source: ValueSource::PeripheralCategorical("cat".into()),
        };
        let join = JoinSpec {
            population_join_key: "jk".into(),
            peripheral_join_key: "jk".into(),
            population_time_stamp: None,
            peripheral_time_stamp: None,
            upper_time_stamp: None,
            allow_lagged_targets: false,
            propositionalization: false,
        };
        let feature = realize_candidate(&pop, &perip, &join, &candidate).unwrap();
        assert_eq!(feature, vec![3.0]);
    }
}
