//! Enumerates the candidate (aggregation, value-source) pairs a tree
//! fitter probes for one peripheral table.

use crate::aggregation::Aggregation;
use crate::config::Hyperparameters;
use crate::dataframe::DataFrame;
use crate::same_units::{SameUnitKind, SameUnits};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

/// Where a candidate's aggregated value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSource {
    /// `COUNT` has no operand column.
    NotApplicable,
    PeripheralNumerical(String),
    PeripheralDiscrete(String),
    /// A categorical (interned-string) peripheral column, resolved via its
    /// category id rather than `ColumnRef::Discrete`.
    PeripheralCategorical(String),
    SameUnitsNumerical { population: String, peripheral: String },
    SameUnitsDiscrete { population: String, peripheral: String },
    TimeStampDiff,
}

/// One fully-specified candidate: an aggregation applied to a value
/// source, over a named peripheral table.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub peripheral_table: String,
    pub aggregation: Aggregation,
    pub value_source: ValueSource,
}

fn push_aggregation_over(
    out: &mut Vec<Candidate>,
    table: &str,
    agg: Aggregation,
    has_peripheral_ts: bool,
    sources: impl Iterator<Item = ValueSource>,
) {
    if agg.needs_time_stamp() && !has_peripheral_ts {
        return;
    }
    for source in sources {
        out.push(Candidate {
            peripheral_table: table.to_string(),
            aggregation: agg,
            value_source: source,
        });
    }
}

/// Enumerates every candidate for a single peripheral table, before
/// round-robin/share-based down-selection.
pub fn enumerate_candidates(
    peripheral_table: &str,
    peripheral: &DataFrame,
    same_units: &[SameUnits],
    hyperparameters: &Hyperparameters,
) -> Vec<Candidate> {
    let has_peripheral_ts = !peripheral.time_stamps().is_empty();
    let mut out = Vec::new();

    // COUNT: one per peripheral table, not_applicable operand.
    out.push(Candidate {
        peripheral_table: peripheral_table.to_string(),
        aggregation: Aggregation::Count,
        value_source: ValueSource::NotApplicable,
    });

    // COUNT DISTINCT / COUNT - COUNT DISTINCT: per categorical and
    // per discrete peripheral column, plus the time-stamp difference.
    for col in peripheral.categorical() {
        out.push(Candidate {
            peripheral_table: peripheral_table.to_string(),
            aggregation: Aggregation::CountDistinct,
            value_source: ValueSource::PeripheralCategorical(col.name().to_string()),
        });
        out.push(Candidate {
            peripheral_table: peripheral_table.to_string(),
            aggregation: Aggregation::CountMinusCountDistinct,
            value_source: ValueSource::PeripheralCategorical(col.name().to_string()),
        });
    }
    for col in peripheral.discrete() {
        out.push(Candidate {
            peripheral_table: peripheral_table.to_string(),
            aggregation: Aggregation::CountDistinct,
            value_source: ValueSource::PeripheralDiscrete(col.name().to_string()),
        });
        out.push(Candidate {
            peripheral_table: peripheral_table.to_string(),
            aggregation: Aggregation::CountMinusCountDistinct,
            value_source: ValueSource::PeripheralDiscrete(col.name().to_string()),
        });
    }
    if has_peripheral_ts {
        out.push(Candidate {
            peripheral_table: peripheral_table.to_string(),
            aggregation: Aggregation::CountDistinct,
            value_source: ValueSource::TimeStampDiff,
        });
    }

    // All other aggregations over {peripheral numerical, peripheral
    // discrete, same-unit numerical, same-unit discrete}.
    let other_aggregations: Vec<Aggregation> = hyperparameters
        .aggregations
        .iter()
        .copied()
        .filter(|a| {
            !matches!(
                a,
                Aggregation::Count | Aggregation::CountDistinct | Aggregation::CountMinusCountDistinct
            )
        })
        .collect();

    for &agg in &other_aggregations {
        let numerical_sources = peripheral
            .numerical()
            .iter()
            .map(|c| ValueSource::PeripheralNumerical(c.name().to_string()));
        push_aggregation_over(&mut out, peripheral_table, agg, has_peripheral_ts, numerical_sources);

        let discrete_sources = peripheral
            .discrete()
            .iter()
            .map(|c| ValueSource::PeripheralDiscrete(c.name().to_string()));
        push_aggregation_over(&mut out, peripheral_table, agg, has_peripheral_ts, discrete_sources);

        let same_unit_numerical = same_units
            .iter()
            .filter(|su| su.kind == SameUnitKind::Numerical && su.aggregatable)
            .map(|su| ValueSource::SameUnitsNumerical {
                population: su.population_column.clone(),
                peripheral: su.peripheral_column.clone(),
            });
        push_aggregation_over(&mut out, peripheral_table, agg, has_peripheral_ts, same_unit_numerical);

        let same_unit_discrete = same_units
            .iter()
            .filter(|su| su.kind == SameUnitKind::Discrete && su.aggregatable)
            .map(|su| ValueSource::SameUnitsDiscrete {
                population: su.population_column.clone(),
                peripheral: su.peripheral_column.clone(),
            });
        push_aggregation_over(&mut out, peripheral_table, agg, has_peripheral_ts, same_unit_discrete);
    }

    out
}

/// Applies `round_robin`/`share_aggregations` down-selection.
/// `feature_ix` is the caller-supplied index consulted by round-robin
/// mode; it is ignored otherwise.
pub fn select_candidates(
    candidates: Vec<Candidate>,
    hyperparameters: &Hyperparameters,
    feature_ix: Option<usize>,
) -> Vec<Candidate> {
    if candidates.is_empty() {
        return candidates;
    }

    if let (Some(n), Some(feature_ix)) = (hyperparameters.round_robin, feature_ix) {
        if n > 0 {
            let keep = feature_ix % n;
            return candidates.into_iter().skip(keep).step_by(n).collect();
        }
    }

    if let Some(share) = hyperparameters.share_aggregations {
        let survivors = (candidates.len() as f64 * share).floor().max(1.0) as usize;
        // Seeded deterministically so every worker thread, given the same
        // broadcast seed, draws the identical survivor set.
        let mut rng = StdRng::seed_from_u64(hyperparameters.seed);
        let mut indices: Vec<usize> = (0..candidates.len()).collect();
        // Fisher-Yates partial shuffle: only need the first `survivors`
        // positions to be a uniform sample.
        for i in 0..survivors.min(indices.len()) {
            let j = rng.gen_range(i..indices.len());
            indices.swap(i, j);
        }
        indices.truncate(survivors);
        indices.sort_unstable();
        return indices.into_iter().map(|i| candidates[i].clone()).collect();
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{Column, StringColumn};
    use crate::encoding::Encoding;

    fn peripheral_with_ts() -> DataFrame {
        let enc = Encoding::new();
        let mut df = DataFrame::new("perip", enc.clone());
        df.add_join_key(StringColumn::from_strings("jk", &["1".into()], &enc))
            .unwrap();
        df.add_time_stamp(Column::from_vec("ts", vec![1.0])).unwrap();
        df.add_numerical(Column::from_vec("x", vec![1.0])).unwrap();
        df
    }

    #[test]
    fn count_is_always_present() {
        let df = peripheral_with_ts();
        let candidates = enumerate_candidates("perip", &df, &[], &Hyperparameters::default());
        assert!(candidates
            .iter()
            .any(|c| c.aggregation == Aggregation::Count));
    }

    #[test]
    fn first_last_require_peripheral_time_stamp() {
        let enc = Encoding::new();
        let mut df = DataFrame::new("perip", enc.clone());
        df.add_join_key(StringColumn::from_strings("jk", &["1".into()], &enc))
            .unwrap();
        df.add_numerical(Column::from_vec("x", vec![1.0])).unwrap();

        let mut hp = Hyperparameters::default();
        hp.aggregations = vec![Aggregation::First, Aggregation::Last];
        let candidates = enumerate_candidates("perip", &df, &[], &hp);
        assert!(candidates.is_empty());
    }

    #[test]
    fn round_robin_keeps_one_in_n() {
        let df = peripheral_with_ts();
        let mut hp = Hyperparameters::default();
        hp.round_robin = Some(3);
        let all = enumerate_candidates("perip", &df, &[], &hp);
        let selected = select_candidates(all.clone(), &hp, Some(1));
        assert!(selected.len() <= all.len() / 3 + 1);
    }

    #[test]
    fn share_aggregations_is_deterministic_given_seed() {
        let df = peripheral_with_ts();
        let mut hp = Hyperparameters::default();
        hp.share_aggregations = Some(0.5);
        hp.seed = 42;
        let all = enumerate_candidates("perip", &df, &[], &hp);
        let a = select_candidates(all.clone(), &hp, None);
        let b = select_candidates(all, &hp, None);
        assert_eq!(a, b);
    }
}
