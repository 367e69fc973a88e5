//! Time-windowed join matching, grounded on
//! `original_source/.../helpers/TableHolder.cpp`.

use crate::dataframe::DataFrame;
use crate::error::{Error, Result};
use crate::schema::JoinSpec;

/// `(ix_output, ix_input, ts_diff)` — a population row matched with a
/// peripheral row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub ix_output: u32,
    pub ix_input: u32,
    pub ts_diff: f64,
}

/// Produces every match between population row `ix_output` and the
/// peripheral data frame, under `join`'s time-window constraints (spec
/// §4.C). Matches are emitted in ascending peripheral-row-index order
///; no heap allocation per row beyond
/// the returned vector.
pub fn find_matches(
    population: &DataFrame,
    ix_output: u32,
    peripheral: &DataFrame,
    join: &JoinSpec,
) -> Result<Vec<Match>> {
    let pop_ts = match &join.population_time_stamp {
        Some(col) => Some(
            match population.get(col)? {
                crate::dataframe::ColumnRef::TimeStamp(c) => c.get(ix_output as usize)?,
                _ => return Err(Error::schema(format!("'{col}' is not a time stamp column"))),
            },
        ),
        None => None,
    };

    let pop_jk = match population.get(&join.population_join_key)? {
        crate::dataframe::ColumnRef::JoinKey(c) => c.id_at(ix_output as usize)?,
        _ => {
            return Err(Error::schema(format!(
                "'{}' is not a join key column",
                join.population_join_key
            )))
        }
    };

    let candidates = peripheral.find_jk(&join.peripheral_join_key, pop_jk)?;

    let mut matches = Vec::with_capacity(candidates.len());
    for &c in candidates {
        let keep = matches_one(population, ix_output, peripheral, c, join, pop_ts)?;
        if let Some(ts_diff) = keep {
            matches.push(Match {
                ix_output,
                ix_input: c,
                ts_diff,
            });
        }
    }
    Ok(matches)
}

/// Evaluates the match predicate for a single candidate peripheral row,
/// returning the `ts_diff` if it survives.
fn matches_one(
    population: &DataFrame,
    ix_output: u32,
    peripheral: &DataFrame,
    ix_input: u32,
    join: &JoinSpec,
    pop_ts: Option<f64>,
) -> Result<Option<f64>> {
    let (perip_ts, pop_ts) = match (&join.peripheral_time_stamp, pop_ts) {
        (Some(col), Some(pop_ts)) => {
            let perip_ts = match peripheral.get(col)? {
                crate::dataframe::ColumnRef::TimeStamp(c) => c.get(ix_input as usize)?,
                _ => return Err(Error::schema(format!("'{col}' is not a time stamp column"))),
            };
            (perip_ts, pop_ts)
        }
        // No time stamps declared on this edge: every join-key match
        // survives with a zero ts_diff.
        _ => return Ok(Some(0.0)),
    };

    if perip_ts > pop_ts {
        return Ok(None);
    }

    if let Some(upper_col) = &join.upper_time_stamp {
        let upper_ts = match peripheral.get(upper_col)? {
            crate::dataframe::ColumnRef::TimeStamp(c) => c.get(ix_input as usize)?,
            _ => return Err(Error::schema(format!("'{upper_col}' is not a time stamp column"))),
        };
        if !upper_ts.is_nan() && !(pop_ts < upper_ts) {
            return Ok(None);
        }
    }

    if !join.allow_lagged_targets && perip_ts == pop_ts {
        return Ok(None);
    }

    Ok(Some(pop_ts - perip_ts))
}

/// Matches every population row against `peripheral` (used by the Candidate
/// Tree Builder / Tree Fitter to build the full match list for a node before
/// partitioning it).
pub fn find_all_matches(
    population: &DataFrame,
    peripheral: &DataFrame,
    join: &JoinSpec,
) -> Result<Vec<Match>> {
    let mut all = Vec::new();
    for ix_output in 0..population.height() as u32 {
        all.extend(find_matches(population, ix_output, peripheral, join)?);
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{Column, StringColumn};
    use crate::dataframe::DataFrame;
    use crate::encoding::Encoding;

    fn build(
        enc: &Encoding,
        name: &str,
        jks: &[&str],
        ts: &[f64],
    ) -> DataFrame {
        let mut df = DataFrame::new(name, enc.clone());
        df.add_join_key(StringColumn::from_strings(
            "jk",
            &jks.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            enc,
        ))
        .unwrap();
        df.add_time_stamp(Column::from_vec("ts", ts.to_vec())).unwrap();
        df
    }

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
    fn scenario_1_sum_over_time_window() {
        // Spec §8 end-to-end scenario 1.
        let enc = Encoding::new();
        let pop = build(&enc, "pop", &["1", "1", "2"], &[10.0, 20.0, 15.0]);
        let perip = build(&enc, "perip", &["1", "1", "1", "1", "2"], &[5.0, 8.0, 12.0, 18.0, 9.0]);
        let mut x = Column::from_vec("x", vec![1.0, 2.0, 4.0, 8.0, 16.0]);
        let _ = &mut x;
        let j = join();

        let sums: Vec<f64> = (0..3u32)
            .map(|ix| {
                let matches = find_matches(&pop, ix, &perip, &j).unwrap();
                matches
                    .iter()
                    .map(|m| x.get(m.ix_input as usize).unwrap())
                    .sum()
            })
            .collect();
        assert_eq!(sums, vec![3.0, 15.0, 16.0]);
    }

    #[test]
    fn scenario_2_count_over_empty_match_set_is_zero() {
        let enc = Encoding::new();
        let pop = build(&enc, "pop", &["9"], &[1.0]);
        let perip = build(&enc, "perip", &["1"], &[1.0]);
        let matches = find_matches(&pop, 0, &perip, &join()).unwrap();
        assert_eq!(matches.len(), 0);
    }

    #[test]
    fn match_validity_invariant() {
        let enc = Encoding::new();
        let pop = build(&enc, "pop", &["1"], &[10.0]);
        let perip = build(&enc, "perip", &["1", "1"], &[5.0, 20.0]);
        let matches = find_matches(&pop, 0, &perip, &join()).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].ix_input, 0);
        assert_eq!(matches[0].ts_diff, 5.0);
    }

    #[test]
    fn allow_lagged_targets_gates_same_timestamp_rows() {
        let enc = Encoding::new();
        let pop = build(&enc, "pop", &["1"], &[10.0]);
        let perip = build(&enc, "perip", &["1"], &[10.0]);
        let strict = find_matches(&pop, 0, &perip, &join()).unwrap();
        assert!(strict.is_empty());

        let mut lagged = join();
        lagged.allow_lagged_targets = true;
        let allowed = find_matches(&pop, 0, &perip, &lagged).unwrap();
        assert_eq!(allowed.len(), 1);
        assert_eq!(allowed[0].ts_diff, 0.0);
    }

    #[test]
    fn upper_time_stamp_gates_horizon() {
        let enc = Encoding::new();
        let pop = build(&enc, "pop", &["1"], &[10.0]);
        let mut perip = DataFrame::new("perip", enc.clone());
        perip
            .add_join_key(StringColumn::from_strings("jk", &["1".into()], &enc))
            .unwrap();
        perip
            .add_time_stamp(Column::from_vec("ts", vec![5.0]))
            .unwrap();
        perip
            .add_time_stamp(Column::from_vec("upper_ts", vec![9.0]))
            .unwrap();

        let mut j = join();
        j.upper_time_stamp = Some("upper_ts".into());
        let matches = find_matches(&pop, 0, &perip, &j).unwrap();
        assert!(matches.is_empty(), "upper_ts=9 < pop.ts=10 must exclude the row");
    }
}
