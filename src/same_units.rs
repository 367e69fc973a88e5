//! Cross-table same-unit column pairs.

use crate::dataframe::{ColumnRef, DataFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameUnitKind {
    Numerical,
    Discrete,
    Categorical,
}

/// A discovered (population column, peripheral column) pair sharing a
/// non-empty unit string.
#[derive(Debug, Clone)]
pub struct SameUnits {
    pub population_column: String,
    pub peripheral_column: String,
    pub kind: SameUnitKind,
    /// Tagged `_ts` when the shared unit is a time-stamp unit, so the SQL
    /// generator renders a datetime-safe diff instead of a bare subtraction
    ///.
    pub is_time_stamp_unit: bool,
    /// Excluded from being aggregated (but still eligible as a condition
    /// term) when the unit contains "comparison only".
    pub aggregatable: bool,
}

const TIME_STAMP_UNIT: &str = "time stamp";

fn numerical_units(df: &DataFrame) -> Vec<(&str, &str, bool)> {
    df.numerical()
        .iter()
        .map(|c| (c.name(), c.unit(), c.is_comparison_only()))
        .chain(
            df.time_stamps()
                .iter()
                .map(|c| (c.name(), c.unit(), c.is_comparison_only())),
        )
        .collect()
}

fn discrete_units(df: &DataFrame) -> Vec<(&str, &str, bool)> {
    df.discrete()
        .iter()
        .map(|c| (c.name(), c.unit(), c.is_comparison_only()))
        .collect()
}

fn categorical_units(df: &DataFrame) -> Vec<(&str, &str, bool)> {
    df.categorical()
        .iter()
        .map(|c| (c.name(), c.unit(), false))
        .collect()
}

/// Identifies every (population, peripheral) column pair of equal role with
/// identical, non-empty unit strings.
pub fn find_same_units(population: &DataFrame, peripheral: &DataFrame) -> Vec<SameUnits> {
    let mut out = Vec::new();

    for (pop_name, pop_unit, pop_cmp_only) in numerical_units(population) {
        if pop_unit.is_empty() {
            continue;
        }
        for (perip_name, perip_unit, perip_cmp_only) in numerical_units(peripheral) {
            if perip_unit == pop_unit {
                out.push(SameUnits {
                    population_column: pop_name.to_string(),
                    peripheral_column: perip_name.to_string(),
                    kind: SameUnitKind::Numerical,
                    is_time_stamp_unit: pop_unit.contains(TIME_STAMP_UNIT),
                    aggregatable: !(pop_cmp_only || perip_cmp_only),
                });
            }
        }
    }

    for (pop_name, pop_unit, pop_cmp_only) in discrete_units(population) {
        if pop_unit.is_empty() {
            continue;
        }
        for (perip_name, perip_unit, perip_cmp_only) in discrete_units(peripheral) {
            if perip_unit == pop_unit {
                out.push(SameUnits {
                    population_column: pop_name.to_string(),
                    peripheral_column: perip_name.to_string(),
                    kind: SameUnitKind::Discrete,
                    is_time_stamp_unit: pop_unit.contains(TIME_STAMP_UNIT),
                    aggregatable: !(pop_cmp_only || perip_cmp_only),
                });
            }
        }
    }

    for (pop_name, pop_unit, _) in categorical_units(population) {
        if pop_unit.is_empty() {
            continue;
        }
        for (perip_name, perip_unit, _) in categorical_units(peripheral) {
            if perip_unit == pop_unit {
                out.push(SameUnits {
                    population_column: pop_name.to_string(),
                    peripheral_column: perip_name.to_string(),
                    kind: SameUnitKind::Categorical,
                    is_time_stamp_unit: false,
                    aggregatable: true,
                });
            }
        }
    }

    out
}

/// Resolves a column's raw numeric value for same-unit difference
/// conditions, regardless of whether it lives in `numerical` or
/// `time_stamps`.
pub fn numerical_value(df: &DataFrame, column: &str, row: usize) -> crate::error::Result<f64> {
    match df.get(column)? {
        ColumnRef::Numerical(c) | ColumnRef::TimeStamp(c) => c.get(row),
        _ => Err(crate::error::Error::invalid(format!(
            "'{column}' is not a numerical or time-stamp column"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Column;
    use crate::encoding::Encoding;

    #[test]
    fn finds_matching_units_and_flags_time_stamps() {
        let enc = Encoding::new();
        let mut pop = DataFrame::new("pop", enc.clone());
        let mut a = Column::from_vec("last_seen", vec![1.0]);
        a.set_unit("time stamp");
        pop.add_time_stamp(a).unwrap();

        let mut perip = DataFrame::new("perip", enc.clone());
        let mut b = Column::from_vec("event_ts", vec![1.0]);
        b.set_unit("time stamp");
        perip.add_time_stamp(b).unwrap();

        let pairs = find_same_units(&pop, &perip);
        assert_eq!(pairs.len(), 1);
        assert!(pairs[0].is_time_stamp_unit);
    }

    #[test]
    fn comparison_only_units_excluded_from_aggregation() {
        let enc = Encoding::new();
        let mut pop = DataFrame::new("pop", enc.clone());
        let mut a = Column::from_vec("height_m", vec![1.0]);
        a.set_unit("meters, comparison only");
        pop.add_numerical(a).unwrap();

        let mut perip = DataFrame::new("perip", enc.clone());
        let mut b = Column::from_vec("width_m", vec![1.0]);
        b.set_unit("meters, comparison only");
        perip.add_numerical(b).unwrap();

        let pairs = find_same_units(&pop, &perip);
        assert_eq!(pairs.len(), 1);
        assert!(!pairs[0].aggregatable);
    }
}
