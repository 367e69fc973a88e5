//! Mapping Container: per-category/per-word target-mean columns, computed
//! against the population rows each peripheral row matches through the
//! schema tree.

use crate::column::Column;
use crate::dataframe::DataFrame;
use crate::error::Result;
use crate::matchmaker::find_all_matches;
use crate::schema::{JoinSpec, Placeholder};
use rustc_hash::FxHashMap;

/// One (category_id -> mean target) table for a single peripheral column
/// against a single target.
#[derive(Debug, Clone, Default)]
pub struct CategoryMapping {
    means: FxHashMap<i64, f64>,
}

impl CategoryMapping {
    pub fn get(&self, category_id: i64) -> Option<f64> {
        self.means.get(&category_id).copied()
    }

    pub fn len(&self) -> usize {
        self.means.len()
    }

    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }
}

/// Recursively resolves which *output*-side (population) row index a
/// peripheral row under a nested subtable ultimately feeds, by walking
/// back up the schema tree through the chain of matches.
fn find_output_ix(
    population: &DataFrame,
    peripheral: &DataFrame,
    join: &JoinSpec,
    peripheral_row: u32,
) -> Result<Vec<u32>> {
    let matches = find_all_matches(population, peripheral, join)?;
    Ok(matches
        .iter()
        .filter(|m| m.ix_input == peripheral_row)
        .map(|m| m.ix_output)
        .collect())
}

/// Builds `Map<category_id -> mean(target)>` for one categorical column,
/// dropping entries with fewer than `min_df` matches.
pub fn build_category_mapping(
    population: &DataFrame,
    peripheral: &DataFrame,
    join: &JoinSpec,
    category_column: &str,
    target: &Column<f64>,
    min_df: usize,
) -> Result<CategoryMapping> {
    let categorical = peripheral
        .categorical()
        .iter()
        .find(|c| c.name() == category_column)
        .ok_or_else(|| crate::error::Error::invalid(format!("no categorical column '{category_column}'")))?;

    let mut sums: FxHashMap<i64, (f64, usize)> = FxHashMap::default();
    for row in 0..peripheral.height() as u32 {
        let category_id = categorical.id_at(row as usize)?;
        for output_ix in find_output_ix(population, peripheral, join, row)? {
            let target_value = target.get(output_ix as usize)?;
            if target_value.is_nan() {
                continue;
            }
            let entry = sums.entry(category_id).or_insert((0.0, 0));
            entry.0 += target_value;
            entry.1 += 1;
        }
    }

    let means = sums
        .into_iter()
        .filter(|(_, (_, count))| *count >= min_df)
        .map(|(id, (sum, count))| (id, sum / count as f64))
        .collect();

    Ok(CategoryMapping { means })
}

/// Builds a `Column<f64>` of per-row mapped means for `category_column`
/// against `target`, with a name suffixed `__mapping, target N` (spec
/// §4.M transform).
pub fn transform_category_mapping(
    peripheral: &DataFrame,
    category_column: &str,
    mapping: &CategoryMapping,
    target_index: usize,
) -> Result<Column<f64>> {
    let categorical = peripheral
        .categorical()
        .iter()
        .find(|c| c.name() == category_column)
        .ok_or_else(|| crate::error::Error::invalid(format!("no categorical column '{category_column}'")))?;

    let mut values = Vec::with_capacity(peripheral.height());
    for row in 0..peripheral.height() {
        let id = categorical.id_at(row)?;
        values.push(mapping.get(id).unwrap_or(f64::NAN));
    }

    Ok(Column::from_vec(
        format!("{category_column}__mapping, target {target_index}"),
        values,
    ))
}

/// Builds `Map<word_id -> mean(target)>` for one text column, treating
/// each distinct word in a row as a category that row votes into — the
/// text counterpart of [`build_category_mapping`], dropping entries with
/// fewer than `min_df` matches.
pub fn build_text_mapping(
    population: &DataFrame,
    peripheral: &DataFrame,
    join: &JoinSpec,
    text_column: &str,
    target: &Column<f64>,
    min_df: usize,
) -> Result<CategoryMapping> {
    let word_index = peripheral
        .word_index(text_column)
        .ok_or_else(|| crate::error::Error::invalid(format!("no text column '{text_column}'")))?;

    let mut sums: FxHashMap<i64, (f64, usize)> = FxHashMap::default();
    for row in 0..peripheral.height() as u32 {
        let output_ixs = find_output_ix(population, peripheral, join, row)?;
        for word_id in word_index.row(row as usize) {
            for &output_ix in &output_ixs {
                let target_value = target.get(output_ix as usize)?;
                if target_value.is_nan() {
                    continue;
                }
                let entry = sums.entry(*word_id).or_insert((0.0, 0));
                entry.0 += target_value;
                entry.1 += 1;
            }
        }
    }

    let means = sums
        .into_iter()
        .filter(|(_, (_, count))| *count >= min_df)
        .map(|(id, (sum, count))| (id, sum / count as f64))
        .collect();

    Ok(CategoryMapping { means })
}

/// Builds a `Column<f64>` of per-row mapped means for `text_column`
/// against `target`: each row's value is the average of its distinct
/// words' mapped means (words with no surviving mapping entry are
/// skipped), or NaN if none of the row's words survived `min_df`.
pub fn transform_text_mapping(
    peripheral: &DataFrame,
    text_column: &str,
    mapping: &CategoryMapping,
    target_index: usize,
) -> Result<Column<f64>> {
    let word_index = peripheral
        .word_index(text_column)
        .ok_or_else(|| crate::error::Error::invalid(format!("no text column '{text_column}'")))?;

    let mut values = Vec::with_capacity(peripheral.height());
    for row in 0..peripheral.height() {
        let mut sum = 0.0;
        let mut count = 0usize;
        for word_id in word_index.row(row) {
            if let Some(mean) = mapping.get(*word_id) {
                sum += mean;
                count += 1;
            }
        }
        values.push(if count > 0 {
            sum / count as f64
        } else {
            f64::NAN
        });
    }

    Ok(Column::from_vec(
        format!("{text_column}__mapping, target {target_index}"),
        values,
    ))
}

/// Builds mappings for every categorical and text column of a peripheral
/// table in one pass, over every edge reachable from `root` down to
/// `peripheral_table` — the public §4.M entry point. `min_df` is the
/// minimum match count a category or word id needs to survive.
pub fn build_all_mappings(
    root: &Placeholder,
    population: &DataFrame,
    peripheral: &DataFrame,
    peripheral_table: &str,
    target: &Column<f64>,
    min_df: usize,
) -> Result<Vec<(String, CategoryMapping)>> {
    let mut out = Vec::new();
    for (join, child) in root.walk() {
        if child.table_name != peripheral_table {
            continue;
        }
        for column in peripheral.categorical() {
            let mapping = build_category_mapping(
                population,
                peripheral,
                join,
                column.name(),
                target,
                min_df,
            )?;
            out.push((column.name().to_string(), mapping));
        }
        for column in peripheral.text_columns() {
            let mapping =
                build_text_mapping(population, peripheral, join, column.name(), target, min_df)?;
            out.push((column.name().to_string(), mapping));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::StringColumn;
    use crate::encoding::Encoding;

    fn join() -> JoinSpec {
        JoinSpec {
            population_join_key: "jk".into(),
            peripheral_join_key: "jk".into(),
            population_time_stamp: None,
            peripheral_time_stamp: None,
            upper_time_stamp: None,
            allow_lagged_targets: true,
            propositionalization: false,
        }
    }

    #[test]
    fn drops_categories_below_min_df() {
        let enc = Encoding::new();
        let mut pop = DataFrame::new("pop", enc.clone());
        pop.add_join_key(StringColumn::from_strings("jk", &["1".into(), "2".into()], &enc))
            .unwrap();
        let target = Column::from_vec("y", vec![10.0, 20.0]);
        pop.add_target(target.clone()).unwrap();

        let mut perip = DataFrame::new("perip", enc.clone());
        perip
            .add_join_key(StringColumn::from_strings("jk", &["1".into(), "1".into(), "2".into()], &enc))
            .unwrap();
        perip
            .add_categorical(StringColumn::from_strings(
                "cat",
                &["A".into(), "A".into(), "B".into()],
                &enc,
            ))
            .unwrap();

        let mapping = build_category_mapping(&pop, &perip, &join(), "cat", &target, 2).unwrap();
        let a_id = enc.find("A").unwrap();
        let b_id = enc.find("B").unwrap();
        assert_eq!(mapping.get(a_id), Some(10.0));
        assert_eq!(mapping.get(b_id), None);
    }
}
