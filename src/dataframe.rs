//! Named, role-partitioned bundle of columns, grounded on
//! `original_source/.../autosql/DataFrame.cpp`.

use crate::column::{Column, StringColumn};
use crate::encoding::Encoding;
use crate::error::{Error, Result};
use crate::text::WordIndex;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};

/// The seven column roles a DataFrame partitions by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Categorical,
    Discrete,
    Numerical,
    JoinKey,
    TimeStamp,
    Text,
    Target,
}

/// Ascending row positions holding a given join-key value: a mapping from
/// the interned integer value to the ascending list of row positions.
pub type JoinIndex = FxHashMap<i64, Vec<u32>>;

fn build_join_index(col: &StringColumn) -> Result<JoinIndex> {
    let mut index: JoinIndex = FxHashMap::default();
    for i in 0..col.len() {
        let id = col.id_at(i)?;
        index.entry(id).or_default().push(i as u32);
    }
    Ok(index)
}

/// A reference into one of a DataFrame's typed columns, returned by
/// case-sensitive name lookup.
pub enum ColumnRef<'a> {
    Categorical(&'a StringColumn),
    Discrete(&'a Column<i64>),
    Numerical(&'a Column<f64>),
    JoinKey(&'a StringColumn),
    TimeStamp(&'a Column<f64>),
    Text(&'a StringColumn),
    Target(&'a Column<f64>),
}

/// Named bundle of Columns partitioned by role.
pub struct DataFrame {
    name: String,
    n_rows: usize,
    categorical: Vec<StringColumn>,
    discrete: Vec<Column<i64>>,
    numerical: Vec<Column<f64>>,
    join_keys: Vec<StringColumn>,
    time_stamps: Vec<Column<f64>>,
    text: Vec<StringColumn>,
    targets: Vec<Column<f64>>,
    join_indices: Vec<JoinIndex>,
    word_indices: Vec<WordIndex>,
    encoding: Encoding,
}

impl DataFrame {
    pub fn new(name: impl Into<String>, encoding: Encoding) -> Self {
        Self {
            name: name.into(),
            n_rows: 0,
            categorical: Vec::new(),
            discrete: Vec::new(),
            numerical: Vec::new(),
            join_keys: Vec::new(),
            time_stamps: Vec::new(),
            text: Vec::new(),
            targets: Vec::new(),
            join_indices: Vec::new(),
            word_indices: Vec::new(),
            encoding,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn height(&self) -> usize {
        self.n_rows
    }

    fn check_cardinality(&mut self, len: usize) -> Result<()> {
        if self.n_rows == 0 && self.num_columns() == 1 {
            self.n_rows = len;
            return Ok(());
        }
        if len != self.n_rows {
            return Err(Error::invalid(format!(
                "column of length {len} does not match data frame '{}' cardinality {}",
                self.name, self.n_rows
            )));
        }
        Ok(())
    }

    fn num_columns(&self) -> usize {
        self.categorical.len()
            + self.discrete.len()
            + self.numerical.len()
            + self.join_keys.len()
            + self.time_stamps.len()
            + self.text.len()
            + self.targets.len()
    }

    pub fn add_numerical(&mut self, col: Column<f64>) -> Result<()> {
        self.check_cardinality(col.len())?;
        self.numerical.push(col);
        Ok(())
    }

    pub fn add_discrete(&mut self, col: Column<i64>) -> Result<()> {
        self.check_cardinality(col.len())?;
        self.discrete.push(col);
        Ok(())
    }

    pub fn add_target(&mut self, col: Column<f64>) -> Result<()> {
        self.check_cardinality(col.len())?;
        self.targets.push(col);
        Ok(())
    }

    pub fn add_time_stamp(&mut self, col: Column<f64>) -> Result<()> {
        self.check_cardinality(col.len())?;
        self.time_stamps.push(col);
        Ok(())
    }

    pub fn add_categorical(&mut self, col: StringColumn) -> Result<()> {
        self.check_cardinality(col.len())?;
        self.categorical.push(col);
        Ok(())
    }

    pub fn add_join_key(&mut self, col: StringColumn) -> Result<()> {
        self.check_cardinality(col.len())?;
        let index = build_join_index(&col)?;
        self.join_keys.push(col);
        self.join_indices.push(index);
        Ok(())
    }

    pub fn add_text(&mut self, col: StringColumn) -> Result<()> {
        self.check_cardinality(col.len())?;
        let texts: Vec<String> = (0..col.len())
            .map(|i| col.get(i).unwrap_or_default())
            .collect();
        let index = WordIndex::build(&texts, &self.encoding);
        self.text.push(col);
        self.word_indices.push(index);
        Ok(())
    }

    /// Case-sensitive lookup across all roles.
    pub fn get(&self, column_name: &str) -> Result<ColumnRef<'_>> {
        if let Some(c) = self.numerical.iter().find(|c| c.name() == column_name) {
            return Ok(ColumnRef::Numerical(c));
        }
        if let Some(c) = self.discrete.iter().find(|c| c.name() == column_name) {
            return Ok(ColumnRef::Discrete(c));
        }
        if let Some(c) = self.categorical.iter().find(|c| c.name() == column_name) {
            return Ok(ColumnRef::Categorical(c));
        }
        if let Some(c) = self.join_keys.iter().find(|c| c.name() == column_name) {
            return Ok(ColumnRef::JoinKey(c));
        }
        if let Some(c) = self.time_stamps.iter().find(|c| c.name() == column_name) {
            return Ok(ColumnRef::TimeStamp(c));
        }
        if let Some(c) = self.text.iter().find(|c| c.name() == column_name) {
            return Ok(ColumnRef::Text(c));
        }
        if let Some(c) = self.targets.iter().find(|c| c.name() == column_name) {
            return Ok(ColumnRef::Target(c));
        }
        Err(Error::invalid(format!(
            "column '{column_name}' not found in data frame '{}'",
            self.name
        )))
    }

    pub fn numerical(&self) -> &[Column<f64>] {
        &self.numerical
    }

    pub fn discrete(&self) -> &[Column<i64>] {
        &self.discrete
    }

    pub fn categorical(&self) -> &[StringColumn] {
        &self.categorical
    }

    pub fn join_keys(&self) -> &[StringColumn] {
        &self.join_keys
    }

    pub fn time_stamps(&self) -> &[Column<f64>] {
        &self.time_stamps
    }

    pub fn text_columns(&self) -> &[StringColumn] {
        &self.text
    }

    pub fn targets(&self) -> &[Column<f64>] {
        &self.targets
    }

    pub fn word_index(&self, text_column: &str) -> Option<&WordIndex> {
        let pos = self.text.iter().position(|c| c.name() == text_column)?;
        self.word_indices.get(pos)
    }

    pub fn has_jk(&self, join_key_column: &str) -> bool {
        self.join_keys.iter().any(|c| c.name() == join_key_column)
    }

    /// Returns the sorted row-position range holding `value` for a given
    /// join-key column iterator pair
    /// collapsed to a slice — idiomatic Rust for the same guarantee).
    pub fn find_jk(&self, join_key_column: &str, value: i64) -> Result<&[u32]> {
        let pos = self
            .join_keys
            .iter()
            .position(|c| c.name() == join_key_column)
            .ok_or_else(|| Error::invalid(format!("no join key column '{join_key_column}'")))?;
        Ok(self.join_indices[pos]
            .get(&value)
            .map(|v| v.as_slice())
            .unwrap_or(&[]))
    }

    pub fn join_index(&self, join_key_column: &str) -> Result<&JoinIndex> {
        let pos = self
            .join_keys
            .iter()
            .position(|c| c.name() == join_key_column)
            .ok_or_else(|| Error::invalid(format!("no join key column '{join_key_column}'")))?;
        Ok(&self.join_indices[pos])
    }

    /// Row-binds `other` onto `self`. Requires identical role-wise column
    /// counts and identical join-key/time-stamp counts.
    pub fn append(&mut self, other: &DataFrame) -> Result<()> {
        if self.categorical.len() != other.categorical.len()
            || self.discrete.len() != other.discrete.len()
            || self.numerical.len() != other.numerical.len()
            || self.join_keys.len() != other.join_keys.len()
            || self.time_stamps.len() != other.time_stamps.len()
            || self.text.len() != other.text.len()
            || self.targets.len() != other.targets.len()
        {
            return Err(Error::invalid(
                "append requires identical role-wise column counts",
            ));
        }
        for (a, b) in self.categorical.iter_mut().zip(other.categorical.iter()) {
            a.append(b)?;
        }
        for (a, b) in self.discrete.iter_mut().zip(other.discrete.iter()) {
            a.append(b)?;
        }
        for (a, b) in self.numerical.iter_mut().zip(other.numerical.iter()) {
            a.append(b)?;
        }
        for (a, b) in self.time_stamps.iter_mut().zip(other.time_stamps.iter()) {
            a.append(b)?;
        }
        for (a, b) in self.targets.iter_mut().zip(other.targets.iter()) {
            a.append(b)?;
        }
        for (a, b) in self.text.iter_mut().zip(other.text.iter()) {
            a.append(b)?;
        }
        for (i, (a, b)) in self
            .join_keys
            .iter_mut()
            .zip(other.join_keys.iter())
            .enumerate()
        {
            let offset = a.len() as u32;
            a.append(b)?;
            for (&value, positions) in other.join_indices[i].iter() {
                self.join_indices[i]
                    .entry(value)
                    .or_default()
                    .extend(positions.iter().map(|p| p + offset));
            }
        }
        for (i, b) in other.text.iter().enumerate() {
            let texts: Vec<String> = (0..b.len()).map(|r| b.get(r).unwrap_or_default()).collect();
            self.word_indices[i].append(&WordIndex::build(&texts, &self.encoding));
        }
        self.n_rows += other.n_rows;
        Ok(())
    }

    /// Serializes the rows `[start, start+length)` across every column into
    /// a JSON value.
    pub fn get_content(&self, start: usize, length: usize) -> Result<Value> {
        let end = (start + length).min(self.n_rows);
        let mut rows = Vec::new();
        for i in start..end {
            let mut row = serde_json::Map::new();
            for c in &self.numerical {
                row.insert(c.name().to_string(), json!(c.get(i)?));
            }
            for c in &self.discrete {
                row.insert(c.name().to_string(), json!(c.get(i)?));
            }
            for c in &self.categorical {
                row.insert(c.name().to_string(), json!(c.get(i)?));
            }
            for c in &self.join_keys {
                row.insert(c.name().to_string(), json!(c.get(i)?));
            }
            for c in &self.time_stamps {
                row.insert(c.name().to_string(), json!(c.get(i)?));
            }
            for c in &self.text {
                row.insert(c.name().to_string(), json!(c.get(i)?));
            }
            for c in &self.targets {
                row.insert(c.name().to_string(), json!(c.get(i)?));
            }
            rows.push(Value::Object(row));
        }
        Ok(Value::Array(rows))
    }

    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }
}

/// Immutable pair of (DataFrame, row indices). All accessors index through
/// the row list, grounded on
/// `original_source/.../relboost/containers/DataFrameView.hpp`.
pub struct DataFrameView<'a> {
    frame: &'a DataFrame,
    rows: Vec<u32>,
}

impl<'a> DataFrameView<'a> {
    pub fn new(frame: &'a DataFrame, rows: Vec<u32>) -> Self {
        Self { frame, rows }
    }

    pub fn full(frame: &'a DataFrame) -> Self {
        Self {
            frame,
            rows: (0..frame.height() as u32).collect(),
        }
    }

    pub fn frame(&self) -> &'a DataFrame {
        self.frame
    }

    pub fn rows(&self) -> &[u32] {
        &self.rows
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn numerical_at(&self, row_ix: usize, column_name: &str) -> Result<f64> {
        let ColumnRef::Numerical(col) = self.frame.get(column_name)? else {
            return Err(Error::invalid(format!("'{column_name}' is not numerical")));
        };
        col.get(self.rows[row_ix] as usize)
    }

    pub fn discrete_at(&self, row_ix: usize, column_name: &str) -> Result<i64> {
        let ColumnRef::Discrete(col) = self.frame.get(column_name)? else {
            return Err(Error::invalid(format!("'{column_name}' is not discrete")));
        };
        col.get(self.rows[row_ix] as usize)
    }

    pub fn categorical_id_at(&self, row_ix: usize, column_name: &str) -> Result<i64> {
        match self.frame.get(column_name)? {
            ColumnRef::Categorical(col) | ColumnRef::JoinKey(col) => {
                col.id_at(self.rows[row_ix] as usize)
            }
            _ => Err(Error::invalid(format!(
                "'{column_name}' is not categorical/join-key"
            ))),
        }
    }

    pub fn time_stamp_at(&self, row_ix: usize, column_name: &str) -> Result<f64> {
        let ColumnRef::TimeStamp(col) = self.frame.get(column_name)? else {
            return Err(Error::invalid(format!("'{column_name}' is not a time stamp")));
        };
        col.get(self.rows[row_ix] as usize)
    }

    pub fn target_at(&self, row_ix: usize, column_name: &str) -> Result<f64> {
        let ColumnRef::Target(col) = self.frame.get(column_name)? else {
            return Err(Error::invalid(format!("'{column_name}' is not a target")));
        };
        col.get(self.rows[row_ix] as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> DataFrame {
        let enc = Encoding::new();
        let mut df = DataFrame::new("pop", enc.clone());
        df.add_join_key(StringColumn::from_strings(
            "jk",
            &["1".into(), "1".into(), "2".into()],
            &enc,
        ))
        .unwrap();
        df.add_time_stamp(Column::from_vec("ts", vec![10.0, 20.0, 15.0]))
            .unwrap();
        df
    }

    #[test]
    fn join_index_groups_by_value() {
        let df = sample_frame();
        let jk1 = df.encoding().find("1").unwrap();
        let rows = df.find_jk("jk", jk1).unwrap();
        assert_eq!(rows, &[0, 1]);
    }

    #[test]
    fn append_requires_matching_shape() {
        let mut a = sample_frame();
        let b = sample_frame();
        assert!(a.append(&b).is_ok());
        assert_eq!(a.height(), 6);
    }

    #[test]
    fn get_unknown_column_errors() {
        let df = sample_frame();
        assert!(df.get("does_not_exist").is_err());
    }
}
