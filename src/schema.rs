//! Declarative data-model graph.

use crate::error::{Error, Result};

/// One edge from a parent table to a child (peripheral) table: the join-key
/// and time-stamp pair on each side, an optional horizon cutoff, and the two
/// behavioral flags.
#[derive(Debug, Clone)]
pub struct JoinSpec {
    pub population_join_key: String,
    pub peripheral_join_key: String,
    pub population_time_stamp: Option<String>,
    pub peripheral_time_stamp: Option<String>,
    pub upper_time_stamp: Option<String>,
    pub allow_lagged_targets: bool,
    pub propositionalization: bool,
}

/// A node in the schema tree: a table name plus, for each child, a
/// [`JoinSpec`] and the child `Placeholder` itself.
#[derive(Debug, Clone)]
pub struct Placeholder {
    pub table_name: String,
    pub children: Vec<(JoinSpec, Placeholder)>,
}

impl Placeholder {
    pub fn leaf(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, join: JoinSpec, child: Placeholder) -> Self {
        self.children.push((join, child));
        self
    }

    /// Validates the tree's invariants: every child's join references
    /// non-empty column names, and `upper_time_stamp` (if set) is not the
    /// same as `time_stamp` unless explicitly allowed by the caller — the
    /// ordering check itself (`upper_ts >= ts`) is necessarily a runtime,
    /// data-dependent check performed by the Matchmaker, since a
    /// `Placeholder` only names columns, not values.
    pub fn validate(&self) -> Result<()> {
        for (join, child) in &self.children {
            if join.population_join_key.is_empty() || join.peripheral_join_key.is_empty() {
                return Err(Error::schema(format!(
                    "child '{}' of '{}' has an empty join key reference",
                    child.table_name, self.table_name
                )));
            }
            if let Some(upper) = &join.upper_time_stamp {
                if join.peripheral_time_stamp.as_deref() == Some(upper.as_str()) {
                    return Err(Error::schema(format!(
                        "child '{}': upper_time_stamp must differ from time_stamp",
                        child.table_name
                    )));
                }
            }
            child.validate()?;
        }
        Ok(())
    }

    /// Depth-first iteration over every `(JoinSpec, Placeholder)` edge,
    /// including nested subtables — used by the Candidate Tree Builder and
    /// the Mapping Container's recursive `find_output_ix`.
    pub fn walk<'a>(&'a self) -> Vec<(&'a JoinSpec, &'a Placeholder)> {
        let mut out = Vec::new();
        for (join, child) in &self.children {
            out.push((join, child));
            out.extend(child.walk());
        }
        out
    }

    pub fn has_subtable(&self) -> bool {
        !self.children.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join(allow_lagged: bool) -> JoinSpec {
        JoinSpec {
            population_join_key: "pop_jk".into(),
            peripheral_join_key: "perip_jk".into(),
            population_time_stamp: Some("pop_ts".into()),
            peripheral_time_stamp: Some("perip_ts".into()),
            upper_time_stamp: None,
            allow_lagged_targets: allow_lagged,
            propositionalization: false,
        }
    }

    #[test]
    fn validates_nested_schema() {
        let leaf = Placeholder::leaf("transactions");
        let root = Placeholder::leaf("population").with_child(join(false), leaf);
        assert!(root.validate().is_ok());
    }

    #[test]
    fn rejects_empty_join_key() {
        let mut j = join(false);
        j.peripheral_join_key = String::new();
        let root = Placeholder::leaf("population").with_child(j, Placeholder::leaf("t"));
        assert!(root.validate().is_err());
    }

    #[test]
    fn rejects_upper_ts_equal_to_ts() {
        let mut j = join(false);
        j.upper_time_stamp = Some("perip_ts".into());
        let root = Placeholder::leaf("population").with_child(j, Placeholder::leaf("t"));
        assert!(root.validate().is_err());
    }
}
