//! Split conditions: the testable predicate attached to every interior
//! decision-tree node.

use serde::{Deserialize, Serialize};

/// Which data source a [`Split`] tests against. Closed enumeration so the
/// fitter, the transform walk, and the SQL generator all dispatch on the
/// same tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataUsed {
    NumericalInput,
    NumericalOutput,
    DiscreteInput,
    DiscreteOutput,
    DiscreteInputIsNan,
    DiscreteOutputIsNan,
    CategoricalInput,
    CategoricalOutput,
    SameUnitsCategorical,
    SameUnitsDiscrete,
    SameUnitsNumerical,
    SameUnitsCategoricalTs,
    SameUnitsDiscreteTs,
    SameUnitsNumericalTs,
    TimeStampsDiff,
    TimeStampsWindow,
    TextInput,
    TextOutput,
    Subfeatures,
}

impl DataUsed {
    /// Whether this data source operates on a peripheral (input-side)
    /// column rather than a population (output-side) one.
    pub fn is_input_side(self) -> bool {
        use DataUsed::*;
        matches!(
            self,
            NumericalInput
                | DiscreteInput
                | DiscreteInputIsNan
                | CategoricalInput
                | TextInput
                | Subfeatures
        )
    }

    pub fn is_same_units(self) -> bool {
        use DataUsed::*;
        matches!(
            self,
            SameUnitsCategorical
                | SameUnitsDiscrete
                | SameUnitsNumerical
                | SameUnitsCategoricalTs
                | SameUnitsDiscreteTs
                | SameUnitsNumericalTs
        )
    }

    /// Whether this family is tested against a time-stamp difference, and
    /// so is eligible for a `time_stamps_window` split in addition to a
    /// plain threshold.
    pub fn is_time_window_family(self) -> bool {
        use DataUsed::*;
        matches!(
            self,
            TimeStampsDiff | TimeStampsWindow | SameUnitsNumericalTs | SameUnitsDiscreteTs | SameUnitsCategoricalTs
        )
    }

    /// Total ordering index used as the first tie-break key among
    /// candidate splits whose loss reductions fall within 1e-12 of each
    /// other: lower-indexed `data_used`, then lower `column`.
    pub fn tie_break_rank(self) -> u8 {
        use DataUsed::*;
        match self {
            NumericalInput => 0,
            NumericalOutput => 1,
            DiscreteInput => 2,
            DiscreteOutput => 3,
            DiscreteInputIsNan => 4,
            DiscreteOutputIsNan => 5,
            CategoricalInput => 6,
            CategoricalOutput => 7,
            SameUnitsCategorical => 8,
            SameUnitsDiscrete => 9,
            SameUnitsNumerical => 10,
            SameUnitsCategoricalTs => 11,
            SameUnitsDiscreteTs => 12,
            SameUnitsNumericalTs => 13,
            TimeStampsDiff => 14,
            TimeStampsWindow => 15,
            TextInput => 16,
            TextOutput => 17,
            Subfeatures => 18,
        }
    }
}

/// The type-specific payload of a [`Split`]: a scalar threshold, a set of
/// interned category/word ids, or a window of ts-diffs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SplitCriterion {
    Threshold(f64),
    CategorySet(Vec<i64>),
    WordSet(Vec<i64>),
    Window { lower: f64, upper: f64 },
}

/// A testable condition deciding which child a match flows to.
/// `other_column_index` is populated only for same-units splits, where two
/// columns (one per table) are compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub data_used: DataUsed,
    pub column_index: usize,
    /// The feature key this split routes on — matches the key used in the
    /// fitted tree's per-row feature map.
    pub feature_name: String,
    pub criterion: SplitCriterion,
    pub other_column_index: Option<usize>,
}

impl Split {
    pub fn new(
        data_used: DataUsed,
        column_index: usize,
        feature_name: impl Into<String>,
        criterion: SplitCriterion,
    ) -> Self {
        Self {
            data_used,
            column_index,
            feature_name: feature_name.into(),
            criterion,
            other_column_index: None,
        }
    }

    pub fn with_other_column(mut self, other_column_index: usize) -> Self {
        self.other_column_index = Some(other_column_index);
        self
    }

    /// Tests a numerical/discrete scalar against a threshold split: `true`
    /// routes to the "greater" child, matching the convention used
    /// throughout the fitter (`w_greater`, `w_smaller`).
    pub fn test_threshold(&self, value: f64) -> Option<bool> {
        match self.criterion {
            SplitCriterion::Threshold(t) => {
                if value.is_nan() {
                    None
                } else {
                    Some(value > t)
                }
            }
            _ => None,
        }
    }

    /// Tests the `_is_nan` variants: routes NaN/MIN-sentinel values to the
    /// "greater" child.
    pub fn test_is_nan(&self, is_nan: bool) -> bool {
        is_nan
    }

    pub fn test_category(&self, category_id: i64) -> Option<bool> {
        match &self.criterion {
            SplitCriterion::CategorySet(set) => Some(set.contains(&category_id)),
            _ => None,
        }
    }

    pub fn test_any_word(&self, word_ids: &[i64]) -> Option<bool> {
        match &self.criterion {
            SplitCriterion::WordSet(set) => Some(word_ids.iter().any(|w| set.contains(w))),
            _ => None,
        }
    }

    /// Three-way window test used by `time_stamps_window` splits: returns
    /// `-1` (pre-window), `0` (inside), `1` (post-window).
    pub fn test_window(&self, value: f64) -> Option<i8> {
        match self.criterion {
            SplitCriterion::Window { lower, upper } => {
                if value < lower {
                    Some(-1)
                } else if value > upper {
                    Some(1)
                } else {
                    Some(0)
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_routes_nan_to_none() {
        let split = Split::new(
            DataUsed::NumericalInput,
            0,
            "x",
            SplitCriterion::Threshold(5.0),
        );
        assert_eq!(split.test_threshold(10.0), Some(true));
        assert_eq!(split.test_threshold(1.0), Some(false));
        assert_eq!(split.test_threshold(f64::NAN), None);
    }

    #[test]
    fn category_set_membership() {
        let split = Split::new(
            DataUsed::CategoricalInput,
            2,
            "category",
            SplitCriterion::CategorySet(vec![3, 7]),
        );
        assert_eq!(split.test_category(7), Some(true));
        assert_eq!(split.test_category(9), Some(false));
    }

    #[test]
    fn window_three_way_split() {
        let split = Split::new(
            DataUsed::TimeStampsWindow,
            0,
            "ts_diff",
            SplitCriterion::Window {
                lower: 0.0,
                upper: 100.0,
            },
        );
        assert_eq!(split.test_window(-5.0), Some(-1));
        assert_eq!(split.test_window(50.0), Some(0));
        assert_eq!(split.test_window(150.0), Some(1));
    }

    #[test]
    fn tie_break_rank_is_total_order() {
        assert!(DataUsed::NumericalInput.tie_break_rank() < DataUsed::NumericalOutput.tie_break_rank());
        assert!(DataUsed::Subfeatures.tie_break_rank() > DataUsed::TextOutput.tie_break_rank());
    }
}
