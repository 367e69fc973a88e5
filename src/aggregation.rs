//! Tagged aggregation enumeration: a plain enum plus a trait for the few
//! aggregations that need non-trivial sufficient statistics.

use serde::{Deserialize, Serialize};

/// One entry per supported aggregation. `Count` has no operand column;
/// everything else aggregates over matched peripheral values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aggregation {
    Count,
    CountDistinct,
    CountMinusCountDistinct,
    Avg,
    Sum,
    Min,
    Max,
    Median,
    Stddev,
    Var,
    Skew,
    Kurtosis,
    First,
    Last,
    Ewma(EwmaHalfLife),
    Trend,
    TimeSinceFirstMin,
    TimeSinceFirstMax,
    TimeSinceLastMin,
    TimeSinceLastMax,
    NumMin,
    NumMax,
    Quantile(u8),
    AvgTimeBetween,
    CountAboveMean,
    CountBelowMean,
    Mode,
    VariationCoefficient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EwmaHalfLife {
    Seconds1,
    Minutes1,
    Hours1,
    Days1,
    Days7,
    Days30,
    Days90,
    Days365,
}

impl EwmaHalfLife {
    /// Half-life expressed in seconds, to match the `ts_diff` unit.
    pub fn seconds(self) -> f64 {
        use EwmaHalfLife::*;
        match self {
            Seconds1 => 1.0,
            Minutes1 => 60.0,
            Hours1 => 3_600.0,
            Days1 => 86_400.0,
            Days7 => 7.0 * 86_400.0,
            Days30 => 30.0 * 86_400.0,
            Days90 => 90.0 * 86_400.0,
            Days365 => 365.0 * 86_400.0,
        }
    }
}

impl Aggregation {
    pub fn default_set() -> Vec<Aggregation> {
        vec![
            Aggregation::Count,
            Aggregation::CountDistinct,
            Aggregation::CountMinusCountDistinct,
            Aggregation::Avg,
            Aggregation::Sum,
            Aggregation::Min,
            Aggregation::Max,
            Aggregation::Median,
            Aggregation::Stddev,
            Aggregation::First,
            Aggregation::Last,
        ]
    }

    /// `COUNT` has no value-source column (`data_used = not_applicable`).
    pub fn is_not_applicable(self) -> bool {
        matches!(self, Aggregation::Count)
    }

    /// Whether this aggregation needs `FIRST`/`LAST` ordering semantics and
    /// therefore requires a peripheral time stamp to exist; skipped entirely
    /// when no peripheral time stamp exists.
    pub fn needs_time_stamp(self) -> bool {
        matches!(
            self,
            Aggregation::First
                | Aggregation::Last
                | Aggregation::Ewma(_)
                | Aggregation::Trend
                | Aggregation::TimeSinceFirstMin
                | Aggregation::TimeSinceFirstMax
                | Aggregation::TimeSinceLastMin
                | Aggregation::TimeSinceLastMax
                | Aggregation::AvgTimeBetween
        )
    }

    pub fn needs_count(self) -> bool {
        matches!(
            self,
            Aggregation::Count
                | Aggregation::CountDistinct
                | Aggregation::CountMinusCountDistinct
                | Aggregation::Avg
                | Aggregation::Stddev
                | Aggregation::Var
                | Aggregation::Skew
                | Aggregation::Kurtosis
                | Aggregation::VariationCoefficient
        )
    }

    pub fn needs_sum(self) -> bool {
        matches!(
            self,
            Aggregation::Avg
                | Aggregation::Sum
                | Aggregation::Stddev
                | Aggregation::Var
                | Aggregation::Skew
                | Aggregation::Kurtosis
                | Aggregation::VariationCoefficient
        )
    }

    pub fn needs_sum_squared(self) -> bool {
        matches!(
            self,
            Aggregation::Stddev
                | Aggregation::Var
                | Aggregation::Skew
                | Aggregation::Kurtosis
                | Aggregation::VariationCoefficient
        )
    }

    pub fn needs_sum_cubed(self) -> bool {
        matches!(self, Aggregation::Skew | Aggregation::Kurtosis)
    }

    /// Column-level tag used by the SQL generator to pick a dialect
    /// aggregation function.
    pub fn sql_name(self) -> &'static str {
        use Aggregation::*;
        match self {
            Count | CountMinusCountDistinct => "COUNT",
            CountDistinct => "COUNT DISTINCT",
            Avg => "AVG",
            Sum => "SUM",
            Min | NumMin => "MIN",
            Max | NumMax => "MAX",
            Median => "MEDIAN",
            Stddev => "STDDEV",
            Var => "VARIANCE",
            Skew => "SKEW",
            Kurtosis => "KURTOSIS",
            First => "FIRST",
            Last => "LAST",
            Ewma(_) => "EWMA",
            Trend => "TREND",
            TimeSinceFirstMin | TimeSinceFirstMax | TimeSinceLastMin | TimeSinceLastMax => {
                "TIME SINCE"
            }
            Quantile(_) => "QUANTILE",
            AvgTimeBetween => "AVG TIME BETWEEN",
            CountAboveMean => "COUNT ABOVE MEAN",
            CountBelowMean => "COUNT BELOW MEAN",
            Mode => "MODE",
            VariationCoefficient => "VARIATION COEFFICIENT",
        }
    }
}

/// Sufficient-statistics accumulator shared by the aggregations that need
/// more than a running sum.
#[derive(Debug, Clone, Copy, Default)]
pub struct SufficientStats {
    pub count: f64,
    pub sum: f64,
    pub sum_squared: f64,
    pub sum_cubed: f64,
}

impl SufficientStats {
    pub fn add(&mut self, x: f64) {
        self.count += 1.0;
        self.sum += x;
        self.sum_squared += x * x;
        self.sum_cubed += x * x * x;
    }

    pub fn remove(&mut self, x: f64) {
        self.count -= 1.0;
        self.sum -= x;
        self.sum_squared -= x * x;
        self.sum_cubed -= x * x * x;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0.0 {
            f64::NAN
        } else {
            self.sum / self.count
        }
    }

    pub fn variance(&self) -> f64 {
        if self.count < 2.0 {
            return f64::NAN;
        }
        let mean = self.mean();
        (self.sum_squared / self.count - mean * mean).max(0.0)
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn skewness(&self) -> f64 {
        if self.count < 3.0 {
            return f64::NAN;
        }
        let mean = self.mean();
        let var = self.variance();
        if var <= 0.0 {
            return 0.0;
        }
        let m3 = self.sum_cubed / self.count - 3.0 * mean * self.sum_squared / self.count
            + 2.0 * mean * mean * mean;
        m3 / var.powf(1.5)
    }
}
