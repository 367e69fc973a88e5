//! Pluggable SQL dialect: every string-rendering decision that varies
//! across database engines lives behind this trait so the generator
//! itself stays dialect-agnostic.

/// A dialect-specific rendering of the handful of SQL fragments the
/// generator needs: quoting, aggregation syntax, string containment,
/// datetime-diff, join clauses, and subfeature join aliasing.
pub trait Dialect {
    /// Opening identifier quote character, e.g. `"` or `` ` ``.
    fn quotechar1(&self) -> &str;
    /// Closing identifier quote character.
    fn quotechar2(&self) -> &str;

    fn quote(&self, identifier: &str) -> String {
        format!("{}{}{}", self.quotechar1(), identifier, self.quotechar2())
    }

    /// Renders `agg(expr [ORDER BY order_expr])`.
    fn aggregation(&self, kind: &str, expr: &str, order_expr: Option<&str>) -> String {
        match order_expr {
            Some(order) => format!("{kind}({expr} ORDER BY {order})"),
            None => format!("{kind}({expr})"),
        }
    }

    fn string_contains(&self, column: &str, literal: &str, negate: bool) -> String {
        let op = if negate { "NOT LIKE" } else { "LIKE" };
        format!("{column} {op} '%{literal}%'")
    }

    /// Renders a time-stamp difference comparison in dialect-native
    /// units, choosing seconds/minutes/hours/days by the magnitude of
    /// `seconds`.
    fn make_time_stamp_diff(&self, out_ts: &str, in_ts: &str, seconds: f64, is_greater: bool) -> String {
        let op = if is_greater { ">" } else { "<=" };
        let (divisor, unit) = pick_unit(seconds);
        format!(
            "(EXTRACT(EPOCH FROM ({out_ts} - {in_ts})) / {divisor}) {op} {}",
            seconds / divisor_value(unit)
        )
    }

    fn make_joins(&self, out_alias: &str, in_alias: &str, out_jk: &str, in_jk: &str) -> String {
        format!(
            "{} = {}",
            self.quote(&format!("{out_alias}.{out_jk}")),
            self.quote(&format!("{in_alias}.{in_jk}"))
        )
    }

    fn make_time_stamps(
        &self,
        out_ts: &str,
        in_ts: &str,
        upper_ts: Option<&str>,
        t_out: &str,
        t_in: &str,
        t_src: &str,
    ) -> String {
        let mut clauses = vec![format!("{t_in}.{in_ts} <= {t_out}.{out_ts}")];
        if let Some(upper) = upper_ts {
            clauses.push(format!("{t_out}.{out_ts} < {t_src}.{upper}"));
        }
        clauses.join(" AND ")
    }

    fn make_subfeature_joins(&self, prefix: &str, peripheral_ix: usize, alias: &str, suffix: Option<&str>) -> String {
        match suffix {
            Some(s) => format!("{prefix}_{peripheral_ix}_{alias}_{s}"),
            None => format!("{prefix}_{peripheral_ix}_{alias}"),
        }
    }
}

fn pick_unit(seconds: f64) -> (f64, &'static str) {
    let abs = seconds.abs();
    if abs >= 86_400.0 {
        (86_400.0, "days")
    } else if abs >= 3_600.0 {
        (3_600.0, "hours")
    } else if abs >= 60.0 {
        (60.0, "minutes")
    } else {
        (1.0, "seconds")
    }
}

fn divisor_value(unit: &str) -> f64 {
    match unit {
        "days" => 86_400.0,
        "hours" => 3_600.0,
        "minutes" => 60.0,
        _ => 1.0,
    }
}

/// ANSI-leaning default dialect (PostgreSQL-flavored), the one concrete
/// implementation shipped in this crate.
pub struct AnsiDialect;

impl Dialect for AnsiDialect {
    fn quotechar1(&self) -> &str {
        "\""
    }
    fn quotechar2(&self) -> &str {
        "\""
    }
}
