//! Renders a fitted [`crate::tree::DecisionTree`] as dialect-specific SQL:
//! one `CASE WHEN` arm per root-to-leaf path, aggregated at the outer
//! `SELECT`.

pub mod dialect;

pub use dialect::{AnsiDialect, Dialect};

use crate::aggregation::Aggregation;
use crate::candidates::{Candidate, ValueSource};
use crate::ensemble::Ensemble;
use crate::schema::JoinSpec;
use crate::split::{DataUsed, SplitCriterion};
use crate::tree::{DecisionTree, Node, NodeId};

struct Path {
    conditions: Vec<String>,
    then_expr: String,
}

/// The two alias-qualified time-stamp columns a `_ts`/`TimeStampsDiff`/
/// `TimeStampsWindow` split condition is rendered against: population-side
/// (`out`) and peripheral-side (`in`), matching `make_time_stamp_diff`'s
/// `EXTRACT(EPOCH FROM (out - in))` convention.
#[derive(Debug, Clone, Copy)]
pub struct TimeStampRef<'a> {
    pub out_ts: &'a str,
    pub in_ts: &'a str,
}

fn render_condition(
    data_used: DataUsed,
    feature_name: &str,
    criterion: &SplitCriterion,
    alias: &str,
    dialect: &dyn Dialect,
    ts: Option<TimeStampRef>,
) -> String {
    let column = format!("{alias}.{feature_name}");

    if data_used.is_time_window_family() {
        if let Some(ts) = ts {
            return match criterion {
                // Matches the binary routing `tree::route` actually performs
                // for `TimeStampsWindow` (only "past the upper bound" vs.
                // not), so `lower` has no SQL counterpart here.
                SplitCriterion::Threshold(t) => dialect.make_time_stamp_diff(ts.out_ts, ts.in_ts, *t, true),
                SplitCriterion::Window { upper, .. } => {
                    dialect.make_time_stamp_diff(ts.out_ts, ts.in_ts, *upper, true)
                }
                _ => format!("{column} > 0"),
            };
        }
    }

    match (data_used, criterion) {
        (DataUsed::DiscreteInputIsNan | DataUsed::DiscreteOutputIsNan, _) => {
            format!("{column} IS NULL")
        }
        (_, SplitCriterion::Threshold(t)) => format!("{column} > {t}"),
        (_, SplitCriterion::CategorySet(ids)) => {
            let list = ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            format!("{column} IN ({list})")
        }
        (_, SplitCriterion::WordSet(ids)) => {
            let list = ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            format!("{column} IN ({list})")
        }
        (_, SplitCriterion::Window { lower, upper }) => {
            format!("{column} BETWEEN {lower} AND {upper}")
        }
    }
}

fn negate(condition: &str) -> String {
    format!("NOT ({condition})")
}

fn walk(
    tree: &DecisionTree,
    node: NodeId,
    alias: &str,
    dialect: &dyn Dialect,
    ts: Option<TimeStampRef>,
    prefix: &[String],
    out: &mut Vec<Path>,
) {
    match tree.node(node) {
        Node::Interior {
            split,
            greater,
            smaller,
        } => {
            let condition = render_condition(
                split.data_used,
                &split.feature_name,
                &split.criterion,
                alias,
                dialect,
                ts,
            );

            let mut greater_path = prefix.to_vec();
            greater_path.push(condition.clone());
            walk(tree, *greater, alias, dialect, ts, &greater_path, out);

            let mut smaller_path = prefix.to_vec();
            smaller_path.push(negate(&condition));
            walk(tree, *smaller, alias, dialect, ts, &smaller_path, out);
        }
        Node::Interior3 {
            split,
            pre_window,
            in_window,
            post_window,
        } => {
            let (lower, upper) = match &split.criterion {
                SplitCriterion::Window { lower, upper } => (*lower, *upper),
                _ => (f64::NEG_INFINITY, f64::INFINITY),
            };
            let (below_lower, above_upper) = match ts {
                Some(ts) => (
                    dialect.make_time_stamp_diff(ts.out_ts, ts.in_ts, lower, false),
                    dialect.make_time_stamp_diff(ts.out_ts, ts.in_ts, upper, true),
                ),
                None => {
                    let column = format!("{alias}.{}", split.feature_name);
                    (format!("{column} < {lower}"), format!("{column} > {upper}"))
                }
            };

            let mut pre_path = prefix.to_vec();
            pre_path.push(below_lower.clone());
            walk(tree, *pre_window, alias, dialect, ts, &pre_path, out);

            let mut post_path = prefix.to_vec();
            post_path.push(above_upper.clone());
            walk(tree, *post_window, alias, dialect, ts, &post_path, out);

            let mut in_path = prefix.to_vec();
            in_path.push(negate(&below_lower));
            in_path.push(negate(&above_upper));
            walk(tree, *in_window, alias, dialect, ts, &in_path, out);
        }
        Node::Leaf { intercept, weights } => {
            let mut terms = vec![format!("{intercept}")];
            for (name, w) in weights {
                terms.push(format!("{w} * {alias}.{name}"));
            }
            out.push(Path {
                conditions: prefix.to_vec(),
                then_expr: terms.join(" + "),
            });
        }
    }
}

/// Renders a `agg(CASE WHEN (AND-of-conditions) THEN (rescaled linear
/// combination) ... END)` expression for one tree, under `aggregation`,
/// assuming the peripheral table is aliased `alias` in the enclosing query.
/// `ts`, when the tree may contain `_ts`/`TimeStampsDiff`/`TimeStampsWindow`
/// splits, supplies the two timestamp columns those splits are rendered
/// against via `dialect.make_time_stamp_diff`.
pub fn tree_to_sql(
    tree: &DecisionTree,
    dialect: &dyn Dialect,
    aggregation: Aggregation,
    alias: &str,
    ts: Option<TimeStampRef>,
) -> String {
    let mut paths = Vec::new();
    walk(tree, tree.root(), alias, dialect, ts, &[], &mut paths);

    let case_arms: Vec<String> = paths
        .iter()
        .map(|p| {
            if p.conditions.is_empty() {
                format!("THEN {}", p.then_expr)
            } else {
                format!("WHEN {} THEN {}", p.conditions.join(" AND "), p.then_expr)
            }
        })
        .collect();

    let case_expr = if case_arms.len() == 1 && paths[0].conditions.is_empty() {
        paths[0].then_expr.clone()
    } else {
        format!("CASE {} END", case_arms.join(" "))
    };

    dialect.aggregation(aggregation.sql_name(), &case_expr, None)
}

/// Renders one feature as a correlated subquery: the peripheral table
/// joined back to the population row via `join`'s join-key and time-stamp
/// columns (assembled through `Dialect::make_joins`/`make_time_stamps`),
/// selecting the tree's `agg(CASE ...)` expression.
#[allow(clippy::too_many_arguments)]
pub fn feature_to_sql(
    tree: &DecisionTree,
    dialect: &dyn Dialect,
    aggregation: Aggregation,
    population_alias: &str,
    peripheral_table: &str,
    peripheral_alias: &str,
    join: &JoinSpec,
    feature_alias: &str,
) -> String {
    let ts = match (&join.population_time_stamp, &join.peripheral_time_stamp) {
        (Some(out_ts), Some(in_ts)) => Some(TimeStampRef {
            out_ts: out_ts.as_str(),
            in_ts: in_ts.as_str(),
        }),
        _ => None,
    };

    let agg_expr = tree_to_sql(tree, dialect, aggregation, peripheral_alias, ts);

    let mut where_clauses = vec![dialect.make_joins(
        population_alias,
        peripheral_alias,
        &join.population_join_key,
        &join.peripheral_join_key,
    )];
    if let (Some(out_ts), Some(in_ts)) = (&join.population_time_stamp, &join.peripheral_time_stamp) {
        where_clauses.push(dialect.make_time_stamps(
            out_ts,
            in_ts,
            join.upper_time_stamp.as_deref(),
            population_alias,
            peripheral_alias,
            peripheral_alias,
        ));
    }

    format!(
        "(SELECT {agg} FROM {table} {alias} WHERE {where}) AS {feature_alias}",
        agg = agg_expr,
        table = dialect.quote(peripheral_table),
        alias = peripheral_alias,
        where = where_clauses.join(" AND "),
        feature_alias = dialect.quote(feature_alias),
    )
}

/// Renders a candidate's operand column as a plain SQL expression;
/// `COUNT`'s `not_applicable` source has no operand (`*`).
fn candidate_value_expr(value_source: &ValueSource, alias: &str) -> String {
    match value_source {
        ValueSource::NotApplicable => "*".to_string(),
        ValueSource::PeripheralNumerical(col)
        | ValueSource::PeripheralDiscrete(col)
        | ValueSource::PeripheralCategorical(col) => format!("{alias}.{col}"),
        ValueSource::SameUnitsNumerical { peripheral, .. } | ValueSource::SameUnitsDiscrete { peripheral, .. } => {
            format!("{alias}.{peripheral}")
        }
        ValueSource::TimeStampDiff => format!("{alias}.ts_diff"),
    }
}

/// Renders one autofeature candidate as a correlated subquery, the
/// non-tree counterpart of [`feature_to_sql`]: a plain `agg(column)` rather
/// than a `CASE`-routed leaf expression, since a candidate has no decision
/// tree of its own.
#[allow(clippy::too_many_arguments)]
pub fn candidate_to_sql(
    candidate: &Candidate,
    dialect: &dyn Dialect,
    population_alias: &str,
    peripheral_alias: &str,
    join: &JoinSpec,
    feature_alias: &str,
) -> String {
    let value_expr = candidate_value_expr(&candidate.value_source, peripheral_alias);
    let agg_expr = dialect.aggregation(candidate.aggregation.sql_name(), &value_expr, None);

    let mut where_clauses = vec![dialect.make_joins(
        population_alias,
        peripheral_alias,
        &join.population_join_key,
        &join.peripheral_join_key,
    )];
    if let (Some(out_ts), Some(in_ts)) = (&join.population_time_stamp, &join.peripheral_time_stamp) {
        where_clauses.push(dialect.make_time_stamps(
            out_ts,
            in_ts,
            join.upper_time_stamp.as_deref(),
            population_alias,
            peripheral_alias,
            peripheral_alias,
        ));
    }

    format!(
        "(SELECT {agg} FROM {table} {alias} WHERE {where}) AS {feature_alias}",
        agg = agg_expr,
        table = dialect.quote(&candidate.peripheral_table),
        alias = peripheral_alias,
        where = where_clauses.join(" AND "),
        feature_alias = dialect.quote(feature_alias),
    )
}

/// Renders one ensemble member's tree as a bare `CASE WHEN ... END`
/// expression (no outer aggregation, unlike [`tree_to_sql`]): the ensemble
/// operates on already-realized per-row feature columns, not per-match
/// peripheral rows, so there is nothing to aggregate over here.
fn tree_case_expr(tree: &DecisionTree, alias: &str, dialect: &dyn Dialect) -> String {
    let mut paths = Vec::new();
    walk(tree, tree.root(), alias, dialect, None, &[], &mut paths);

    let case_arms: Vec<String> = paths
        .iter()
        .map(|p| {
            if p.conditions.is_empty() {
                format!("THEN {}", p.then_expr)
            } else {
                format!("WHEN {} THEN {}", p.conditions.join(" AND "), p.then_expr)
            }
        })
        .collect();

    if case_arms.len() == 1 && paths[0].conditions.is_empty() {
        paths[0].then_expr.clone()
    } else {
        format!("CASE {} END", case_arms.join(" "))
    }
}

/// Renders a fitted ensemble's prediction as `eta_1 * (CASE ...) + eta_2 *
/// (CASE ...) + ...`, one arm per member, matching `Ensemble::predict_row`.
pub fn ensemble_to_sql(ensemble: &Ensemble, alias: &str, dialect: &dyn Dialect) -> String {
    let terms: Vec<String> = ensemble
        .members()
        .iter()
        .map(|m| format!("{} * ({})", m.update_rate, tree_case_expr(&m.tree, alias, dialect)))
        .collect();
    if terms.is_empty() {
        "0".to_string()
    } else {
        terms.join(" + ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Hyperparameters;
    use crate::split::{DataUsed, Split, SplitCriterion};
    use crate::tree::{fit_tree, DecisionTree, FeatureInput, FitInput, Node, NodeId};
    use std::collections::HashMap;

    #[test]
    fn renders_a_case_expression_with_one_arm_per_leaf() {
        let mut hp = Hyperparameters::default();
        hp.max_depth = 2;
        hp.min_num_samples = 1;
        hp.regularization = 1e-6;

        let input = FitInput {
            g: vec![10.0, 10.0, -10.0, -10.0],
            h: vec![1.0; 4],
            features: vec![FeatureInput {
                name: "amount".into(),
                data_used: DataUsed::NumericalInput,
                column_index: 0,
                values: vec![1.0, 2.0, 8.0, 9.0],
                is_categorical: false,
                word_ids: None,
            }],
        };
        let tree = fit_tree(&input, &hp);

        let sql = tree_to_sql(&tree, &AnsiDialect, Aggregation::Sum, "t", None);
        assert!(sql.starts_with("SUM("));
    }

    /// A single-split tree over a `TimeStampsDiff` feature must route
    /// through `make_time_stamp_diff` (spec §8 scenario 6), not a plain
    /// `column > threshold` subtraction.
    #[test]
    fn time_stamps_diff_split_renders_via_dialect_helper() {
        let split = Split::new(
            DataUsed::TimeStampsDiff,
            0,
            "ts_diff",
            SplitCriterion::Threshold(172_800.0),
        );
        let nodes = vec![
            Node::Interior {
                split,
                greater: NodeId(1),
                smaller: NodeId(2),
            },
            Node::Leaf {
                intercept: 1.0,
                weights: Vec::new(),
            },
            Node::Leaf {
                intercept: 0.0,
                weights: Vec::new(),
            },
        ];
        let tree = DecisionTree::from_arena(nodes, NodeId(0), HashMap::new());

        let ts = TimeStampRef {
            out_ts: "p.order_date",
            in_ts: "t.event_date",
        };
        let sql = tree_to_sql(&tree, &AnsiDialect, Aggregation::Sum, "t", Some(ts));
        assert!(sql.contains("EXTRACT(EPOCH FROM"));
        assert!(sql.contains("p.order_date"));
        assert!(sql.contains("t.event_date"));
        assert!(!sql.contains("t.ts_diff"));
    }

    #[test]
    fn feature_to_sql_assembles_join_and_time_stamp_clauses() {
        let nodes = vec![Node::Leaf {
            intercept: 1.0,
            weights: Vec::new(),
        }];
        let tree = DecisionTree::from_arena(nodes, NodeId(0), HashMap::new());
        let sql = feature_to_sql(
            &tree,
            &AnsiDialect,
            Aggregation::Count,
            "p",
            "transactions",
            "t",
            &JoinSpec {
                population_join_key: "customer_id".into(),
                peripheral_join_key: "customer_id".into(),
                population_time_stamp: Some("order_date".into()),
                peripheral_time_stamp: Some("event_date".into()),
                upper_time_stamp: None,
                allow_lagged_targets: false,
                propositionalization: false,
            },
            "num_transactions",
        );
        assert!(sql.contains("p.customer_id"));
        assert!(sql.contains("t.customer_id"));
        assert!(sql.contains("t.event_date <= p.order_date"));
        assert!(sql.contains("\"transactions\""));
    }

    /// A ternary `time_stamps_window` split must render three mutually
    /// exclusive CASE arms, each referencing `make_time_stamp_diff`.
    #[test]
    fn window_split_renders_three_case_arms() {
        let split = Split::new(
            DataUsed::TimeStampsWindow,
            0,
            "ts_diff",
            SplitCriterion::Window {
                lower: 0.0,
                upper: 172_800.0,
            },
        );
        let nodes = vec![
            Node::Interior3 {
                split,
                pre_window: NodeId(1),
                in_window: NodeId(2),
                post_window: NodeId(3),
            },
            Node::Leaf {
                intercept: 1.0,
                weights: Vec::new(),
            },
            Node::Leaf {
                intercept: 2.0,
                weights: Vec::new(),
            },
            Node::Leaf {
                intercept: 3.0,
                weights: Vec::new(),
            },
        ];
        let tree = DecisionTree::from_arena(nodes, NodeId(0), HashMap::new());

        let ts = TimeStampRef {
            out_ts: "p.order_date",
            in_ts: "t.event_date",
        };
        let sql = tree_to_sql(&tree, &AnsiDialect, Aggregation::Sum, "t", Some(ts));
        assert_eq!(sql.matches("WHEN").count(), 3);
        assert!(sql.contains("EXTRACT(EPOCH FROM"));
    }

    #[test]
    fn candidate_to_sql_renders_a_plain_aggregation_subquery() {
        let candidate = Candidate {
            peripheral_table: "transactions".into(),
            aggregation: Aggregation::Sum,
            value_source: ValueSource::PeripheralNumerical("amount".into()),
        };
        let sql = candidate_to_sql(
            &candidate,
            &AnsiDialect,
            "p",
            "t",
            &JoinSpec {
                population_join_key: "customer_id".into(),
                peripheral_join_key: "customer_id".into(),
                population_time_stamp: None,
                peripheral_time_stamp: None,
                upper_time_stamp: None,
                allow_lagged_targets: false,
                propositionalization: false,
            },
            "sum_amount",
        );
        assert!(sql.contains("SUM(t.amount)"));
        assert!(sql.contains("p.customer_id"));
        assert!(sql.contains("\"sum_amount\""));
    }

    #[test]
    fn ensemble_to_sql_sums_one_term_per_member() {
        let mut hp = Hyperparameters::default();
        hp.max_depth = 1;
        hp.min_num_samples = 1;
        hp.regularization = 1e-6;
        hp.num_rounds = 1;
        hp.num_trees = 1;

        let input = FitInput {
            g: vec![10.0, 10.0, -10.0, -10.0],
            h: vec![1.0; 4],
            features: vec![FeatureInput {
                name: "sum_amount".into(),
                data_used: DataUsed::NumericalInput,
                column_index: 0,
                values: vec![1.0, 2.0, 8.0, 9.0],
                is_categorical: false,
                word_ids: None,
            }],
        };
        let tree = fit_tree(&input, &hp);
        let ensemble = crate::ensemble::Ensemble::from_members(vec![crate::ensemble::EnsembleMember {
            tree,
            update_rate: 0.3,
        }]);

        let sql = ensemble_to_sql(&ensemble, "f", &AnsiDialect);
        assert!(sql.contains("0.3 * ("));
        assert!(sql.contains("f.sum_amount"));
    }
}
