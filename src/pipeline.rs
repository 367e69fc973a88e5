//! Pipeline: an ordered feature-learning stage (autofeatures realized over
//! the schema's join tree) feeding one boosting ensemble per target, with a
//! fingerprint-keyed cache so refitting an unchanged schema/data pair is a
//! no-op.

use crate::autofeatures::realize_candidate;
use crate::candidates::{enumerate_candidates, select_candidates, Candidate};
use crate::config::Hyperparameters;
use crate::dataframe::DataFrame;
use crate::ensemble::{fit_ensemble, Ensemble, FeatureSource};
use crate::error::{Error, Result};
use crate::loss::Task;
use crate::mapping::{build_all_mappings, CategoryMapping};
use crate::same_units::find_same_units;
use crate::schema::{JoinSpec, Placeholder};
use crate::split::DataUsed;
use crate::sql::{candidate_to_sql, ensemble_to_sql, Dialect};
use crate::tree::{DecisionTree, FeatureInput, Node, NodeId};
use rustc_hash::FxHashMap;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// One realized autofeature column, carrying enough provenance to route it
/// back to the peripheral table/column it came from for importance
/// reporting, and to re-render the candidate it was realized from as SQL.
struct Autofeature {
    name: String,
    peripheral_table: String,
    join: JoinSpec,
    candidate: Candidate,
    values: Vec<f64>,
}

/// Everything [`Pipeline::to_sql`] needs to re-render one autofeature
/// column as a correlated subquery, stripped of the realized values a
/// fitted `Pipeline` no longer needs to keep around.
#[derive(Clone)]
struct AutofeatureDef {
    name: String,
    peripheral_table: String,
    join: JoinSpec,
    candidate: Candidate,
}

/// Opaque cache key covering the schema shape, hyperparameters, and input
/// table sizes; identical inputs hash identically so `fit` can skip
/// re-learning an already-cached feature set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    fn compute(root: &Placeholder, hyperparameters: &Hyperparameters, table_heights: &[(String, usize)]) -> Self {
        let mut hasher = DefaultHasher::new();
        format!("{root:?}").hash(&mut hasher);
        serde_json::to_string(hyperparameters).unwrap_or_default().hash(&mut hasher);
        for (name, height) in table_heights {
            name.hash(&mut hasher);
            height.hash(&mut hasher);
        }
        Fingerprint(hasher.finish())
    }
}

/// Per-feature and per-source-column importances, normalized to sum to 1.0
/// (or left empty when the ensemble has no splits yet).
#[derive(Debug, Clone, Default)]
pub struct Importances {
    pub feature_importance: HashMap<String, f64>,
    pub column_importance: HashMap<String, f64>,
}

struct PrecomputedFeatureSource {
    features: Vec<FeatureInput>,
    rounds_remaining: usize,
}

impl FeatureSource for PrecomputedFeatureSource {
    fn build_features(&mut self, _round: usize) -> Vec<FeatureInput> {
        if self.rounds_remaining == 0 {
            return Vec::new();
        }
        self.rounds_remaining -= 1;
        self.features.clone()
    }
}

/// A fitted model for one target: the ensemble plus the importances derived
/// from it.
#[derive(Debug, Clone)]
pub struct FittedTarget {
    pub ensemble: Ensemble,
    pub importances_cached: bool,
}

/// Holds the schema, hyperparameters, and one fitted ensemble per target.
/// `fit` realizes autofeatures from the join tree, trains an ensemble per
/// target column, and caches the result under a [`Fingerprint`] so a
/// second `fit` call against unchanged inputs is a cache hit.
pub struct Pipeline {
    root: Placeholder,
    hyperparameters: Hyperparameters,
    fingerprint: Option<Fingerprint>,
    targets: Vec<String>,
    ensembles: HashMap<String, Ensemble>,
    autofeature_names: Vec<String>,
    autofeature_sources: HashMap<String, String>,
    autofeature_defs: Vec<AutofeatureDef>,
    mappings: HashMap<String, Vec<(String, CategoryMapping)>>,
}

impl Pipeline {
    pub fn new(root: Placeholder, hyperparameters: Hyperparameters, targets: Vec<String>) -> Self {
        Self {
            root,
            hyperparameters,
            fingerprint: None,
            targets,
            ensembles: HashMap::new(),
            autofeature_names: Vec::new(),
            autofeature_sources: HashMap::new(),
            autofeature_defs: Vec::new(),
            mappings: HashMap::new(),
        }
    }

    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.fingerprint
    }

    /// Realizes every candidate along the schema's join edges into a
    /// `population.height()`-long column.
    fn build_autofeatures(&self, population: &DataFrame, peripherals: &HashMap<String, DataFrame>) -> Result<Vec<Autofeature>> {
        let mut out = Vec::new();
        for (join, child) in self.root.walk() {
            let peripheral = peripherals
                .get(&child.table_name)
                .ok_or_else(|| Error::invalid(format!("no peripheral table registered for '{}'", child.table_name)))?;

            let same_units = find_same_units(population, peripheral);
            let all_candidates = enumerate_candidates(&child.table_name, peripheral, &same_units, &self.hyperparameters);
            let selected = select_candidates(all_candidates, &self.hyperparameters, None);

            for (ix, candidate) in selected.iter().enumerate() {
                let values = realize_candidate(population, peripheral, join, candidate)?;
                let name = format!("{}__{:?}__{ix}", child.table_name, candidate.aggregation);
                out.push(Autofeature {
                    name,
                    peripheral_table: child.table_name.clone(),
                    join: join.clone(),
                    candidate: candidate.clone(),
                    values,
                });
            }
        }
        Ok(out)
    }

    /// Step 1 (validate) through step 3 (fit predictors) of the pipeline's
    /// fit: validates the schema, checks the fingerprint cache, generates
    /// autofeatures, joins them with the population's own numerical
    /// columns, and boosts one ensemble per target.
    pub fn fit(
        &mut self,
        population: &DataFrame,
        peripherals: &HashMap<String, DataFrame>,
        population_columns: &[String],
    ) -> Result<()> {
        self.root.validate()?;

        let mut table_heights: Vec<(String, usize)> = vec![(population.name().to_string(), population.height())];
        for (join, child) in self.root.walk() {
            let _ = join;
            if let Some(p) = peripherals.get(&child.table_name) {
                table_heights.push((child.table_name.clone(), p.height()));
            }
        }
        let fingerprint = Fingerprint::compute(&self.root, &self.hyperparameters, &table_heights);
        if self.fingerprint == Some(fingerprint) && !self.ensembles.is_empty() {
            return Ok(());
        }

        let autofeatures = self.build_autofeatures(population, peripherals)?;
        self.autofeature_names = autofeatures.iter().map(|a| a.name.clone()).collect();
        self.autofeature_sources = autofeatures
            .iter()
            .map(|a| (a.name.clone(), a.peripheral_table.clone()))
            .collect();
        self.autofeature_defs = autofeatures
            .iter()
            .map(|a| AutofeatureDef {
                name: a.name.clone(),
                peripheral_table: a.peripheral_table.clone(),
                join: a.join.clone(),
                candidate: a.candidate.clone(),
            })
            .collect();

        let mut feature_inputs: Vec<FeatureInput> = autofeatures
            .iter()
            .enumerate()
            .map(|(ix, a)| FeatureInput {
                name: a.name.clone(),
                data_used: DataUsed::NumericalInput,
                column_index: ix,
                values: a.values.clone(),
                is_categorical: false,
                word_ids: None,
            })
            .collect();

        for (ix, column_name) in population_columns.iter().enumerate() {
            let crate::dataframe::ColumnRef::Numerical(c) = population.get(column_name)? else {
                return Err(Error::invalid(format!("'{column_name}' is not a numerical population column")));
            };
            feature_inputs.push(FeatureInput {
                name: column_name.clone(),
                data_used: DataUsed::NumericalOutput,
                column_index: feature_inputs.len() + ix,
                values: c.to_vec(),
                is_categorical: false,
                word_ids: None,
            });
        }

        for target_name in self.targets.clone() {
            let crate::dataframe::ColumnRef::Target(target) = population.get(&target_name)? else {
                return Err(Error::invalid(format!("'{target_name}' is not a target column")));
            };
            let y: Vec<f64> = target.to_vec();

            let mut source = PrecomputedFeatureSource {
                features: feature_inputs.clone(),
                rounds_remaining: self.hyperparameters.num_rounds,
            };
            let (ensemble, _loss_state) = fit_ensemble(Task::Regression, y.clone(), None, &mut source, &self.hyperparameters);
            self.ensembles.insert(target_name.clone(), ensemble);

            for (join, child) in self.root.walk() {
                if let Some(peripheral) = peripherals.get(&child.table_name) {
                    let mappings = build_all_mappings(
                        &self.root,
                        population,
                        peripheral,
                        &child.table_name,
                        target,
                        self.hyperparameters.min_document_frequency,
                    )?;
                    let _ = join;
                    self.mappings.insert(child.table_name.clone(), mappings);
                }
            }
        }

        self.fingerprint = Some(fingerprint);
        Ok(())
    }

    /// Replays the fitted ensembles over a fresh population/peripheral set,
    /// assuming the caller re-derives the same autofeature columns (i.e.
    /// the schema and candidate selection are unchanged since `fit`).
    pub fn transform(&self, population: &DataFrame, peripherals: &HashMap<String, DataFrame>) -> Result<HashMap<String, Vec<f64>>> {
        if self.ensembles.is_empty() {
            return Err(Error::NotFitted("Pipeline".to_string()));
        }
        let autofeatures = self.build_autofeatures(population, peripherals)?;
        let by_name: FxHashMap<&str, &Autofeature> = autofeatures.iter().map(|a| (a.name.as_str(), a)).collect();

        let mut out = HashMap::new();
        for (target_name, ensemble) in &self.ensembles {
            let mut predictions = Vec::with_capacity(population.height());
            for row in 0..population.height() {
                let mut features = HashMap::new();
                for name in &self.autofeature_names {
                    if let Some(a) = by_name.get(name.as_str()) {
                        features.insert(name.clone(), a.values[row]);
                    }
                }
                predictions.push(ensemble.predict_row(&features));
            }
            out.insert(target_name.clone(), predictions);
        }
        Ok(out)
    }

    /// Scores every target via [`crate::metrics::Rmse`], delegating all
    /// numerical work to the metrics module.
    pub fn score(&self, predictions: &HashMap<String, Vec<f64>>, targets: &HashMap<String, Vec<f64>>) -> Result<HashMap<String, f64>> {
        let mut out = HashMap::new();
        for (name, predicted) in predictions {
            if let Some(actual) = targets.get(name) {
                let rmse = crate::metrics::Rmse::score(predicted, actual, None)?;
                out.insert(name.clone(), rmse.value);
            }
        }
        Ok(out)
    }

    /// Sums, per autofeature and per source peripheral table, the number of
    /// splits that test it across every tree in every ensemble, weighted by
    /// the tree's update rate — a coarse stand-in for the reduction-weighted
    /// importance the boosting loop already discards once a split is made.
    pub fn importances(&self) -> Importances {
        let mut feature_importance: HashMap<String, f64> = HashMap::new();
        let mut column_importance: HashMap<String, f64> = HashMap::new();

        for ensemble in self.ensembles.values() {
            for member in ensemble.members() {
                accumulate_importance(&member.tree, member.update_rate, &mut feature_importance);
            }
        }

        let total: f64 = feature_importance.values().sum();
        if total > 0.0 {
            for v in feature_importance.values_mut() {
                *v /= total;
            }
        }

        for (name, weight) in &feature_importance {
            if let Some(table) = self.autofeature_sources.get(name) {
                *column_importance.entry(table.clone()).or_insert(0.0) += weight;
            }
        }

        Importances {
            feature_importance,
            column_importance,
        }
    }

    /// Renders the fitted pipeline as a single `WITH`-query: one CTE column
    /// per autofeature candidate (via [`candidate_to_sql`]), plus the raw
    /// population columns the ensemble was also trained on, with the final
    /// `SELECT` computing `target_name` from [`ensemble_to_sql`]. Population
    /// rows are aliased `p` and every peripheral table its own join's
    /// `candidate.peripheral_table` value.
    pub fn to_sql(&self, target: &str, dialect: &dyn Dialect, population_columns: &[String]) -> Result<String> {
        let ensemble = self
            .ensembles
            .get(target)
            .ok_or_else(|| Error::NotFitted("Pipeline".to_string()))?;

        let population_alias = "p";
        let mut feature_columns: Vec<String> = Vec::new();
        for def in &self.autofeature_defs {
            let rendered = candidate_to_sql(
                &def.candidate,
                dialect,
                population_alias,
                &def.peripheral_table,
                &def.join,
                &def.name,
            );
            feature_columns.push(rendered);
        }
        for column_name in population_columns {
            feature_columns.push(format!(
                "{population_alias}.{column_name} AS {}",
                dialect.quote(column_name)
            ));
        }

        let cte = format!(
            "features AS (SELECT {cols} FROM {table} {alias})",
            cols = feature_columns.join(", "),
            table = dialect.quote(&self.root.table_name),
            alias = population_alias,
        );

        let prediction_expr = ensemble_to_sql(ensemble, "features", dialect);

        Ok(format!(
            "WITH {cte} SELECT {expr} AS {target_alias} FROM features",
            expr = prediction_expr,
            target_alias = dialect.quote(target),
        ))
    }
}

fn accumulate_importance(tree: &DecisionTree, weight: f64, out: &mut HashMap<String, f64>) {
    for i in 0..tree.num_nodes() {
        match tree.node(NodeId(i as u32)) {
            Node::Interior { split, .. } | Node::Interior3 { split, .. } => {
                *out.entry(split.feature_name.clone()).or_insert(0.0) += weight;
            }
            Node::Leaf { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{Column, StringColumn};
    use crate::encoding::Encoding;
    use crate::schema::JoinSpec;

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

    fn build_tables() -> (Encoding, DataFrame, HashMap<String, DataFrame>) {
        let enc = Encoding::new();
        let mut pop = DataFrame::new("pop", enc.clone());
        pop.add_join_key(StringColumn::from_strings(
            "jk",
            &["1".into(), "1".into(), "2".into(), "2".into()],
            &enc,
        ))
        .unwrap();
        pop.add_target(Column::from_vec("y", vec![3.0, 3.0, 16.0, 16.0])).unwrap();

        let mut perip = DataFrame::new("transactions", enc.clone());
        perip
            .add_join_key(StringColumn::from_strings(
                "jk",
                &["1".into(), "1".into(), "2".into(), "2".into(), "2".into()],
                &enc,
            ))
            .unwrap();
        perip
            .add_numerical(Column::from_vec("amount", vec![1.0, 2.0, 4.0, 6.0, 6.0]))
            .unwrap();

        let mut peripherals = HashMap::new();
        peripherals.insert("transactions".to_string(), perip);
        (enc, pop, peripherals)
    }

    #[test]
    fn fit_produces_an_ensemble_per_target() {
        let (_enc, pop, peripherals) = build_tables();
        let root = Placeholder::leaf("pop").with_child(join(), Placeholder::leaf("transactions"));

        let mut hp = Hyperparameters::default();
        hp.num_rounds = 2;
        hp.num_trees = 1;
        hp.max_depth = 2;
        hp.min_num_samples = 1;
        hp.regularization = 1e-6;
        hp.aggregations = vec![crate::aggregation::Aggregation::Sum];

        let mut pipeline = Pipeline::new(root, hp, vec!["y".to_string()]);
        pipeline.fit(&pop, &peripherals, &[]).unwrap();
        assert!(!pipeline.ensembles.is_empty());

        let predictions = pipeline.transform(&pop, &peripherals).unwrap();
        assert_eq!(predictions["y"].len(), 4);
    }

    #[test]
    fn refitting_unchanged_inputs_is_a_cache_hit() {
        let (_enc, pop, peripherals) = build_tables();
        let root = Placeholder::leaf("pop").with_child(join(), Placeholder::leaf("transactions"));
        let mut hp = Hyperparameters::default();
        hp.num_rounds = 1;
        hp.num_trees = 1;
        hp.max_depth = 1;
        hp.min_num_samples = 1;
        hp.regularization = 1e-6;

        let mut pipeline = Pipeline::new(root, hp, vec!["y".to_string()]);
        pipeline.fit(&pop, &peripherals, &[]).unwrap();
        let first_fingerprint = pipeline.fingerprint();
        pipeline.fit(&pop, &peripherals, &[]).unwrap();
        assert_eq!(pipeline.fingerprint(), first_fingerprint);
    }

    #[test]
    fn transform_before_fit_errors() {
        let (_enc, pop, peripherals) = build_tables();
        let root = Placeholder::leaf("pop").with_child(join(), Placeholder::leaf("transactions"));
        let pipeline = Pipeline::new(root, Hyperparameters::default(), vec!["y".to_string()]);
        assert!(pipeline.transform(&pop, &peripherals).is_err());
    }

    #[test]
    fn to_sql_renders_a_with_query_over_the_fitted_ensemble() {
        let (_enc, pop, peripherals) = build_tables();
        let root = Placeholder::leaf("pop").with_child(join(), Placeholder::leaf("transactions"));

        let mut hp = Hyperparameters::default();
        hp.num_rounds = 1;
        hp.num_trees = 1;
        hp.max_depth = 1;
        hp.min_num_samples = 1;
        hp.regularization = 1e-6;
        hp.aggregations = vec![crate::aggregation::Aggregation::Sum];

        let mut pipeline = Pipeline::new(root, hp, vec!["y".to_string()]);
        pipeline.fit(&pop, &peripherals, &[]).unwrap();

        let sql = pipeline.to_sql("y", &crate::sql::AnsiDialect, &[]).unwrap();
        assert!(sql.starts_with("WITH features AS"));
        assert!(sql.contains("SUM(transactions.amount)"));
        assert!(sql.contains("\"y\""));
    }

    #[test]
    fn to_sql_before_fit_errors() {
        let root = Placeholder::leaf("pop").with_child(join(), Placeholder::leaf("transactions"));
        let pipeline = Pipeline::new(root, Hyperparameters::default(), vec!["y".to_string()]);
        assert!(pipeline.to_sql("y", &crate::sql::AnsiDialect, &[]).is_err());
    }
}
