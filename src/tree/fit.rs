//! Recursive candidate-split search and leaf weight solve.

use super::{DecisionTree, Node, NodeId, Standardization};
use crate::config::Hyperparameters;
use crate::loss::candidate_reduction;
use crate::split::{DataUsed, Split, SplitCriterion};
use std::collections::HashMap;

/// One numerical/discrete feature column available at a node, tagged with
/// the [`DataUsed`] family it belongs to for tie-break ranking.
#[derive(Debug, Clone)]
pub struct FeatureInput {
    pub name: String,
    pub data_used: DataUsed,
    pub column_index: usize,
    pub values: Vec<f64>,
    /// Categorical features are tested by per-value membership rather
    /// than by threshold; values are still carried as `f64`-encoded ids.
    pub is_categorical: bool,
    /// Per-row distinct word ids, for `text_input`/`text_output` features
    /// tested via [`crate::split::SplitCriterion::WordSet`] membership
    /// rather than a scalar threshold or category id. `None` for every
    /// other family.
    pub word_ids: Option<Vec<Vec<i64>>>,
}

/// Everything one call to [`fit_tree`] needs: matched rows' gradients,
/// hessians, and candidate feature columns (all same length).
pub struct FitInput {
    pub g: Vec<f64>,
    pub h: Vec<f64>,
    pub features: Vec<FeatureInput>,
}

struct Builder<'a> {
    hyperparameters: &'a Hyperparameters,
    nodes: Vec<Node>,
    standardization: HashMap<String, Standardization>,
}

struct SplitCandidate {
    feature_ix: usize,
    criterion: SplitCriterion,
    reduction: f64,
    tie_rank: (u8, usize),
}

impl<'a> Builder<'a> {
    fn push_leaf(&mut self, intercept: f64, weights: Vec<(String, f64)>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::Leaf { intercept, weights });
        id
    }

    fn push_interior(&mut self, split: Split, greater: NodeId, smaller: NodeId) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::Interior {
            split,
            greater,
            smaller,
        });
        id
    }

    fn push_interior3(
        &mut self,
        split: Split,
        pre_window: NodeId,
        in_window: NodeId,
        post_window: NodeId,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::Interior3 {
            split,
            pre_window,
            in_window,
            post_window,
        });
        id
    }

    /// Evaluates a single numerical/discrete threshold candidate across
    /// `grid_factor * ceil(sqrt(n))` bins.
    fn best_threshold(&self, feature: &FeatureInput, g: &[f64], h: &[f64]) -> Option<SplitCandidate> {
        let n = feature.values.len();
        if n == 0 {
            return None;
        }
        let mut sorted: Vec<f64> = feature
            .values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        sorted.dedup();
        let num_bins = ((n as f64).sqrt().ceil() * self.hyperparameters.grid_factor).max(1.0) as usize;
        let step = (sorted.len().max(1)) / num_bins.max(1);
        let step = step.max(1);

        let total_g: f64 = g.iter().sum();
        let total_h: f64 = h.iter().sum();

        let mut best: Option<SplitCandidate> = None;
        let mut i = 0;
        while i < sorted.len() {
            let threshold = sorted[i];
            let mut sum_g_greater = 0.0;
            let mut sum_h_greater = 0.0;
            for row in 0..n {
                let v = feature.values[row];
                if v.is_finite() && v > threshold {
                    sum_g_greater += g[row];
                    sum_h_greater += h[row];
                }
            }
            let sum_g_smaller = total_g - sum_g_greater;
            let sum_h_smaller = total_h - sum_h_greater;
            let reduction = candidate_reduction(
                sum_g_greater,
                sum_h_greater,
                sum_g_smaller,
                sum_h_smaller,
                self.hyperparameters.regularization,
            );
            let candidate = SplitCandidate {
                feature_ix: 0,
                criterion: SplitCriterion::Threshold(threshold),
                reduction,
                tie_rank: (feature.data_used.tie_break_rank(), feature.column_index),
            };
            best = Some(pick_better(best, candidate));
            i += step;
        }
        best
    }

    /// Evaluates single-category splits, then greedily grows the winning
    /// category into a set (up to `allow_sets` members) as long as adding
    /// the next-best remaining category keeps improving the reduction.
    fn best_category_split(&self, feature: &FeatureInput, g: &[f64], h: &[f64]) -> Option<SplitCandidate> {
        let mut categories: Vec<i64> = feature.values.iter().map(|v| *v as i64).collect();
        categories.sort_unstable();
        categories.dedup();
        if categories.len() < 2 {
            return None;
        }

        let total_g: f64 = g.iter().sum();
        let total_h: f64 = h.iter().sum();

        let reduction_for = |set: &[i64]| -> f64 {
            let mut sum_g_in = 0.0;
            let mut sum_h_in = 0.0;
            for row in 0..feature.values.len() {
                if set.contains(&(feature.values[row] as i64)) {
                    sum_g_in += g[row];
                    sum_h_in += h[row];
                }
            }
            candidate_reduction(
                sum_g_in,
                sum_h_in,
                total_g - sum_g_in,
                total_h - sum_h_in,
                self.hyperparameters.regularization,
            )
        };

        let mut best_set = vec![categories[0]];
        let mut best_reduction = reduction_for(&best_set);
        for &cat in &categories[1..] {
            let r = reduction_for(&[cat]);
            if r > best_reduction {
                best_reduction = r;
                best_set = vec![cat];
            }
        }

        let max_set = self.hyperparameters.allow_sets.max(1);
        while best_set.len() < max_set {
            let mut grown: Option<(i64, f64)> = None;
            for &cat in &categories {
                if best_set.contains(&cat) {
                    continue;
                }
                let mut candidate_set = best_set.clone();
                candidate_set.push(cat);
                let r = reduction_for(&candidate_set);
                if r > grown.map(|(_, gr)| gr).unwrap_or(best_reduction) {
                    grown = Some((cat, r));
                }
            }
            match grown {
                Some((cat, r)) => {
                    best_set.push(cat);
                    best_reduction = r;
                }
                None => break,
            }
        }

        Some(SplitCandidate {
            feature_ix: 0,
            criterion: SplitCriterion::CategorySet(best_set),
            reduction: best_reduction,
            tie_rank: (feature.data_used.tie_break_rank(), feature.column_index),
        })
    }

    /// Evaluates single-word `WordSet` membership splits across the
    /// row-set's vocabulary, the text counterpart of [`Self::best_category_split`]
    /// without the set-growing step (a matched word's mapped signal is
    /// already folded into the feature value by [`crate::mapping`]; the
    /// tree only needs to ask "does this row contain word W").
    fn best_word_split(
        &self,
        feature: &FeatureInput,
        word_ids: &[Vec<i64>],
        g: &[f64],
        h: &[f64],
    ) -> Option<SplitCandidate> {
        let mut vocabulary: std::collections::BTreeSet<i64> = std::collections::BTreeSet::new();
        for row_words in word_ids {
            vocabulary.extend(row_words.iter().copied());
        }
        if vocabulary.len() < 2 {
            return None;
        }

        let total_g: f64 = g.iter().sum();
        let total_h: f64 = h.iter().sum();

        let mut best: Option<SplitCandidate> = None;
        for &word in &vocabulary {
            let mut sum_g_in = 0.0;
            let mut sum_h_in = 0.0;
            for row in 0..word_ids.len() {
                if word_ids[row].contains(&word) {
                    sum_g_in += g[row];
                    sum_h_in += h[row];
                }
            }
            let reduction = candidate_reduction(
                sum_g_in,
                sum_h_in,
                total_g - sum_g_in,
                total_h - sum_h_in,
                self.hyperparameters.regularization,
            );
            let candidate = SplitCandidate {
                feature_ix: 0,
                criterion: SplitCriterion::WordSet(vec![word]),
                reduction,
                tie_rank: (feature.data_used.tie_break_rank(), feature.column_index),
            };
            best = Some(pick_better(best, candidate));
        }
        best
    }

    /// Evaluates `time_stamps_window` ternary splits: every `(lower,
    /// upper)` pair drawn from the same grid-binned boundary set as
    /// [`Self::best_threshold`], scored via
    /// [`crate::loss::candidate_reduction_three`] over the resulting
    /// pre/inside/post-window partitions.
    fn best_window_split(&self, feature: &FeatureInput, g: &[f64], h: &[f64]) -> Option<SplitCandidate> {
        let n = feature.values.len();
        if n == 0 {
            return None;
        }
        let mut sorted: Vec<f64> = feature.values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        sorted.dedup();
        if sorted.len() < 2 {
            return None;
        }
        let num_bins = ((n as f64).sqrt().ceil() * self.hyperparameters.grid_factor).max(1.0) as usize;
        let step = (sorted.len().max(1)) / num_bins.max(1);
        let step = step.max(1);
        let boundaries: Vec<f64> = sorted.iter().copied().step_by(step).collect();
        if boundaries.len() < 2 {
            return None;
        }

        let mut best: Option<SplitCandidate> = None;
        for (li, &lower) in boundaries.iter().enumerate() {
            for &upper in &boundaries[li + 1..] {
                let mut sum_g = [0.0; 3];
                let mut sum_h = [0.0; 3];
                for row in 0..n {
                    let v = feature.values[row];
                    if !v.is_finite() {
                        continue;
                    }
                    let idx = if v < lower {
                        0
                    } else if v > upper {
                        2
                    } else {
                        1
                    };
                    sum_g[idx] += g[row];
                    sum_h[idx] += h[row];
                }
                let reduction = crate::loss::candidate_reduction_three(sum_g, sum_h, self.hyperparameters.regularization);
                let candidate = SplitCandidate {
                    feature_ix: 0,
                    criterion: SplitCriterion::Window { lower, upper },
                    reduction,
                    tie_rank: (feature.data_used.tie_break_rank(), feature.column_index),
                };
                best = Some(pick_better(best, candidate));
            }
        }
        best
    }

    fn fit_node(&mut self, input: &FitInput, rows: &[usize], depth: usize) -> NodeId {
        let n = rows.len();
        let g: Vec<f64> = rows.iter().map(|&r| input.g[r]).collect();
        let h: Vec<f64> = rows.iter().map(|&r| input.h[r]).collect();

        if depth >= self.hyperparameters.max_depth || n < self.hyperparameters.min_num_samples {
            return self.leaf_from(input, rows, &g, &h);
        }

        let mut best: Option<(usize, SplitCandidate)> = None;
        for (fi, feature) in input.features.iter().enumerate() {
            let node_values: Vec<f64> = rows.iter().map(|&r| feature.values[r]).collect();
            let node_word_ids: Option<Vec<Vec<i64>>> = feature
                .word_ids
                .as_ref()
                .map(|w| rows.iter().map(|&r| w[r].clone()).collect());
            let node_feature = FeatureInput {
                name: feature.name.clone(),
                data_used: feature.data_used,
                column_index: feature.column_index,
                values: node_values,
                is_categorical: feature.is_categorical,
                word_ids: node_word_ids,
            };
            let candidate = if let Some(word_ids) = &node_feature.word_ids {
                self.best_word_split(&node_feature, word_ids, &g, &h)
            } else if feature.is_categorical {
                self.best_category_split(&node_feature, &g, &h)
            } else {
                let threshold_candidate = self.best_threshold(&node_feature, &g, &h);
                if feature.data_used.is_time_window_family() {
                    let window_candidate = self.best_window_split(&node_feature, &g, &h);
                    match (threshold_candidate, window_candidate) {
                        (Some(t), Some(w)) => Some(pick_better(Some(t), w)),
                        (Some(t), None) => Some(t),
                        (None, Some(w)) => Some(w),
                        (None, None) => None,
                    }
                } else {
                    threshold_candidate
                }
            };
            if let Some(mut c) = candidate {
                c.feature_ix = fi;
                best = Some(match best {
                    None => (fi, c),
                    Some((bfi, bc)) => {
                        if is_strictly_better(&c, &bc) {
                            (fi, c)
                        } else {
                            (bfi, bc)
                        }
                    }
                });
            }
        }

        let Some((feature_ix, candidate)) = best else {
            return self.leaf_from(input, rows, &g, &h);
        };
        if candidate.reduction <= self.hyperparameters.regularization {
            return self.leaf_from(input, rows, &g, &h);
        }

        let feature = &input.features[feature_ix];

        if let SplitCriterion::Window { lower, upper } = candidate.criterion {
            let mut buckets: [Vec<usize>; 3] = [Vec::new(), Vec::new(), Vec::new()];
            for &r in rows {
                let v = feature.values[r];
                let idx = if !v.is_finite() {
                    1
                } else if v < lower {
                    0
                } else if v > upper {
                    2
                } else {
                    1
                };
                buckets[idx].push(r);
            }

            let nonempty = buckets.iter().filter(|b| !b.is_empty()).count();
            let mut sum_g = [0.0; 3];
            let mut sum_h = [0.0; 3];
            for k in 0..3 {
                for &r in &buckets[k] {
                    sum_g[k] += input.g[r];
                    sum_h[k] += input.h[r];
                }
            }
            let solves = crate::loss::solve_three_partition(sum_h, sum_g, self.hyperparameters.regularization);

            if nonempty >= 2 && solves.is_ok() {
                let split = Split::new(
                    feature.data_used,
                    feature.column_index,
                    feature.name.clone(),
                    SplitCriterion::Window { lower, upper },
                );
                let [pre_rows, in_rows, post_rows] = buckets;
                let pre_window = self.fit_node(input, &pre_rows, depth + 1);
                let in_window = self.fit_node(input, &in_rows, depth + 1);
                let post_window = self.fit_node(input, &post_rows, depth + 1);
                return self.push_interior3(split, pre_window, in_window, post_window);
            }
            return self.leaf_from(input, rows, &g, &h);
        }

        let (greater_rows, smaller_rows): (Vec<usize>, Vec<usize>) = rows.iter().copied().partition(|&r| {
            match &candidate.criterion {
                SplitCriterion::Threshold(t) => {
                    let v = feature.values[r];
                    v.is_finite() && v > *t
                }
                SplitCriterion::CategorySet(set) => set.contains(&(feature.values[r] as i64)),
                SplitCriterion::WordSet(set) => feature
                    .word_ids
                    .as_ref()
                    .map(|w| w[r].iter().any(|id| set.contains(id)))
                    .unwrap_or(false),
                SplitCriterion::Window { .. } => false,
            }
        });

        if greater_rows.is_empty() || smaller_rows.is_empty() {
            return self.leaf_from(input, rows, &g, &h);
        }

        let split = Split::new(
            feature.data_used,
            feature.column_index,
            feature.name.clone(),
            candidate.criterion,
        );

        let greater = self.fit_node(input, &greater_rows, depth + 1);
        let smaller = self.fit_node(input, &smaller_rows, depth + 1);
        self.push_interior(split, greater, smaller)
    }

    /// Solves the leaf's intercept plus one closed-form weight per
    /// numerical/discrete feature in scope (spec §3's weight-vector
    /// convention: discrete_output, numerical_output, discrete_input,
    /// numerical_input, subfeatures), each over the feature's
    /// fit-time-standardized values, per §4.F's "rescaled back to raw
    /// units" leaf contribution.
    fn leaf_from(&mut self, input: &FitInput, rows: &[usize], g: &[f64], h: &[f64]) -> NodeId {
        let sum_g: f64 = g.iter().sum();
        let sum_h: f64 = h.iter().sum();
        let intercept = crate::loss::solve_two_partition(sum_g, sum_h, self.hyperparameters.regularization);

        let mut weights: Vec<(String, f64, u8)> = Vec::new();
        for feature in &input.features {
            let Some(rank) = linear_weight_rank(feature.data_used) else {
                continue;
            };
            let standardization = self
                .standardization
                .get(&feature.name)
                .cloned()
                .unwrap_or(Standardization { mean: 0.0, stddev: 1.0 });
            let x_std: Vec<f64> = rows
                .iter()
                .map(|&r| {
                    let v = feature.values[r];
                    if v.is_finite() {
                        standardization.standardize(v)
                    } else {
                        0.0
                    }
                })
                .collect();
            let w = crate::loss::solve_leaf_weight(g, h, &x_std, self.hyperparameters.regularization);
            if w != 0.0 {
                weights.push((feature.name.clone(), w, rank));
            }
        }
        weights.sort_by(|a, b| a.2.cmp(&b.2).then_with(|| a.0.cmp(&b.0)));
        let weights = weights.into_iter().map(|(name, w, _)| (name, w)).collect();

        self.push_leaf(intercept, weights)
    }
}

/// Maps a [`DataUsed`] family to its rank in the leaf weight-vector
/// convention (discrete_output, numerical_output, discrete_input,
/// numerical_input, subfeatures); `None` for families that do not carry a
/// linear leaf weight (categorical/text/same-units/time-stamp splits are
/// condition-only).
fn linear_weight_rank(data_used: DataUsed) -> Option<u8> {
    match data_used {
        DataUsed::DiscreteOutput => Some(0),
        DataUsed::NumericalOutput => Some(1),
        DataUsed::DiscreteInput => Some(2),
        DataUsed::NumericalInput => Some(3),
        DataUsed::Subfeatures => Some(4),
        _ => None,
    }
}

fn is_strictly_better(a: &SplitCandidate, b: &SplitCandidate) -> bool {
    if (a.reduction - b.reduction).abs() > 1e-12 {
        a.reduction > b.reduction
    } else {
        a.tie_rank < b.tie_rank
    }
}

fn pick_better(current: Option<SplitCandidate>, candidate: SplitCandidate) -> SplitCandidate {
    match current {
        None => candidate,
        Some(c) => {
            if is_strictly_better(&candidate, &c) {
                candidate
            } else {
                c
            }
        }
    }
}

/// Fits one decision tree to the supplied gradients/hessians/feature
/// columns, recursing until `max_depth`, `min_num_samples`, or no
/// candidate clears the regularization threshold.
pub fn fit_tree(input: &FitInput, hyperparameters: &Hyperparameters) -> DecisionTree {
    let standardization = input
        .features
        .iter()
        .map(|f| (f.name.clone(), Standardization::fit(&f.values)))
        .collect();
    let mut builder = Builder {
        hyperparameters,
        nodes: Vec::new(),
        standardization,
    };
    let rows: Vec<usize> = (0..input.g.len()).collect();
    let root = builder.fit_node(input, &rows, 0);
    DecisionTree::from_arena(builder.nodes, root, builder.standardization)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_a_single_threshold_split() {
        let mut hp = Hyperparameters::default();
        hp.max_depth = 2;
        hp.min_num_samples = 1;
        hp.regularization = 1e-6;

        // y = 10 for x > 5, else y = -10; g = yhat - y with yhat initialized
        // to 0 means g = -y.
        let values = vec![1.0, 2.0, 8.0, 9.0];
        let y = vec![-10.0, -10.0, 10.0, 10.0];
        let g: Vec<f64> = y.iter().map(|yi| -yi).collect();
        let h = vec![1.0; 4];

        let input = FitInput {
            g,
            h,
            features: vec![FeatureInput {
                name: "x".to_string(),
                data_used: DataUsed::NumericalInput,
                column_index: 0,
                values,
                is_categorical: false,
                word_ids: None,
            }],
        };

        let tree = fit_tree(&input, &hp);
        assert!(tree.num_nodes() >= 1);
    }

    #[test]
    fn leaf_fits_a_nonzero_weight_for_a_linear_feature() {
        // With max_depth=0 the root is a single leaf, so any signal in g/h
        // can only show up through the leaf's weight vector, not a split.
        let mut hp = Hyperparameters::default();
        hp.max_depth = 0;
        hp.min_num_samples = 1;
        hp.regularization = 1e-6;

        let values = vec![-2.0, -1.0, 1.0, 2.0];
        let g: Vec<f64> = values.iter().map(|v| -v).collect();
        let h = vec![1.0; 4];

        let input = FitInput {
            g,
            h,
            features: vec![FeatureInput {
                name: "x".to_string(),
                data_used: DataUsed::NumericalInput,
                column_index: 0,
                values: values.clone(),
                is_categorical: false,
                word_ids: None,
            }],
        };

        let tree = fit_tree(&input, &hp);
        match tree.node(tree.root()) {
            Node::Leaf { weights, .. } => {
                assert_eq!(weights.len(), 1);
                assert_eq!(weights[0].0, "x");
                assert!(weights[0].1 != 0.0);
            }
            _ => panic!("expected a single leaf at max_depth=0"),
        }

        // g = -values, so the closed-form weight should recover
        // contribution ~= values (the Newton step that fully cancels g
        // given h=1): larger x predicts a larger contribution.
        let mut features = std::collections::HashMap::new();
        features.insert("x".to_string(), 2.0);
        let high = tree.predict_row(&features).unwrap();
        features.insert("x".to_string(), -2.0);
        let low = tree.predict_row(&features).unwrap();
        assert!(
            high > low,
            "larger x should predict a larger value: high={high}, low={low}"
        );
    }

    #[test]
    fn best_word_split_separates_rows_by_vocabulary() {
        let mut hp = Hyperparameters::default();
        hp.max_depth = 2;
        hp.min_num_samples = 1;
        hp.regularization = 1e-6;

        // Rows containing word 7 should end up with y = 10; the rest y = -10.
        let word_ids = vec![vec![1, 7], vec![7], vec![2], vec![3]];
        let y = [10.0, 10.0, -10.0, -10.0];
        let g: Vec<f64> = y.iter().map(|yi| -yi).collect();
        let h = vec![1.0; 4];

        let input = FitInput {
            g,
            h,
            features: vec![FeatureInput {
                name: "description__mapping, target 0".to_string(),
                data_used: DataUsed::TextInput,
                column_index: 0,
                values: vec![0.0; 4],
                is_categorical: false,
                word_ids: Some(word_ids),
            }],
        };

        let tree = fit_tree(&input, &hp);
        assert!(matches!(tree.node(tree.root()), Node::Interior { .. }));
    }

    #[test]
    fn allow_sets_grows_the_category_split_beyond_one_member() {
        let mut hp = Hyperparameters::default();
        hp.max_depth = 1;
        hp.min_num_samples = 1;
        hp.regularization = 1e-6;
        hp.allow_sets = 2;

        // Categories 1 and 2 both belong to the high group, 3 to the low one.
        let values = vec![1.0, 2.0, 2.0, 3.0, 3.0, 3.0];
        let y = [10.0, 10.0, 10.0, -10.0, -10.0, -10.0];
        let g: Vec<f64> = y.iter().map(|yi| -yi).collect();
        let h = vec![1.0; 6];

        let input = FitInput {
            g,
            h,
            features: vec![FeatureInput {
                name: "category".to_string(),
                data_used: DataUsed::CategoricalInput,
                column_index: 0,
                values,
                is_categorical: true,
                word_ids: None,
            }],
        };

        let tree = fit_tree(&input, &hp);
        match tree.node(tree.root()) {
            Node::Interior {
                split: crate::split::Split {
                    criterion: SplitCriterion::CategorySet(set),
                    ..
                },
                ..
            } => {
                assert_eq!(set.len(), 2);
                assert!(set.contains(&1) && set.contains(&2));
            }
            other => panic!("expected a two-member category split, got {other:?}"),
        }
    }

    #[test]
    fn time_stamps_window_produces_a_ternary_split() {
        let mut hp = Hyperparameters::default();
        hp.max_depth = 1;
        hp.min_num_samples = 1;
        hp.regularization = 1e-6;
        hp.grid_factor = 4.0;

        // Rows inside [10, 20] get y = 10; everything outside gets y = -10.
        let values = vec![0.0, 5.0, 12.0, 15.0, 18.0, 25.0, 30.0];
        let y = [-10.0, -10.0, 10.0, 10.0, 10.0, -10.0, -10.0];
        let g: Vec<f64> = y.iter().map(|yi| -yi).collect();
        let h = vec![1.0; 7];

        let input = FitInput {
            g,
            h,
            features: vec![FeatureInput {
                name: "ts_diff".to_string(),
                data_used: DataUsed::TimeStampsWindow,
                column_index: 0,
                values,
                is_categorical: false,
                word_ids: None,
            }],
        };

        let tree = fit_tree(&input, &hp);
        assert!(matches!(tree.node(tree.root()), Node::Interior3 { .. }));
    }
}
