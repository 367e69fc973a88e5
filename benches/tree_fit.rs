//! Benchmarks for the decision tree split search and the probe-then-refine
//! tree fitter, across a range of row counts.
//!
//! ```bash
//! cargo bench --bench tree_fit
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use relfit::config::Hyperparameters;
use relfit::fitter::fit_round;
use relfit::split::DataUsed;
use relfit::tree::{fit_tree, FeatureInput, FitInput};

const ROW_COUNTS: &[usize] = &[100, 1_000, 10_000];

fn synthetic_input(n: usize) -> FitInput {
    let values: Vec<f64> = (0..n).map(|i| (i % 997) as f64).collect();
    let y: Vec<f64> = values.iter().map(|v| if *v > 500.0 { 1.0 } else { -1.0 }).collect();
    let g: Vec<f64> = y.iter().map(|v| -v).collect();
    let h = vec![1.0; n];

    FitInput {
        g,
        h,
        features: vec![
            FeatureInput {
                name: "amount".into(),
                data_used: DataUsed::NumericalInput,
                column_index: 0,
                values: values.clone(),
                is_categorical: false,
            },
            FeatureInput {
                name: "category".into(),
                data_used: DataUsed::DiscreteInput,
                column_index: 1,
                values: values.iter().map(|v| v % 7.0).collect(),
                is_categorical: true,
            },
        ],
    }
}

fn bench_fit_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("fit_tree");
    let mut hp = Hyperparameters::default();
    hp.max_depth = 4;
    hp.min_num_samples = 5;

    for &n in ROW_COUNTS {
        let input = synthetic_input(n);
        group.bench_with_input(BenchmarkId::new("rows", n), &input, |b, input| {
            b.iter(|| black_box(fit_tree(input, &hp)))
        });
    }
    group.finish();
}

fn bench_fit_round(c: &mut Criterion) {
    let mut group = c.benchmark_group("fit_round");
    let mut hp = Hyperparameters::default();
    hp.max_depth = 4;
    hp.min_num_samples = 5;
    hp.max_length_probe = 1;
    hp.num_trees = 2;

    for &n in ROW_COUNTS {
        let input = synthetic_input(n);
        group.bench_with_input(BenchmarkId::new("rows", n), &input, |b, input| {
            b.iter(|| black_box(fit_round(input, &hp)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_fit_tree, bench_fit_round);
criterion_main!(benches);
