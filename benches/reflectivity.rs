//! Benchmarks for the forward model and the misfit evaluators.
//!
//! The Parratt kernel dominates the cost of a fit, so these measure it on
//! superlattices of growing size and compare the accurate, fast and coarse
//! evaluators on one curve.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array1;
use xrrfit_rs::curve::MeasuredCurve;
use xrrfit_rs::problem::{Objective, ReflectivityProblem};
use xrrfit_rs::reflectivity::simulate_stack;
use xrrfit_rs::stack::{Block, DensityProxy, Layer, LayerStack, Substrate};

const CU_KA: f64 = 0.15418;

fn superlattice(periods: usize) -> LayerStack {
    LayerStack::new(
        vec![
            Block::Single(Layer::with_constants("cap", 0.99999, 1e-7, 2.0, 0.4)),
            Block::repeat(
                "MoSi",
                vec![Layer::new("Mo", 2.8, 0.3, 10.2), Layer::new("Si", 4.1, 0.3, 2.33)],
                periods,
            ),
        ],
        Substrate::with_constants("Si", 0.999992, 1e-7, 0.2),
    )
}

fn angles(n: usize) -> Vec<f64> {
    (1..=n).map(|i| 4.0 * i as f64 / n as f64).collect()
}

fn bench_simulate(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulate");
    let theta = angles(1000);

    for periods in [5, 20, 60] {
        let expanded = superlattice(periods)
            .expand(CU_KA, &DensityProxy::default())
            .unwrap();
        group.bench_with_input(BenchmarkId::new("periods", periods), &expanded, |b, stack| {
            b.iter(|| simulate_stack(black_box(stack), CU_KA, black_box(&theta)))
        });
    }

    group.finish();
}

fn bench_evaluators(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluators");

    let stack = superlattice(40);
    let theta = angles(4000);
    let expanded = stack.expand(CU_KA, &DensityProxy::default()).unwrap();
    let intensity = simulate_stack(&expanded, CU_KA, &theta).mapv(|r| r.max(1e-12));
    let curve = MeasuredCurve::new(Array1::from(theta), intensity, CU_KA).unwrap();
    let problem =
        ReflectivityProblem::new(&stack, &curve, Arc::new(DensityProxy::default()), 600).unwrap();
    let x = problem.nominal_vector();

    group.bench_function("accurate", |b| b.iter(|| problem.accurate(black_box(&x))));
    group.bench_function("fast", |b| b.iter(|| problem.fast_cost(black_box(&x))));
    group.bench_function("coarse", |b| b.iter(|| problem.coarse_cost(black_box(&x))));

    group.finish();
}

criterion_group!(benches, bench_simulate, bench_evaluators);
criterion_main!(benches);
