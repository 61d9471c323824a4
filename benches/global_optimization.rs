//! Benchmarks for the warm start, the swarm and the hybrid optimizer.
//!
//! Uses an analytic multimodal objective so the optimizer overhead is
//! measured rather than the forward model.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array1;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use xrrfit_rs::global_opt::{CancelFlag, HybridOptimizer, ShakeSwarm, TreeParzen};
use xrrfit_rs::parameters::{CandidateParameters, ParameterBounds};
use xrrfit_rs::problem::{Objective, Scored};
use xrrfit_rs::stack::FreeSlots;

/// Rastrigin-like ripple around a shifted center.
struct Rastrigin {
    center: Array1<f64>,
}

impl Objective for Rastrigin {
    fn parameter_count(&self) -> usize {
        self.center.len()
    }

    fn fast_cost(&self, params: &Array1<f64>) -> f64 {
        (params - &self.center)
            .iter()
            .map(|d| d * d + 0.5 * (1.0 - (8.0 * d).cos()))
            .sum()
    }

    fn accurate(&self, params: &Array1<f64>) -> Scored {
        Scored::new(self.fast_cost(params), Array1::zeros(0))
    }
}

fn setup(layers: usize) -> (Rastrigin, ParameterBounds, Array1<f64>) {
    let nominal = CandidateParameters {
        thickness: Array1::from_elem(layers, 10.0),
        density: Array1::from_elem(layers, 2.5),
        roughness: Array1::from_elem(layers, 0.3),
    };
    let free = FreeSlots {
        thickness: vec![true; layers],
        density: vec![true; layers],
        roughness: vec![true; layers],
    };
    let bounds = ParameterBounds::from_nominal(&nominal, &free);
    let x0 = nominal.to_vector();
    let center = x0.mapv(|v| v * 1.1);
    (Rastrigin { center }, bounds, x0)
}

fn bench_tpe(c: &mut Criterion) {
    let mut group = c.benchmark_group("tpe");
    group.sample_size(10);

    for layers in [2, 8, 20] {
        let (objective, bounds, x0) = setup(layers);
        group.bench_with_input(BenchmarkId::new("layers", layers), &layers, |b, _| {
            b.iter(|| {
                let mut rng = ChaCha8Rng::seed_from_u64(42);
                TreeParzen::new()
                    .optimize(&objective, &bounds, &x0, &[], 40, &mut rng, &CancelFlag::new())
                    .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_swarm(c: &mut Criterion) {
    let mut group = c.benchmark_group("swarm");
    group.sample_size(10);

    for layers in [2, 8, 20] {
        let (objective, bounds, x0) = setup(layers);
        let seed_score = objective.accurate(&x0);
        group.bench_with_input(BenchmarkId::new("layers", layers), &layers, |b, _| {
            b.iter(|| {
                let mut rng = ChaCha8Rng::seed_from_u64(42);
                ShakeSwarm::new()
                    .optimize(
                        &objective,
                        &bounds,
                        black_box(&x0),
                        &seed_score,
                        100,
                        &mut rng,
                        &CancelFlag::new(),
                        |_| {},
                    )
                    .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_hybrid(c: &mut Criterion) {
    let mut group = c.benchmark_group("hybrid");
    group.sample_size(10);

    let (objective, bounds, x0) = setup(4);
    group.bench_function("four_layers", |b| {
        b.iter(|| {
            let mut rng = ChaCha8Rng::seed_from_u64(42);
            HybridOptimizer::new()
                .optimize(
                    &objective,
                    &bounds,
                    &x0,
                    &[],
                    20,
                    150,
                    &mut rng,
                    &CancelFlag::new(),
                    |_| {},
                )
                .unwrap()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_tpe, bench_swarm, bench_hybrid);
criterion_main!(benches);
