//! Tests for the warm start, the swarm and their combination.
//!
//! The objectives here are cheap analytic functions so the stopping rules
//! and the bookkeeping can be checked exactly.

use std::sync::Arc;

use approx::assert_relative_eq;
use ndarray::{array, Array1};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use xrrfit_rs::curve::MeasuredCurve;
use xrrfit_rs::global_opt::{
    CancelFlag, HybridOptimizer, ShakeSwarm, StopReason, SwarmProgress, TreeParzen,
};
use xrrfit_rs::history::TrialRecord;
use xrrfit_rs::parameters::{CandidateParameters, ParameterBounds};
use xrrfit_rs::problem::{Objective, ReflectivityProblem, Scored};
use xrrfit_rs::stack::{Block, DensityProxy, FreeSlots, Layer, LayerStack, Substrate};

/// Same value everywhere: nothing can ever improve.
struct Constant(usize);

impl Objective for Constant {
    fn parameter_count(&self) -> usize {
        self.0
    }

    fn fast_cost(&self, _params: &Array1<f64>) -> f64 {
        1.0
    }

    fn accurate(&self, params: &Array1<f64>) -> Scored {
        Scored::new(self.fast_cost(params), Array1::zeros(0))
    }
}

/// Shifted sphere with a cosine ripple.
struct Rippled {
    center: Array1<f64>,
}

impl Objective for Rippled {
    fn parameter_count(&self) -> usize {
        self.center.len()
    }

    fn fast_cost(&self, params: &Array1<f64>) -> f64 {
        (params - &self.center)
            .iter()
            .map(|d| d * d + 0.05 * (1.0 - (6.0 * d).cos()))
            .sum()
    }

    fn accurate(&self, params: &Array1<f64>) -> Scored {
        Scored::new(self.fast_cost(params), params.clone())
    }
}

fn nominal() -> CandidateParameters {
    CandidateParameters {
        thickness: array![10.0, 5.0],
        density: array![2.0, 3.0],
        roughness: array![0.3, 0.4],
    }
}

fn all_free() -> FreeSlots {
    FreeSlots {
        thickness: vec![true, true],
        density: vec![true, true],
        roughness: vec![true, true],
    }
}

#[test]
fn test_constant_objective_exhausts_reshakes() {
    let params = nominal();
    let bounds = ParameterBounds::from_nominal(&params, &all_free());
    let seed = params.to_vector();
    let objective = Constant(seed.len());
    let mut rng = ChaCha8Rng::seed_from_u64(7);

    let mut reshakes_seen = Vec::new();
    let mut last_iteration = None;
    let result = ShakeSwarm::new()
        .optimize(
            &objective,
            &bounds,
            &seed,
            &objective.accurate(&seed),
            300,
            &mut rng,
            &CancelFlag::new(),
            |p: &SwarmProgress| {
                reshakes_seen.push(p.reshakes);
                last_iteration = Some(p.iteration);
            },
        )
        .unwrap();

    // Threshold 50: reshakes at 50, 100 and 150, then 100 stagnant iterations.
    assert_eq!(result.reshakes, 3);
    assert_eq!(result.iterations, 250);
    assert_eq!(result.stop, StopReason::Stagnated);
    assert_eq!(result.cost, 1.0);
    assert_eq!(result.params, seed);
    assert!(reshakes_seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(reshakes_seen.last(), Some(&3));
    // The early stop still reports its final state.
    assert_eq!(last_iteration, Some(result.iterations));
}

#[test]
fn test_frozen_parameters_stay_nominal() {
    let params = nominal();
    let free = FreeSlots {
        thickness: vec![true, false],
        density: vec![false, true],
        roughness: vec![true, true],
    };
    let bounds = ParameterBounds::from_nominal(&params, &free);
    let objective = Rippled {
        center: array![12.0, 6.0, 2.5, 3.3, 0.2, 0.5],
    };
    let mut rng = ChaCha8Rng::seed_from_u64(11);

    let result = HybridOptimizer::new()
        .optimize(
            &objective,
            &bounds,
            &params.to_vector(),
            &[],
            20,
            100,
            &mut rng,
            &CancelFlag::new(),
            |_| {},
        )
        .unwrap();

    let best = &result.refinement.params;
    assert_eq!(best[1], 5.0);
    assert_eq!(best[2], 2.0);
    for trial in &result.warm_start.trials {
        assert_eq!(trial.params[1], 5.0);
        assert_eq!(trial.params[2], 2.0);
    }
    assert!(bounds.contains(best));
    assert_relative_eq!(best[0], 12.0, epsilon = 0.05);
}

#[test]
fn test_same_seed_same_result() {
    let params = nominal();
    let bounds = ParameterBounds::from_nominal(&params, &all_free());
    let objective = Rippled {
        center: array![11.0, 4.5, 2.2, 3.1, 0.25, 0.35],
    };

    let run = |seed: u64| {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        HybridOptimizer::new()
            .optimize(
                &objective,
                &bounds,
                &params.to_vector(),
                &[],
                16,
                60,
                &mut rng,
                &CancelFlag::new(),
                |_| {},
            )
            .unwrap()
    };

    let a = run(3);
    let b = run(3);
    assert_eq!(a.warm_start.trials, b.warm_start.trials);
    assert_eq!(a.refinement.params, b.refinement.params);
    assert_eq!(a.refinement.cost, b.refinement.cost);
    assert_eq!(a.refinement.iterations, b.refinement.iterations);
}

#[test]
fn test_cancelled_before_start_returns_nominal() {
    let params = nominal();
    let bounds = ParameterBounds::from_nominal(&params, &all_free());
    let objective = Rippled {
        center: array![11.0, 4.5, 2.2, 3.1, 0.25, 0.35],
    };
    let cancel = CancelFlag::new();
    cancel.cancel();
    let mut rng = ChaCha8Rng::seed_from_u64(5);

    let result = HybridOptimizer::new()
        .optimize(
            &objective,
            &bounds,
            &params.to_vector(),
            &[],
            30,
            100,
            &mut rng,
            &cancel,
            |_| {},
        )
        .unwrap();

    assert!(result.warm_start.cancelled);
    assert_eq!(result.refinement.stop, StopReason::Cancelled);
    assert_eq!(result.refinement.iterations, 0);
    assert_eq!(result.refinement.params, params.to_vector());
    assert_eq!(result.refinement.func_evals, 0);
}

#[test]
fn test_prior_history_is_used() {
    let params = nominal();
    let bounds = ParameterBounds::from_nominal(&params, &all_free());
    let center = array![11.0, 4.5, 2.2, 3.1, 0.25, 0.35];
    let objective = Rippled {
        center: center.clone(),
    };
    // Two good trials next to the optimum, ten poor ones far above it.
    let prior: Vec<TrialRecord> = (0..12)
        .map(|i| {
            let mut x = center.clone();
            x[0] = if i < 2 { 11.0 + 0.1 * i as f64 } else { 25.0 + 0.4 * i as f64 };
            TrialRecord::complete(x.to_vec(), objective.fast_cost(&x))
        })
        .collect();
    let mut rng = ChaCha8Rng::seed_from_u64(9);

    let result = TreeParzen::new()
        .optimize(
            &objective,
            &bounds,
            &params.to_vector(),
            &prior,
            10,
            &mut rng,
            &CancelFlag::new(),
        )
        .unwrap();

    assert_eq!(result.trials.len(), 10);
    // Past the startup phase the sampler concentrates near the good history.
    let near = result
        .trials
        .iter()
        .skip(1)
        .filter(|t| (t.params[0] - 11.0).abs() < 5.0)
        .count();
    assert!(near >= 4, "only {} of 9 trials near the optimum", near);
}

fn periodic_stack() -> LayerStack {
    LayerStack::new(
        vec![
            Block::Single(Layer::with_constants("cap", 0.99999, 1e-7, 2.0, 0.3)),
            Block::repeat(
                "ML",
                vec![Layer::new("Mo", 2.8, 0.3, 10.2), Layer::new("Si", 4.1, 0.3, 2.33)],
                10,
            ),
        ],
        Substrate::with_constants("Si", 0.999992, 1e-7, 0.2),
    )
}

#[test]
fn test_periodicity_normalization() {
    let stack = periodic_stack();
    let angle: Vec<f64> = (1..=200).map(|i| i as f64 * 0.015).collect();
    let intensity: Vec<f64> = angle.iter().map(|a| (-3.0 * a).exp()).collect();
    let curve = MeasuredCurve::from_vecs(angle, intensity, 0.15418).unwrap();
    let problem =
        ReflectivityProblem::new(&stack, &curve, Arc::new(DensityProxy::default()), 100).unwrap();
    assert_eq!(problem.periodicity().targets(), vec![2.8 + 4.1]);

    let mut x = problem.nominal_vector();
    x[0] = 2.5;
    x[1] = 3.0;
    x[2] = 5.0;
    problem.normalize(&mut x);
    // The single cap layer is not part of any period.
    assert_eq!(x[0], 2.5);
    assert_relative_eq!(x[1] + x[2], 6.9, epsilon = 1e-9);
    assert_relative_eq!(x[1] / x[2], 3.0 / 5.0, epsilon = 1e-12);

    let once = x.clone();
    problem.normalize(&mut x);
    for i in 0..x.len() {
        assert_relative_eq!(x[i], once[i], epsilon = 1e-12);
    }
}
