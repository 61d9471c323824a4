//! Hybrid optimization that chains the warm start and the swarm.
//!
//! The Bayesian warm start finds a seed near the right basin; the swarm then
//! refines it. The swarm budget shrinks when the seed already fits well.

use std::fmt;

use ndarray::Array1;
use rand::Rng;

use crate::error::Result;
use crate::global_opt::{
    CancelFlag, GlobalOptResult, ShakeSwarm, SwarmConfig, SwarmProgress, TpeConfig, TpeResult,
    TreeParzen,
};
use crate::history::TrialRecord;
use crate::parameters::ParameterBounds;
use crate::problem::Objective;

/// Swarm iteration budget for a requested count and the seed's accurate cost.
///
/// `max(8, floor(requested * shrink))` with shrink 0.45 below a cost of 0.02,
/// 0.55 below 0.05 and 0.6 otherwise.
pub fn iteration_budget(requested: usize, seed_cost: f64) -> usize {
    let shrink = if seed_cost < 0.02 {
        0.45
    } else if seed_cost < 0.05 {
        0.55
    } else {
        0.6
    };
    ((requested as f64 * shrink).floor() as usize).max(8)
}

/// Result of both stages.
#[derive(Debug, Clone)]
pub struct HybridResult {
    /// Warm-start outcome, including the trials for the history
    pub warm_start: TpeResult,

    /// Swarm outcome
    pub refinement: GlobalOptResult,

    /// Swarm iteration budget derived from the seed cost
    pub iter_max: usize,
}

impl fmt::Display for HybridResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Hybrid Optimization Result:")?;
        writeln!(
            f,
            "  Warm start: {} trials ({} pruned), seed cost {:.6e}",
            self.warm_start.trials.len(),
            self.warm_start.pruned,
            self.warm_start.seed_score.cost
        )?;
        writeln!(f, "  Iteration budget: {}", self.iter_max)?;
        write!(f, "{}", self.refinement)
    }
}

/// A hybrid optimizer: Bayesian warm start followed by the reshaking swarm.
#[derive(Debug, Clone, Default)]
pub struct HybridOptimizer {
    pub tpe: TreeParzen,
    pub swarm: ShakeSwarm,
}

impl HybridOptimizer {
    /// Create a new HybridOptimizer with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new HybridOptimizer with custom stage configurations.
    pub fn with_params(tpe: TpeConfig, swarm: SwarmConfig) -> Self {
        Self {
            tpe: TreeParzen::with_config(tpe),
            swarm: ShakeSwarm::with_config(swarm),
        }
    }

    /// Stage one: the Bayesian warm start around `nominal`.
    ///
    /// Trial 0 is `nominal`; `prior` holds earlier trials on the same
    /// geometry. The returned trials are the ones to append to the history.
    #[allow(clippy::too_many_arguments)]
    pub fn warm_start<O: Objective>(
        &self,
        objective: &O,
        bounds: &ParameterBounds,
        nominal: &Array1<f64>,
        prior: &[TrialRecord],
        n_trials: usize,
        rng: &mut impl Rng,
        cancel: &CancelFlag,
    ) -> Result<TpeResult> {
        self.tpe
            .optimize(objective, bounds, nominal, prior, n_trials, rng, cancel)
    }

    /// Stage two: refine the warm-start seed with the swarm.
    ///
    /// `iter_max` is normally [`iteration_budget`] of the requested count and
    /// the seed cost. May run on another thread than the warm start.
    #[allow(clippy::too_many_arguments)]
    pub fn refine<O, F>(
        &self,
        objective: &O,
        bounds: &ParameterBounds,
        warm_start: &TpeResult,
        iter_max: usize,
        rng: &mut impl Rng,
        cancel: &CancelFlag,
        on_progress: F,
    ) -> Result<GlobalOptResult>
    where
        O: Objective,
        F: FnMut(&SwarmProgress),
    {
        self.swarm.optimize(
            objective,
            bounds,
            &warm_start.seed,
            &warm_start.seed_score,
            iter_max,
            rng,
            cancel,
            on_progress,
        )
    }

    /// Run both stages on the calling thread.
    ///
    /// # Arguments
    ///
    /// * `objective` - The objective to minimize
    /// * `bounds` - Search box
    /// * `nominal` - Starting point (warm-start trial 0)
    /// * `prior` - Earlier trials on the same geometry
    /// * `n_trials` - Warm-start trial count
    /// * `requested_iterations` - Swarm iterations before the budget shrink
    /// * `rng` - Random number generator shared by both stages
    /// * `cancel` - Cooperative cancellation flag
    /// * `on_progress` - Swarm progress callback
    ///
    /// # Returns
    ///
    /// * Both stage results
    #[allow(clippy::too_many_arguments)]
    pub fn optimize<O, F>(
        &self,
        objective: &O,
        bounds: &ParameterBounds,
        nominal: &Array1<f64>,
        prior: &[TrialRecord],
        n_trials: usize,
        requested_iterations: usize,
        rng: &mut impl Rng,
        cancel: &CancelFlag,
        on_progress: F,
    ) -> Result<HybridResult>
    where
        O: Objective,
        F: FnMut(&SwarmProgress),
    {
        let warm_start =
            self.warm_start(objective, bounds, nominal, prior, n_trials, rng, cancel)?;
        let iter_max = iteration_budget(requested_iterations, warm_start.seed_score.cost);
        let refinement =
            self.refine(objective, bounds, &warm_start, iter_max, rng, cancel, on_progress)?;

        Ok(HybridResult {
            warm_start,
            refinement,
            iter_max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::CandidateParameters;
    use crate::problem::Scored;
    use crate::stack::FreeSlots;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// A multimodal test objective: a sphere with a cosine ripple.
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
                .map(|d| d * d + 0.1 * (1.0 - (4.0 * d).cos()))
                .sum()
        }

        fn accurate(&self, params: &Array1<f64>) -> Scored {
            Scored::new(self.fast_cost(params), Array1::zeros(0))
        }
    }

    #[test]
    fn test_iteration_budget() {
        assert_eq!(iteration_budget(300, 0.01), 135);
        assert_eq!(iteration_budget(300, 0.03), 165);
        assert_eq!(iteration_budget(300, 0.2), 180);
        assert_eq!(iteration_budget(5, 0.2), 8);
    }

    fn problem() -> (Rippled, ParameterBounds, Array1<f64>) {
        let nominal = CandidateParameters {
            thickness: array![10.0, 5.0],
            density: array![2.0, 3.0],
            roughness: array![0.3, 0.3],
        };
        let free = FreeSlots {
            thickness: vec![true, true],
            density: vec![true, true],
            roughness: vec![true, true],
        };
        let bounds = ParameterBounds::from_nominal(&nominal, &free);
        let objective = Rippled {
            center: array![13.0, 4.0, 2.5, 3.5, 0.2, 0.4],
        };
        (objective, bounds, nominal.to_vector())
    }

    #[test]
    fn test_stages_run_separately_match_optimize() {
        let (objective, bounds, x0) = problem();
        let hybrid = HybridOptimizer::new();
        let cancel = CancelFlag::new();

        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let joined = hybrid
            .optimize(&objective, &bounds, &x0, &[], 12, 60, &mut rng, &cancel, |_| {})
            .unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let warm = hybrid
            .warm_start(&objective, &bounds, &x0, &[], 12, &mut rng, &cancel)
            .unwrap();
        let iter_max = iteration_budget(60, warm.seed_score.cost);
        let mut last = 0;
        let refined = hybrid
            .refine(&objective, &bounds, &warm, iter_max, &mut rng, &cancel, |p| {
                last = p.iteration
            })
            .unwrap();

        assert_eq!(iter_max, joined.iter_max);
        assert_eq!(warm.seed, joined.warm_start.seed);
        assert_eq!(refined.params, joined.refinement.params);
        assert_eq!(refined.cost, joined.refinement.cost);
        assert_eq!(last, refined.iterations);
    }

    #[test]
    fn test_hybrid_reaches_minimum() {
        let (objective, bounds, x0) = problem();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let result = HybridOptimizer::new()
            .optimize(
                &objective,
                &bounds,
                &x0,
                &[],
                20,
                300,
                &mut rng,
                &CancelFlag::new(),
                |_| {},
            )
            .unwrap();

        assert_eq!(result.warm_start.trials.len(), 20);
        assert!(result.refinement.iterations <= result.iter_max);
        assert!(result.refinement.cost <= result.warm_start.seed_score.cost);
        assert!(result.refinement.cost < 1e-3, "cost {}", result.refinement.cost);
    }
}
