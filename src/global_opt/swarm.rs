//! Particle swarm refinement with stagnation reshakes.
//!
//! Every iteration the whole population is screened with the fast cost; only
//! the best few are re-scored with the accurate cost, and only accurate
//! scores may move the global best. When the global best has not improved by
//! more than the tolerance for `TH = max(15, iter_max / 6)` iterations the
//! population is re-seeded around it with a larger velocity cap. After the
//! last reshake, `2 TH` more stagnant iterations end the run.

use ndarray::Array1;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, XrrError};
use crate::global_opt::parallel::{
    evaluate_population_parallel, prepare_population_parallel, score_selected_parallel,
};
use crate::global_opt::{argsort, prepare, symmetric_uniform, CancelFlag, GlobalOptResult, StopReason};
use crate::parameters::ParameterBounds;
use crate::problem::{Objective, Scored};

/// Configuration for the swarm stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Velocity inertia weight.
    /// Default: 0.72
    pub inertia: f64,

    /// Attraction towards the personal best.
    /// Default: 1.49
    pub cognitive: f64,

    /// Attraction towards the global best.
    /// Default: 1.49
    pub social: f64,

    /// Velocity cap as a fraction of each parameter range.
    /// Default: 0.3
    pub velocity_fraction: f64,

    /// Half-width of the reshake cloud as a fraction of each range.
    /// Default: 0.3
    pub reshake_spread: f64,

    /// Factor applied to the velocity cap on every reshake.
    /// Default: 1.5
    pub reshake_velocity_growth: f64,

    /// Maximum number of reshakes.
    /// Default: 3
    pub max_reshakes: usize,

    /// Smallest decrease of the global best counted as an improvement.
    /// Default: 1e-6
    pub tolerance: f64,

    /// Publish progress at least every this many iterations.
    /// Default: 5
    pub progress_every: usize,

    /// Population bounds for `20 + 4 * free parameters`.
    /// Default: 80 and 200
    pub min_population: usize,
    pub max_population: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            inertia: 0.72,
            cognitive: 1.49,
            social: 1.49,
            velocity_fraction: 0.3,
            reshake_spread: 0.3,
            reshake_velocity_growth: 1.5,
            max_reshakes: 3,
            tolerance: 1e-6,
            progress_every: 5,
            min_population: 80,
            max_population: 200,
        }
    }
}

/// Snapshot of the global best, published while the swarm runs.
#[derive(Debug, Clone, PartialEq)]
pub struct SwarmProgress {
    /// Iterations completed so far
    pub iteration: usize,

    /// Iteration budget of the run
    pub iter_max: usize,

    /// Accurate cost of the global best
    pub cost: f64,

    pub params: Array1<f64>,

    pub curve: Array1<f64>,

    pub reshakes: usize,

    /// Whether this iteration moved the global best
    pub improved: bool,
}

/// Population and best-so-far bookkeeping of one run.
struct SwarmState {
    positions: Vec<Array1<f64>>,
    velocities: Vec<Array1<f64>>,
    pbest: Vec<Array1<f64>>,
    pbest_cost: Vec<f64>,
    gbest: Array1<f64>,
    gbest_cost: f64,
    gbest_curve: Array1<f64>,
    vmax: Array1<f64>,
    elite: usize,
    func_evals: usize,
}

impl SwarmState {
    /// Fast-screen everyone, accurately re-score the elite.
    ///
    /// Returns whether the global best moved.
    fn evaluate<O: Objective>(&mut self, objective: &O) -> bool {
        let fast = evaluate_population_parallel(objective, &self.positions);
        let order = argsort(&fast);
        let (top, rest) = order.split_at(self.elite.min(order.len()));
        let scored = score_selected_parallel(objective, &self.positions, top);
        self.func_evals += fast.len() + top.len();

        let mut improved = false;
        for (&i, Scored { cost, curve }) in top.iter().zip(scored) {
            if cost < self.pbest_cost[i] {
                self.pbest_cost[i] = cost;
                self.pbest[i] = self.positions[i].clone();
            }
            if cost < self.gbest_cost {
                self.gbest_cost = cost;
                self.gbest = self.positions[i].clone();
                self.gbest_curve = curve;
                improved = true;
            }
        }
        for &i in rest {
            if fast[i] < self.pbest_cost[i] {
                self.pbest_cost[i] = fast[i];
                self.pbest[i] = self.positions[i].clone();
            }
        }
        improved
    }

    fn step<O: Objective>(
        &mut self,
        config: &SwarmConfig,
        objective: &O,
        bounds: &ParameterBounds,
        rng: &mut impl Rng,
    ) {
        let dim = self.gbest.len();
        for ((x, v), pb) in self
            .positions
            .iter_mut()
            .zip(self.velocities.iter_mut())
            .zip(self.pbest.iter())
        {
            for j in 0..dim {
                let r1: f64 = rng.gen();
                let r2: f64 = rng.gen();
                let vj = config.inertia * v[j]
                    + config.cognitive * r1 * (pb[j] - x[j])
                    + config.social * r2 * (self.gbest[j] - x[j]);
                v[j] = vj.clamp(-self.vmax[j], self.vmax[j]);
                x[j] += v[j];
            }
        }
        prepare_population_parallel(objective, bounds, &mut self.positions);
    }

    /// Re-seed the population around the global best.
    fn reshake<O: Objective>(
        &mut self,
        config: &SwarmConfig,
        objective: &O,
        bounds: &ParameterBounds,
        rng: &mut impl Rng,
    ) {
        self.vmax.mapv_inplace(|v| v * config.reshake_velocity_growth);
        let spread = bounds.widths().mapv(|w| w * config.reshake_spread);
        for x in self.positions.iter_mut() {
            *x = &self.gbest + &symmetric_uniform(&spread, rng);
        }
        prepare_population_parallel(objective, bounds, &mut self.positions);
        for v in self.velocities.iter_mut() {
            *v = symmetric_uniform(&self.vmax, rng);
        }
    }

    fn snapshot(&self, iteration: usize, iter_max: usize, reshakes: usize, improved: bool) -> SwarmProgress {
        SwarmProgress {
            iteration,
            iter_max,
            cost: self.gbest_cost,
            params: self.gbest.clone(),
            curve: self.gbest_curve.clone(),
            reshakes,
            improved,
        }
    }
}

/// Particle swarm with stagnation-triggered reshakes.
#[derive(Debug, Clone, Default)]
pub struct ShakeSwarm {
    pub config: SwarmConfig,
}

impl ShakeSwarm {
    /// Create a new ShakeSwarm optimizer with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SwarmConfig) -> Self {
        Self { config }
    }

    /// Population size for `free` free parameters.
    pub fn population_size(&self, free: usize) -> usize {
        (20 + 4 * free).clamp(self.config.min_population, self.config.max_population)
    }

    /// Stagnation threshold `max(15, iter_max / 6)`.
    pub fn stagnation_threshold(iter_max: usize) -> usize {
        (iter_max / 6).max(15)
    }

    /// Refine `seed` for at most `iter_max` iterations.
    ///
    /// # Arguments
    ///
    /// * `objective` - The objective to minimize
    /// * `bounds` - Search box; fixed entries never move
    /// * `seed` - Starting point, becomes particle 0
    /// * `seed_score` - Accurate score of the seed, the initial global best
    /// * `iter_max` - Iteration budget
    /// * `rng` - Random number generator owned by this run
    /// * `cancel` - Polled once per iteration
    /// * `on_progress` - Called with the global best on improving
    ///   iterations, every `progress_every` iterations and once at
    ///   termination, whatever the stop reason
    ///
    /// # Returns
    ///
    /// * The global best with its accurate cost and curve
    #[allow(clippy::too_many_arguments)]
    pub fn optimize<O, F>(
        &self,
        objective: &O,
        bounds: &ParameterBounds,
        seed: &Array1<f64>,
        seed_score: &Scored,
        iter_max: usize,
        rng: &mut impl Rng,
        cancel: &CancelFlag,
        mut on_progress: F,
    ) -> Result<GlobalOptResult>
    where
        O: Objective,
        F: FnMut(&SwarmProgress),
    {
        if seed.len() != bounds.len() || objective.parameter_count() != bounds.len() {
            return Err(XrrError::DimensionMismatch(format!(
                "seed has {} entries, bounds {}, objective {}",
                seed.len(),
                bounds.len(),
                objective.parameter_count()
            )));
        }

        let config = &self.config;
        let pop = self.population_size(bounds.free_count());
        let vmax = bounds.widths().mapv(|w| w * config.velocity_fraction);

        let mut first = seed.clone();
        prepare(objective, bounds, &mut first);
        let mut positions = Vec::with_capacity(pop);
        positions.push(first.clone());
        for _ in 1..pop {
            positions.push(bounds.random_point(rng));
        }
        prepare_population_parallel(objective, bounds, &mut positions[1..]);
        let velocities = (0..pop).map(|_| symmetric_uniform(&vmax, rng)).collect();

        let mut state = SwarmState {
            pbest: positions.clone(),
            pbest_cost: vec![f64::INFINITY; pop],
            positions,
            velocities,
            gbest: first,
            gbest_cost: seed_score.cost,
            gbest_curve: seed_score.curve.clone(),
            vmax,
            elite: (pop / 8).max(5),
            func_evals: 0,
        };
        if !cancel.is_cancelled() {
            state.evaluate(objective);
        }

        let threshold = Self::stagnation_threshold(iter_max);
        info!(
            population = pop,
            iter_max,
            threshold,
            seed_cost = seed_score.cost,
            "swarm started"
        );

        let mut best_last = state.gbest_cost;
        let mut jam = 0;
        let mut reshakes = 0;
        let mut iterations = 0;
        let mut published = None;
        let mut stop = StopReason::Exhausted;

        for it in 0..iter_max {
            if cancel.is_cancelled() {
                stop = StopReason::Cancelled;
                break;
            }
            iterations = it + 1;

            state.step(config, objective, bounds, rng);
            let improved = state.evaluate(objective);

            if improved || it % config.progress_every.max(1) == 0 || it + 1 == iter_max {
                on_progress(&state.snapshot(iterations, iter_max, reshakes, improved));
                published = Some(iterations);
            }

            if state.gbest_cost < best_last - config.tolerance {
                best_last = state.gbest_cost;
                jam = 0;
                debug!(iteration = iterations, cost = state.gbest_cost, "global best improved");
            } else {
                jam += 1;
                if jam >= threshold && reshakes < config.max_reshakes {
                    state.reshake(config, objective, bounds, rng);
                    jam = 0;
                    reshakes += 1;
                    info!(
                        iteration = iterations,
                        reshake = reshakes,
                        cost = state.gbest_cost,
                        "swarm stagnated, reshaking population"
                    );
                } else if jam >= 2 * threshold && reshakes >= config.max_reshakes {
                    stop = StopReason::Stagnated;
                    break;
                }
            }
        }

        // Every exit path ends with a snapshot of the final state.
        if published != Some(iterations) {
            on_progress(&state.snapshot(iterations, iter_max, reshakes, false));
        }

        info!(
            %stop,
            iterations,
            reshakes,
            cost = state.gbest_cost,
            "swarm finished"
        );

        Ok(GlobalOptResult {
            message: format!("{} after {} iterations", stop, iterations),
            params: state.gbest,
            cost: state.gbest_cost,
            curve: state.gbest_curve,
            iterations,
            reshakes,
            func_evals: state.func_evals,
            stop,
        })
    }
}
