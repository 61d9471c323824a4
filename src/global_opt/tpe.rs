//! Tree-structured Parzen estimator for the warm start.
//!
//! Observations are split into a "good" set (the lowest `gamma(n)` costs) and
//! a "bad" set. Each set becomes a Gaussian mixture with one kernel per
//! observation plus a wide prior kernel at the centre of the box. New trials
//! are drawn from the good mixture and the draw maximizing
//! `log l(x) - log g(x)` is evaluated. All free dimensions are sampled
//! jointly as one group.
//!
//! Trials whose coarse cost is above the median coarse cost of the completed
//! trials are pruned before the fast evaluation and join the bad set.

use std::f64::consts::PI;

use ndarray::Array1;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, XrrError};
use crate::global_opt::{prepare, CancelFlag};
use crate::history::{TrialRecord, TrialState};
use crate::parameters::ParameterBounds;
use crate::problem::{Objective, Scored};

/// Configuration for the warm start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TpeConfig {
    /// Observations drawn uniformly before the estimator takes over.
    /// Default: 10
    pub n_startup: usize,

    /// Candidates drawn from the good mixture per trial.
    /// Default: 24
    pub n_candidates: usize,

    /// Fraction of observations in the good set.
    /// Default: 0.1
    pub gamma_fraction: f64,

    /// Largest good set.
    /// Default: 25
    pub gamma_cap: usize,

    /// Kernel bandwidth as a fraction of the range, before the `n^(-1/(d+4))` factor.
    /// Default: 0.2
    pub bandwidth_factor: f64,

    /// Completed trials needed before median pruning starts; the effective
    /// value is `max(min_pruning_trials, trials / 4)`.
    /// Default: 5
    pub min_pruning_trials: usize,
}

impl Default for TpeConfig {
    fn default() -> Self {
        Self {
            n_startup: 10,
            n_candidates: 24,
            gamma_fraction: 0.1,
            gamma_cap: 25,
            bandwidth_factor: 0.2,
            min_pruning_trials: 5,
        }
    }
}

/// Number of warm-start trials for `layers` base layers.
///
/// `clamp(3 L, 16, 60)`, halved (but at least 10) when the history already
/// holds ten or more completed trials for the same geometry.
pub fn trial_budget(layers: usize, prior_complete: usize) -> usize {
    let trials = (3 * layers).clamp(16, 60);
    if prior_complete >= 10 {
        (trials / 2).max(10)
    } else {
        trials
    }
}

/// Outcome of the warm start.
#[derive(Debug, Clone)]
pub struct TpeResult {
    /// Best completed trial, the seed of the refinement
    pub seed: Array1<f64>,

    /// Accurate score of the seed
    pub seed_score: Scored,

    /// Fast cost of the seed
    pub best_fast: f64,

    /// Trials run in this call, to be appended to the history
    pub trials: Vec<TrialRecord>,

    /// Number of completed trials
    pub completed: usize,

    /// Number of pruned trials
    pub pruned: usize,

    /// The number of function evaluations (coarse, fast and accurate)
    pub func_evals: usize,

    /// Whether the run stopped on the cancel flag
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
struct Observation {
    x: Vec<f64>,
    value: f64,
    complete: bool,
}

/// Equal-weight Gaussian mixture over the free dimensions.
#[derive(Debug, Clone)]
struct ParzenMixture {
    means: Vec<Vec<f64>>,
    sigmas: Vec<Vec<f64>>,
}

impl ParzenMixture {
    fn new(points: &[&Observation], low: &[f64], high: &[f64], factor: f64) -> Self {
        let d = low.len();
        let kernels = points.len() + 1;
        let shrink = factor * (kernels as f64).powf(-1.0 / (d as f64 + 4.0));

        let range: Vec<f64> = low.iter().zip(high.iter()).map(|(l, h)| h - l).collect();
        let center: Vec<f64> = low.iter().zip(high.iter()).map(|(l, h)| 0.5 * (l + h)).collect();
        let bandwidth: Vec<f64> = range.iter().map(|r| shrink * r).collect();

        let mut means: Vec<Vec<f64>> = points.iter().map(|p| p.x.clone()).collect();
        let mut sigmas = vec![bandwidth; points.len()];
        // Prior kernel spanning the whole box.
        means.push(center);
        sigmas.push(range);
        Self { means, sigmas }
    }

    fn log_pdf(&self, x: &[f64]) -> f64 {
        let log_norm = -0.5 * (2.0 * PI).ln();
        let terms: Vec<f64> = self
            .means
            .iter()
            .zip(self.sigmas.iter())
            .map(|(mu, sigma)| {
                x.iter()
                    .zip(mu.iter())
                    .zip(sigma.iter())
                    .map(|((&xi, &m), &s)| {
                        let z = (xi - m) / s;
                        -0.5 * z * z - s.ln() + log_norm
                    })
                    .sum::<f64>()
            })
            .collect();
        log_sum_exp(&terms) - (terms.len() as f64).ln()
    }

    /// Draw from a random kernel, truncated to the box by rejection.
    fn sample(&self, low: &[f64], high: &[f64], rng: &mut impl Rng) -> Vec<f64> {
        let k = rng.gen_range(0..self.means.len());
        let (mu, sigma) = (&self.means[k], &self.sigmas[k]);
        (0..low.len())
            .map(|j| {
                for _ in 0..16 {
                    let z: f64 = rng.sample(StandardNormal);
                    let v = mu[j] + sigma[j] * z;
                    if v >= low[j] && v <= high[j] {
                        return v;
                    }
                }
                mu[j].clamp(low[j], high[j])
            })
            .collect()
    }
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n == 0 {
        return f64::INFINITY;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}

/// Bayesian warm start.
#[derive(Debug, Clone, Default)]
pub struct TreeParzen {
    pub config: TpeConfig,
}

impl TreeParzen {
    /// Create a new TreeParzen sampler with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TpeConfig) -> Self {
        Self { config }
    }

    /// Run `n_trials` trials and return the best one as the seed.
    ///
    /// # Arguments
    ///
    /// * `objective` - The objective to minimize
    /// * `bounds` - Search box; fixed entries stay at their value
    /// * `nominal` - Trial 0, the starting point supplied by the user
    /// * `prior` - Trials of earlier runs on the same geometry
    /// * `n_trials` - Number of trials to run
    /// * `rng` - Random number generator
    /// * `cancel` - Polled once per trial
    ///
    /// # Returns
    ///
    /// * The seed and the new trial records
    #[allow(clippy::too_many_arguments)]
    pub fn optimize<O: Objective>(
        &self,
        objective: &O,
        bounds: &ParameterBounds,
        nominal: &Array1<f64>,
        prior: &[TrialRecord],
        n_trials: usize,
        rng: &mut impl Rng,
        cancel: &CancelFlag,
    ) -> Result<TpeResult> {
        if nominal.len() != bounds.len() || objective.parameter_count() != bounds.len() {
            return Err(XrrError::DimensionMismatch(format!(
                "nominal has {} entries, bounds {}, objective {}",
                nominal.len(),
                bounds.len(),
                objective.parameter_count()
            )));
        }

        let free = bounds.free_indices();
        let low: Vec<f64> = free.iter().map(|&i| bounds.as_slice()[i].min).collect();
        let high: Vec<f64> = free.iter().map(|&i| bounds.as_slice()[i].max).collect();

        let mut observations: Vec<Observation> = prior
            .iter()
            .filter(|t| t.params.len() == bounds.len() && t.value.is_finite())
            .map(|t| Observation {
                x: free.iter().map(|&i| t.params[i]).collect(),
                value: t.value,
                complete: t.state == TrialState::Complete,
            })
            .collect();
        let reused = observations.len();

        let prune_after = self.config.min_pruning_trials.max(n_trials / 4);
        let mut coarse_completed: Vec<f64> = Vec::new();
        let mut trials = Vec::with_capacity(n_trials);
        let mut best: Option<(f64, Array1<f64>)> = None;
        let mut pruned = 0;
        let mut func_evals = 0;
        let mut cancelled = false;

        for trial in 0..n_trials {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let mut x = if trial == 0 {
                nominal.clone()
            } else if observations.len() < self.config.n_startup {
                bounds.random_point(rng)
            } else {
                self.suggest(&observations, &free, &low, &high, nominal, rng)
            };
            prepare(objective, bounds, &mut x);
            let point: Vec<f64> = free.iter().map(|&i| x[i]).collect();

            let coarse = objective.coarse_cost(&x);
            func_evals += 1;
            if coarse_completed.len() >= prune_after && coarse > median(&coarse_completed) {
                debug!(trial, coarse, "trial pruned");
                pruned += 1;
                trials.push(TrialRecord::pruned(x.to_vec(), coarse));
                observations.push(Observation {
                    x: point,
                    value: coarse,
                    complete: false,
                });
                continue;
            }

            let value = objective.fast_cost(&x);
            func_evals += 1;
            coarse_completed.push(coarse);
            debug!(trial, value, "trial complete");

            trials.push(TrialRecord::complete(x.to_vec(), value));
            observations.push(Observation {
                x: point,
                value,
                complete: true,
            });
            if best.as_ref().map_or(true, |(b, _)| value < *b) {
                best = Some((value, x));
            }
        }

        let (best_fast, seed) = match best {
            Some(found) => found,
            None => {
                let mut x = nominal.clone();
                prepare(objective, bounds, &mut x);
                (f64::INFINITY, x)
            }
        };
        let seed_score = objective.accurate(&seed);
        func_evals += 1;

        info!(
            trials = trials.len(),
            pruned,
            reused,
            fast = best_fast,
            accurate = seed_score.cost,
            "warm start finished"
        );

        Ok(TpeResult {
            seed,
            seed_score,
            best_fast,
            completed: trials.len() - pruned,
            trials,
            pruned,
            func_evals,
            cancelled,
        })
    }

    /// Propose the next trial from the current observations.
    fn suggest(
        &self,
        observations: &[Observation],
        free: &[usize],
        low: &[f64],
        high: &[f64],
        nominal: &Array1<f64>,
        rng: &mut impl Rng,
    ) -> Array1<f64> {
        let mut x = nominal.clone();
        if free.is_empty() {
            return x;
        }

        let mut complete: Vec<&Observation> =
            observations.iter().filter(|o| o.complete).collect();
        complete.sort_by(|a, b| a.value.total_cmp(&b.value));

        let n = observations.len();
        let n_good = ((self.config.gamma_fraction * n as f64).ceil() as usize)
            .min(self.config.gamma_cap)
            .max(1)
            .min(complete.len());

        let good: Vec<&Observation> = complete[..n_good].to_vec();
        let bad: Vec<&Observation> = complete[n_good..]
            .iter()
            .copied()
            .chain(observations.iter().filter(|o| !o.complete))
            .collect();

        let factor = self.config.bandwidth_factor;
        let l = ParzenMixture::new(&good, low, high, factor);
        let g = ParzenMixture::new(&bad, low, high, factor);

        let mut chosen: Option<(f64, Vec<f64>)> = None;
        for _ in 0..self.config.n_candidates.max(1) {
            let candidate = l.sample(low, high, rng);
            let score = l.log_pdf(&candidate) - g.log_pdf(&candidate);
            if chosen.as_ref().map_or(true, |(s, _)| score > *s) {
                chosen = Some((score, candidate));
            }
        }

        if let Some((_, values)) = chosen {
            for (&i, v) in free.iter().zip(values) {
                x[i] = v;
            }
        }
        x
    }
}
