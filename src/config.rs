//! Configuration options for a fit.
//!
//! [`FitConfig`] gathers the run-level settings and the per-stage
//! configurations of the optimizer. Every field has a default, and
//! configurations can be authored as JSON; missing fields take their defaults.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::curve::FitWindow;
use crate::error::{Result, XrrError};
use crate::global_opt::{SwarmConfig, TpeConfig};

/// Configuration options for a fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Inclusive angle range to fit; `None` fits the whole curve. Default: None
    pub window: Option<FitWindow>,

    /// Requested swarm iterations before the budget shrink. Default: 300
    pub iterations: usize,

    /// Sample budget of the fast evaluator. Default: 600
    pub reduce_target: usize,

    /// Override of the warm-start trial count. Default: None (derived from the layer count)
    pub trials: Option<usize>,

    /// Seed of the run's random number generator. Default: 42
    pub seed: u64,

    /// Capacity of the progress channel; snapshots are dropped when it is full. Default: 64
    pub progress_capacity: usize,

    /// Decrement per unit density of the default material model. Default: 2.7e-6
    pub density_coefficient: f64,

    /// Warm-start configuration
    pub tpe: TpeConfig,

    /// Swarm configuration
    pub swarm: SwarmConfig,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            window: None,
            iterations: 300,
            reduce_target: 600,
            trials: None,
            seed: 42,
            progress_capacity: 64,
            density_coefficient: 2.7e-6,
            tpe: TpeConfig::default(),
            swarm: SwarmConfig::default(),
        }
    }
}

impl FitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: FitConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_window(mut self, window: FitWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_reduce_target(mut self, target: usize) -> Self {
        self.reduce_target = target;
        self
    }

    pub fn with_trials(mut self, trials: usize) -> Self {
        self.trials = Some(trials);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_progress_capacity(mut self, capacity: usize) -> Self {
        self.progress_capacity = capacity;
        self
    }

    pub fn with_tpe(mut self, tpe: TpeConfig) -> Self {
        self.tpe = tpe;
        self
    }

    pub fn with_swarm(mut self, swarm: SwarmConfig) -> Self {
        self.swarm = swarm;
        self
    }

    /// Check every setting; fails with an input error naming the first bad one.
    pub fn validate(&self) -> Result<()> {
        if let Some(window) = &self.window {
            FitWindow::new(window.start, window.end)?;
        }
        if self.iterations == 0 {
            return Err(XrrError::Input("iterations must be at least 1".to_string()));
        }
        if self.reduce_target < 2 {
            return Err(XrrError::Input(format!(
                "reduce_target must be at least 2, got {}",
                self.reduce_target
            )));
        }
        if self.trials == Some(0) {
            return Err(XrrError::Input("trials must be at least 1".to_string()));
        }
        if self.progress_capacity == 0 {
            return Err(XrrError::Input(
                "progress_capacity must be at least 1".to_string(),
            ));
        }
        if !(self.density_coefficient.is_finite() && self.density_coefficient >= 0.0) {
            return Err(XrrError::Input(format!(
                "density_coefficient must be a non-negative number, got {}",
                self.density_coefficient
            )));
        }

        let tpe = &self.tpe;
        if tpe.n_candidates == 0 {
            return Err(XrrError::Input("tpe.n_candidates must be at least 1".to_string()));
        }
        if !(tpe.gamma_fraction > 0.0 && tpe.gamma_fraction <= 1.0) {
            return Err(XrrError::Input(format!(
                "tpe.gamma_fraction must be in (0, 1], got {}",
                tpe.gamma_fraction
            )));
        }
        if !(tpe.bandwidth_factor.is_finite() && tpe.bandwidth_factor > 0.0) {
            return Err(XrrError::Input(format!(
                "tpe.bandwidth_factor must be positive, got {}",
                tpe.bandwidth_factor
            )));
        }

        let swarm = &self.swarm;
        if swarm.min_population == 0 || swarm.min_population > swarm.max_population {
            return Err(XrrError::Input(format!(
                "swarm population bounds [{}, {}] are invalid",
                swarm.min_population, swarm.max_population
            )));
        }
        for (name, value) in [
            ("swarm.inertia", swarm.inertia),
            ("swarm.cognitive", swarm.cognitive),
            ("swarm.social", swarm.social),
            ("swarm.velocity_fraction", swarm.velocity_fraction),
            ("swarm.reshake_spread", swarm.reshake_spread),
            ("swarm.reshake_velocity_growth", swarm.reshake_velocity_growth),
            ("swarm.tolerance", swarm.tolerance),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(XrrError::Input(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}
