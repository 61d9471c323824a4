//! Global optimization methods for fitting layer stacks.
//!
//! Fitting a multilayer is a rugged, strongly multimodal problem: fringe
//! positions alias onto each other and a thickness off by one fringe period
//! is a deep local minimum. The engine therefore runs in two stages:
//!
//! - [`TreeParzen`]: a short Bayesian warm start that proposes the seed
//! - [`ShakeSwarm`]: a particle swarm that refines around it and re-seeds
//!   ("reshakes") its population when it stagnates
//!
//! [`HybridOptimizer`] chains the two with the iteration budget rule.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::Array1;
use rand::Rng;

use crate::parameters::ParameterBounds;
use crate::problem::Objective;

mod hybrid;
pub mod parallel;
mod swarm;
mod tpe;

pub use hybrid::{iteration_budget, HybridOptimizer, HybridResult};
pub use swarm::{ShakeSwarm, SwarmConfig, SwarmProgress};
pub use tpe::{trial_budget, TpeConfig, TpeResult, TreeParzen};

/// Cooperative cancellation flag shared between a fit and its owner.
///
/// Optimizers poll it once per iteration (or trial) and stop at the next
/// poll, keeping the best solution found so far.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a refinement run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StopReason {
    /// The iteration budget was used up
    Exhausted,

    /// No improvement after the last reshake
    Stagnated,

    /// The run was cancelled
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Exhausted => "iteration budget exhausted",
            StopReason::Stagnated => "stagnated after final reshake",
            StopReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Result of a global optimization.
#[derive(Debug, Clone)]
pub struct GlobalOptResult {
    /// The best parameters found
    pub params: Array1<f64>,

    /// The best (accurate) cost found
    pub cost: f64,

    /// Model curve of the best parameters
    pub curve: Array1<f64>,

    /// The number of iterations performed
    pub iterations: usize,

    /// The number of population reshakes
    pub reshakes: usize,

    /// The number of function evaluations (fast and accurate)
    pub func_evals: usize,

    /// Why the run ended
    pub stop: StopReason,

    /// A message describing the result
    pub message: String,
}

impl fmt::Display for GlobalOptResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Global Optimization Result:")?;
        writeln!(f, "  Stop: {}", self.stop)?;
        writeln!(f, "  Cost: {:.6e}", self.cost)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Reshakes: {}", self.reshakes)?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        writeln!(f, "  Message: {}", self.message)?;
        writeln!(f, "  Parameters: {:?}", self.params)?;
        Ok(())
    }
}

/// Clip a point to the bounds, then let the objective normalize it.
fn prepare<O: Objective + ?Sized>(objective: &O, bounds: &ParameterBounds, point: &mut Array1<f64>) {
    bounds.clip(point);
    objective.normalize(point);
}

/// Uniform draw in `[-amplitude, amplitude]` per entry, zero where the amplitude is zero.
fn symmetric_uniform(amplitude: &Array1<f64>, rng: &mut impl Rng) -> Array1<f64> {
    amplitude.mapv(|a| if a > 0.0 { rng.gen_range(-a..=a) } else { 0.0 })
}

/// Indices sorting `costs` ascending; NaN sorts last.
fn argsort(costs: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..costs.len()).collect();
    order.sort_by(|&a, &b| costs[a].total_cmp(&costs[b]));
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_symmetric_uniform() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let amp = ndarray::array![0.0, 1.0, 5.0];
        for _ in 0..100 {
            let v = symmetric_uniform(&amp, &mut rng);
            assert_eq!(v[0], 0.0);
            assert!(v[1].abs() <= 1.0);
            assert!(v[2].abs() <= 5.0);
        }
    }

    #[test]
    fn test_argsort() {
        assert_eq!(argsort(&[3.0, 1.0, f64::NAN, 2.0]), vec![1, 3, 0, 2]);
    }
}
