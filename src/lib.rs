//! # xrrfit-rs
//!
//! `xrrfit-rs` models the specular X-ray reflectivity of multilayer stacks
//! and fits layer thickness, density and roughness to a measured curve.
//!
//! The library provides:
//! - A Parratt forward model with Névot-Croce interface roughness
//! - A layer stack description with repeat blocks and per-layer freeze flags
//! - Curve preprocessing: windowing, curvature-aware reduction and peak weights
//! - A hybrid optimizer: a Bayesian (TPE) warm start followed by a reshaking
//!   particle swarm, run on a background worker with progress snapshots
//! - A per-geometry trial history so repeated fits reuse earlier trials
//!
//! ## Basic Usage
//!
//! ```no_run
//! use xrrfit_rs::{Block, FitConfig, FitController, Layer, LayerStack, MeasuredCurve, Substrate};
//!
//! # fn main() -> xrrfit_rs::Result<()> {
//! let mut stack = LayerStack::new(
//!     vec![
//!         Block::Single(Layer::with_constants("cap", 0.99999, 1e-7, 2.0, 0.3)),
//!         Block::repeat(
//!             "ML",
//!             vec![Layer::new("Mo", 2.8, 0.3, 10.2), Layer::new("Si", 4.1, 0.3, 2.33)],
//!             20,
//!         ),
//!     ],
//!     Substrate::with_constants("Si", 0.999992, 1e-7, 0.2),
//! );
//! let curve = MeasuredCurve::from_vecs(vec![0.1, 0.2, 0.3], vec![1.0, 0.5, 0.1], 0.15418)?;
//!
//! let handle = FitController::new(FitConfig::default()).start(&stack, &curve)?;
//! for snapshot in handle.progress().iter() {
//!     println!("{} {:.4e}", snapshot.iteration, snapshot.misfit);
//! }
//! let report = handle.commit(&mut stack)?;
//! println!("{}", report);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod curve;
pub mod error;
pub mod global_opt;
pub mod history;
pub mod misfit;
pub mod parameters;
pub mod problem;
pub mod reflectivity;
pub mod stack;

// Re-exports for convenience
pub use config::FitConfig;
pub use controller::{FitController, FitHandle, FitReport, FitStage, ProgressSnapshot};
pub use curve::{FitWindow, FittedCurve, MeasuredCurve, ReducedCurve};
pub use error::{ComputationWarning, Result, XrrError};
pub use global_opt::{CancelFlag, HybridOptimizer, StopReason};
pub use history::{GeometryHash, InMemoryTrialStore, JsonFileTrialStore, TrialRecord, TrialStore};
pub use misfit::Evaluator;
pub use parameters::{CandidateParameters, ParameterBounds};
pub use problem::{Objective, ReflectivityProblem};
pub use reflectivity::{simulate, simulate_stack};
pub use stack::{
    Block, DensityProxy, DispersionTable, FreezeFlags, Layer, LayerStack, MaterialModel, Optics,
    Substrate,
};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
