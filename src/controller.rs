//! Fit orchestration.
//!
//! [`FitController::start`] validates everything up front, runs the warm
//! start on the calling thread and hands the swarm to a background worker.
//! The returned [`FitHandle`] streams [`ProgressSnapshot`]s, can cancel the
//! run, and finally yields a [`FitReport`] or writes the result back into a
//! stack.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info, warn};

use crate::config::FitConfig;
use crate::curve::{restrict_to_window, FitWindow, FittedCurve, MeasuredCurve};
use crate::error::{ComputationWarning, Result, XrrError};
use crate::global_opt::{
    iteration_budget, trial_budget, CancelFlag, GlobalOptResult, HybridOptimizer, StopReason,
    SwarmProgress, TpeResult,
};
use crate::history::{count_complete, GeometryHash, InMemoryTrialStore, TrialStore};
use crate::parameters::{CandidateParameters, ParameterLayout};
use crate::problem::ReflectivityProblem;
use crate::stack::{DensityProxy, LayerStack, MaterialModel};

/// Which optimizer stage published a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStage {
    WarmStart,
    Refinement,
}

/// Immutable view of the best solution so far.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub stage: FitStage,

    /// Swarm iterations completed, 0 for the warm-start seed
    pub iteration: usize,

    /// Swarm iteration budget
    pub iter_max: usize,

    /// Accurate misfit of the best solution
    pub misfit: f64,

    pub params: CandidateParameters,

    pub curve: FittedCurve,

    pub reshakes: usize,
}

/// Final outcome of a fit.
#[derive(Debug, Clone)]
pub struct FitReport {
    /// Best parameters found
    pub params: CandidateParameters,

    /// Accurate misfit of `params`
    pub misfit: f64,

    /// Scaled model curve on the window angles
    pub curve: FittedCurve,

    /// Accurate misfit of the warm-start seed
    pub seed_misfit: f64,

    /// Warm-start trials run and how many were pruned
    pub trials: usize,
    pub pruned: usize,

    /// Completed trials reused from the history
    pub reused_trials: usize,

    /// Swarm iterations performed and the budget they ran against
    pub iterations: usize,
    pub iter_max: usize,

    pub reshakes: usize,

    /// Objective evaluations over both stages
    pub func_evals: usize,

    pub stop: StopReason,

    pub geometry_hash: GeometryHash,

    /// Reflectivity values clamped during the run
    pub warnings: ComputationWarning,
}

impl fmt::Display for FitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Fit Report [{}]:", self.geometry_hash)?;
        writeln!(f, "  Misfit: {:.6e} (seed {:.6e})", self.misfit, self.seed_misfit)?;
        writeln!(
            f,
            "  Warm start: {} trials, {} pruned, {} reused",
            self.trials, self.pruned, self.reused_trials
        )?;
        writeln!(
            f,
            "  Swarm: {}/{} iterations, {} reshakes, stop: {}",
            self.iterations, self.iter_max, self.reshakes, self.stop
        )?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        if !self.warnings.is_empty() {
            writeln!(f, "  Warning: {}", self.warnings)?;
        }
        writeln!(f, "  Parameters:")?;
        write!(f, "{}", self.params)
    }
}

/// Sets up and launches fits.
#[derive(Debug, Clone)]
pub struct FitController {
    config: FitConfig,
    store: Arc<dyn TrialStore>,
    material: Arc<dyn MaterialModel>,
}

impl FitController {
    /// Controller with an in-memory trial history and the density proxy material.
    pub fn new(config: FitConfig) -> Self {
        let material = Arc::new(DensityProxy {
            coefficient: config.density_coefficient,
        });
        Self {
            config,
            store: Arc::new(InMemoryTrialStore::new()),
            material,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn TrialStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_material(mut self, material: Arc<dyn MaterialModel>) -> Self {
        self.material = material;
        self
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Fit on the calling thread and return the report.
    pub fn run(&self, stack: &LayerStack, curve: &MeasuredCurve) -> Result<FitReport> {
        self.start(stack, curve)?.wait()
    }

    /// Start a fit with a fresh cancellation flag.
    pub fn start(&self, stack: &LayerStack, curve: &MeasuredCurve) -> Result<FitHandle> {
        self.start_with_cancel(stack, curve, CancelFlag::new())
    }

    /// Start a fit observing an existing cancellation flag.
    ///
    /// Configuration, stack and window are validated before any optimizer
    /// work. The warm start runs here; the swarm runs on a worker thread.
    pub fn start_with_cancel(
        &self,
        stack: &LayerStack,
        curve: &MeasuredCurve,
        cancel: CancelFlag,
    ) -> Result<FitHandle> {
        let config = &self.config;
        config.validate()?;
        stack.validate()?;

        let window = match config.window {
            Some(window) => window,
            None => {
                let (start, end) = curve.span();
                FitWindow { start, end }
            }
        };
        let windowed = restrict_to_window(curve, &window)?;

        let problem = Arc::new(ReflectivityProblem::new(
            stack,
            &windowed,
            self.material.clone(),
            config.reduce_target,
        )?);
        let hash = GeometryHash::compute(problem.geometry(), problem.nominal(), windowed.span())?;

        let prior = self.store.get(&hash)?;
        let reused_trials = count_complete(&prior);
        let n_trials = config
            .trials
            .unwrap_or_else(|| trial_budget(stack.layer_count(), reused_trials));

        info!(
            hash = %hash,
            layers = stack.layer_count(),
            media = stack.media_count(),
            samples = windowed.len(),
            reduced = problem.reduced_len(),
            free = problem.bounds().free_count(),
            trials = n_trials,
            reused = reused_trials,
            "fit started"
        );

        let mut rng = StdRng::seed_from_u64(config.seed);
        let nominal = problem.nominal_vector();
        let hybrid = HybridOptimizer::with_params(config.tpe.clone(), config.swarm.clone());
        let warm = hybrid.warm_start(
            &*problem,
            problem.bounds(),
            &nominal,
            &prior,
            n_trials,
            &mut rng,
            &cancel,
        )?;
        if let Err(err) = self.store.append(&hash, &warm.trials) {
            warn!(hash = %hash, error = %err, "could not save warm-start trials");
        }

        let iter_max = iteration_budget(config.iterations, warm.seed_score.cost);
        let (sender, receiver) = bounded(config.progress_capacity);
        let publisher = Publisher {
            sender,
            layout: problem.layout(),
            angle: problem.curve().angle().clone(),
        };
        publisher.publish(
            FitStage::WarmStart,
            0,
            iter_max,
            warm.seed_score.cost,
            &warm.seed,
            &warm.seed_score.curve,
            0,
        );

        let worker_cancel = cancel.clone();
        let worker = thread::Builder::new()
            .name(format!("xrrfit-{}", hash))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    hybrid.refine(
                        &*problem,
                        problem.bounds(),
                        &warm,
                        iter_max,
                        &mut rng,
                        &worker_cancel,
                        |p: &SwarmProgress| {
                            publisher.publish(
                                FitStage::Refinement,
                                p.iteration,
                                p.iter_max,
                                p.cost,
                                &p.params,
                                &p.curve,
                                p.reshakes,
                            )
                        },
                    )
                }));

                let refinement = match outcome {
                    Ok(result) => result?,
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        error!(hash = %hash, %message, "fit worker panicked");
                        return Err(XrrError::OptimizationFailure(format!(
                            "fit worker panicked: {}",
                            message
                        )));
                    }
                };

                let warnings = problem.warnings();
                if !warnings.is_empty() {
                    warn!(hash = %hash, %warnings, "reflectivity values clamped during fit");
                }
                build_report(
                    &problem,
                    refinement,
                    &warm,
                    reused_trials,
                    iter_max,
                    hash,
                    warnings,
                )
            })?;

        Ok(FitHandle {
            cancel,
            progress: receiver,
            worker,
        })
    }
}

/// Converts optimizer snapshots and pushes them without blocking.
struct Publisher {
    sender: Sender<ProgressSnapshot>,
    layout: ParameterLayout,
    angle: Array1<f64>,
}

impl Publisher {
    #[allow(clippy::too_many_arguments)]
    fn publish(
        &self,
        stage: FitStage,
        iteration: usize,
        iter_max: usize,
        misfit: f64,
        params: &Array1<f64>,
        curve: &Array1<f64>,
        reshakes: usize,
    ) {
        let Ok(params) = CandidateParameters::from_vector(params, self.layout) else {
            return;
        };
        let snapshot = ProgressSnapshot {
            stage,
            iteration,
            iter_max,
            misfit,
            params,
            curve: FittedCurve::new(self.angle.clone(), curve.clone()),
            reshakes,
        };
        // A full channel drops the snapshot.
        let _ = self.sender.try_send(snapshot);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn build_report(
    problem: &ReflectivityProblem,
    refinement: GlobalOptResult,
    warm: &TpeResult,
    reused_trials: usize,
    iter_max: usize,
    geometry_hash: GeometryHash,
    warnings: ComputationWarning,
) -> Result<FitReport> {
    let params = problem.candidate(&refinement.params)?;
    let curve = FittedCurve::new(problem.curve().angle().clone(), refinement.curve);
    Ok(FitReport {
        params,
        misfit: refinement.cost,
        curve,
        seed_misfit: warm.seed_score.cost,
        trials: warm.trials.len(),
        pruned: warm.pruned,
        reused_trials,
        iterations: refinement.iterations,
        iter_max,
        reshakes: refinement.reshakes,
        func_evals: warm.func_evals + refinement.func_evals,
        stop: refinement.stop,
        geometry_hash,
        warnings,
    })
}

/// Handle on a running fit.
#[derive(Debug)]
pub struct FitHandle {
    cancel: CancelFlag,
    progress: Receiver<ProgressSnapshot>,
    worker: JoinHandle<Result<FitReport>>,
}

impl FitHandle {
    /// Ask the worker to stop at its next iteration; the best result so far is kept.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Receiver of progress snapshots.
    pub fn progress(&self) -> &Receiver<ProgressSnapshot> {
        &self.progress
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the worker and return its report.
    pub fn wait(self) -> Result<FitReport> {
        match self.worker.join() {
            Ok(result) => result,
            Err(payload) => Err(XrrError::OptimizationFailure(format!(
                "fit worker panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }

    /// Wait for the fit and write its parameters into `stack`.
    ///
    /// A cancelled fit still commits its best result; a failed one leaves
    /// the stack untouched.
    pub fn commit(self, stack: &mut LayerStack) -> Result<FitReport> {
        let report = self.wait()?;
        stack.apply(&report.params)?;
        info!(misfit = report.misfit, stop = %report.stop, "fit committed");
        Ok(report)
    }
}
