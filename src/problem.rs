//! Objective definition trait and the reflectivity fitting problem.
//!
//! This module defines the `Objective` trait, the interface the optimizers in
//! [`crate::global_opt`] minimize, and [`ReflectivityProblem`], which scores a
//! candidate layer stack against a measured curve.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ndarray::Array1;

use crate::curve::{FittedCurve, MeasuredCurve, ReducedCurve};
use crate::error::{ComputationWarning, Result, XrrError};
use crate::misfit::{Evaluation, Evaluator};
use crate::parameters::{CandidateParameters, ParameterBounds, ParameterLayout, Periodicity};
use crate::stack::{LayerStack, MaterialModel, StackGeometry};

/// Cost of a candidate together with the curve it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    /// Objective value (lower is better)
    pub cost: f64,

    /// Model curve on the accurate evaluation grid
    pub curve: Array1<f64>,
}

impl Scored {
    pub fn new(cost: f64, curve: Array1<f64>) -> Self {
        Self { cost, curve }
    }
}

/// A scalar objective with evaluators of increasing cost.
///
/// The optimizers only ever see flat parameter vectors. `fast_cost` is used
/// for screening whole populations, `accurate` for the candidates that may
/// become the global best, and `coarse_cost` as the intermediate value for
/// early pruning.
pub trait Objective: Sync {
    /// Get the number of parameters in the flat vector.
    fn parameter_count(&self) -> usize;

    /// Cheap screening cost.
    fn fast_cost(&self, params: &Array1<f64>) -> f64;

    /// Full-resolution cost and curve.
    fn accurate(&self, params: &Array1<f64>) -> Scored;

    /// Cheapest estimate, used for pruning.
    ///
    /// # Default Implementation
    ///
    /// Falls back to [`Objective::fast_cost`].
    fn coarse_cost(&self, params: &Array1<f64>) -> f64 {
        self.fast_cost(params)
    }

    /// Project a clipped candidate onto the feasible set.
    ///
    /// Must be idempotent. The default does nothing.
    fn normalize(&self, _params: &mut Array1<f64>) {}
}

/// Fit of a layer stack to a windowed reflectivity curve.
#[derive(Debug)]
pub struct ReflectivityProblem {
    geometry: StackGeometry,
    nominal: CandidateParameters,
    bounds: ParameterBounds,
    periodicity: Periodicity,
    curve: MeasuredCurve,
    reduced_len: usize,
    accurate: Evaluator,
    fast: Evaluator,
    coarse: Evaluator,
    non_finite: AtomicUsize,
    underflow: AtomicUsize,
}

/// Sampling step of the coarse evaluator on the reduced curve.
const COARSE_STEP: usize = 4;

impl ReflectivityProblem {
    /// Build the problem for `stack` against an already windowed `curve`.
    ///
    /// # Arguments
    ///
    /// * `stack` - The layer stack, its nominal values are the starting point
    /// * `curve` - Measured samples inside the fit window
    /// * `material` - Density to optical constants model
    /// * `reduce_target` - Sample budget of the fast evaluator
    ///
    /// # Returns
    ///
    /// * The problem, or a model/range error for an unusable stack
    pub fn new(
        stack: &LayerStack,
        curve: &MeasuredCurve,
        material: Arc<dyn MaterialModel>,
        reduce_target: usize,
    ) -> Result<Self> {
        let geometry = StackGeometry::new(stack, curve.wavelength_nm(), material)?;
        let nominal = stack.nominal_parameters();
        let free = stack.free_slots();
        let bounds = ParameterBounds::from_nominal(&nominal, &free);
        let frozen_thickness = free.thickness.iter().map(|&f| !f).collect();
        let periodicity = Periodicity::new(geometry.spans(), &nominal.thickness, frozen_thickness);

        let periodic = stack.is_likely_periodic();
        let reduced = ReducedCurve::new(curve, reduce_target, periodic);
        let coarse = reduced.every_nth(COARSE_STEP);

        Ok(Self {
            accurate: Evaluator::from_measured(curve, periodic)?,
            fast: Evaluator::from_reduced(&reduced)?,
            coarse: Evaluator::from_reduced(&coarse)?,
            reduced_len: reduced.len(),
            geometry,
            nominal,
            bounds,
            periodicity,
            curve: curve.clone(),
            non_finite: AtomicUsize::new(0),
            underflow: AtomicUsize::new(0),
        })
    }

    pub fn geometry(&self) -> &StackGeometry {
        &self.geometry
    }

    pub fn nominal(&self) -> &CandidateParameters {
        &self.nominal
    }

    /// Nominal parameters as a flat vector.
    pub fn nominal_vector(&self) -> Array1<f64> {
        self.nominal.to_vector()
    }

    pub fn bounds(&self) -> &ParameterBounds {
        &self.bounds
    }

    pub fn layout(&self) -> ParameterLayout {
        self.bounds.layout()
    }

    pub fn periodicity(&self) -> &Periodicity {
        &self.periodicity
    }

    /// Windowed measured curve.
    pub fn curve(&self) -> &MeasuredCurve {
        &self.curve
    }

    /// Number of samples seen by the fast evaluator.
    pub fn reduced_len(&self) -> usize {
        self.reduced_len
    }

    pub fn candidate(&self, params: &Array1<f64>) -> Result<CandidateParameters> {
        CandidateParameters::from_vector(params, self.layout())
    }

    /// Scaled model curve on the window angles.
    pub fn fitted_curve(&self, params: &Array1<f64>) -> Result<FittedCurve> {
        self.check_len(params)?;
        let eval = self.accurate.evaluate(&self.geometry, params.view());
        Ok(FittedCurve::new(self.curve.angle().clone(), eval.curve))
    }

    /// Clamped reflectivity values counted over every evaluation so far.
    pub fn warnings(&self) -> ComputationWarning {
        ComputationWarning {
            non_finite: self.non_finite.load(Ordering::Relaxed),
            underflow: self.underflow.load(Ordering::Relaxed),
        }
    }

    fn check_len(&self, params: &Array1<f64>) -> Result<()> {
        if params.len() != self.bounds.len() {
            return Err(XrrError::DimensionMismatch(format!(
                "expected {} parameters, got {}",
                self.bounds.len(),
                params.len()
            )));
        }
        Ok(())
    }

    fn record(&self, eval: &Evaluation) {
        if !eval.warning.is_empty() {
            self.non_finite
                .fetch_add(eval.warning.non_finite, Ordering::Relaxed);
            self.underflow
                .fetch_add(eval.warning.underflow, Ordering::Relaxed);
        }
    }

    fn score(&self, evaluator: &Evaluator, params: &Array1<f64>) -> Evaluation {
        let eval = evaluator.evaluate(&self.geometry, params.view());
        self.record(&eval);
        eval
    }
}

impl Objective for ReflectivityProblem {
    fn parameter_count(&self) -> usize {
        self.bounds.len()
    }

    fn fast_cost(&self, params: &Array1<f64>) -> f64 {
        self.score(&self.fast, params).misfit
    }

    fn accurate(&self, params: &Array1<f64>) -> Scored {
        let eval = self.score(&self.accurate, params);
        Scored::new(eval.misfit, eval.curve)
    }

    fn coarse_cost(&self, params: &Array1<f64>) -> f64 {
        self.score(&self.coarse, params).misfit
    }

    fn normalize(&self, params: &mut Array1<f64>) {
        self.periodicity.normalize(params);
    }
}
