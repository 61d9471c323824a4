//! Log-intensity misfit between a simulated and a measured curve.
//!
//! Measured intensities are in arbitrary units, so every evaluation first
//! applies the single intensity scale that minimizes the squared log
//! residual, `s = exp(mean(ln y_meas - ln y_sim))`, then returns
//! `mean(w (log10 y_meas - log10(s y_sim))^2)`.

use ndarray::{Array1, ArrayView1};

use crate::curve::{weights, MeasuredCurve, ReducedCurve};
use crate::error::{ComputationWarning, Result, XrrError};
use crate::reflectivity::simulate_stack;
use crate::stack::StackGeometry;

/// Simulated values below this are clamped before taking logarithms.
pub const SIMULATION_FLOOR: f64 = 1e-18;

/// Result of one misfit evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Weighted mean-squared log10 residual
    pub misfit: f64,

    /// Best-fit intensity scale applied to the simulation
    pub scale: f64,

    /// Scaled simulated curve on the evaluator's angles
    pub curve: Array1<f64>,

    /// Clamped simulated values
    pub warning: ComputationWarning,
}

/// Misfit on a fixed set of measured samples.
#[derive(Debug, Clone)]
pub struct Evaluator {
    angle: Vec<f64>,
    ln_measured: Array1<f64>,
    log10_measured: Array1<f64>,
    weights: Array1<f64>,
}

impl Evaluator {
    pub fn new(angle: &Array1<f64>, intensity: &Array1<f64>, weights: Array1<f64>) -> Result<Self> {
        if angle.len() != intensity.len() || weights.len() != intensity.len() {
            return Err(XrrError::DimensionMismatch(format!(
                "evaluator needs equal lengths, got {} angles, {} intensities and {} weights",
                angle.len(),
                intensity.len(),
                weights.len()
            )));
        }
        if angle.is_empty() {
            return Err(XrrError::Range("evaluator has no samples".to_string()));
        }
        let floored = intensity.mapv(|y| y.max(SIMULATION_FLOOR));
        Ok(Self {
            angle: angle.to_vec(),
            ln_measured: floored.mapv(f64::ln),
            log10_measured: floored.mapv(f64::log10),
            weights,
        })
    }

    /// Evaluator over every sample of a (windowed) curve.
    pub fn from_measured(curve: &MeasuredCurve, periodic: bool) -> Result<Self> {
        let w = weights(curve.intensity(), periodic);
        Self::new(curve.angle(), curve.intensity(), w)
    }

    /// Evaluator over a reduced curve, using its own weights.
    pub fn from_reduced(curve: &ReducedCurve) -> Result<Self> {
        Self::new(&curve.angle, &curve.intensity, curve.weights.clone())
    }

    pub fn len(&self) -> usize {
        self.angle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.angle.is_empty()
    }

    pub fn angle(&self) -> &[f64] {
        &self.angle
    }

    /// Misfit of an unscaled simulated curve.
    pub fn misfit_of(&self, simulated: &Array1<f64>) -> Evaluation {
        let mut warning = ComputationWarning::default();
        let sim = simulated.mapv(|y| {
            if !y.is_finite() {
                warning.non_finite += 1;
                SIMULATION_FLOOR
            } else if y < SIMULATION_FLOOR {
                warning.underflow += 1;
                SIMULATION_FLOOR
            } else {
                y
            }
        });

        let n = sim.len() as f64;
        let log_ratio = self
            .ln_measured
            .iter()
            .zip(sim.iter())
            .map(|(&lm, &ys)| lm - ys.ln())
            .sum::<f64>()
            / n;
        let scale = log_ratio.exp();
        let curve = sim.mapv(|y| y * scale);

        let misfit = self
            .log10_measured
            .iter()
            .zip(curve.iter())
            .zip(self.weights.iter())
            .map(|((&lm, &ys), &w)| {
                let r = lm - ys.log10();
                w * r * r
            })
            .sum::<f64>()
            / n;

        Evaluation {
            misfit: if misfit.is_finite() { misfit } else { f64::INFINITY },
            scale,
            curve,
            warning,
        }
    }

    /// Simulate the flat parameter vector `x` on `geometry` and score it.
    pub fn evaluate(&self, geometry: &StackGeometry, x: ArrayView1<f64>) -> Evaluation {
        let media = geometry.expand_flat(x);
        let simulated = simulate_stack(&media, geometry.wavelength_nm(), &self.angle);
        self.misfit_of(&simulated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn evaluator() -> Evaluator {
        Evaluator::new(
            &array![0.1, 0.2, 0.3, 0.4],
            &array![1.0, 0.1, 0.01, 0.001],
            Array1::ones(4),
        )
        .unwrap()
    }

    #[test]
    fn test_scale_invariance() {
        let ev = evaluator();
        let result = ev.misfit_of(&array![0.5, 0.05, 0.005, 0.0005]);
        assert_relative_eq!(result.misfit, 0.0, epsilon = 1e-20);
        assert_relative_eq!(result.scale, 2.0, max_relative = 1e-12);
        assert_relative_eq!(result.curve[2], 0.01, max_relative = 1e-12);
        assert!(result.warning.is_empty());
    }

    #[test]
    fn test_misfit_value() {
        let ev = evaluator();
        // One decade off at the second point, scale absorbs the mean.
        let result = ev.misfit_of(&array![1.0, 1.0, 0.01, 0.001]);
        let mean = 0.25;
        let r: Vec<f64> = vec![0.0 + mean, -1.0 + mean, mean, mean];
        let expected = r.iter().map(|v| v * v).sum::<f64>() / 4.0;
        assert_relative_eq!(result.misfit, expected, max_relative = 1e-10);
    }

    #[test]
    fn test_non_finite_is_clamped() {
        let ev = evaluator();
        let result = ev.misfit_of(&array![f64::NAN, 0.0, 0.01, 0.001]);
        assert_eq!(result.warning.non_finite, 1);
        assert_eq!(result.warning.underflow, 1);
        assert!(result.misfit.is_finite());
    }

    #[test]
    fn test_length_mismatch() {
        assert!(matches!(
            Evaluator::new(&array![0.1], &array![1.0, 2.0], Array1::ones(2)),
            Err(XrrError::DimensionMismatch(_))
        ));
    }
}
