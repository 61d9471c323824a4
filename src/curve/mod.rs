//! Measured curves and their preprocessing for the fit.
//!
//! A [`MeasuredCurve`] is restricted to a [`FitWindow`], then thinned to a
//! [`ReducedCurve`] that keeps narrow fringes while cutting the number of
//! forward-model evaluations per candidate.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{Result, XrrError};

pub mod export;
pub mod reduce;
pub mod weights;

pub use export::FittedCurve;
pub use reduce::{reduce, ReducedCurve};
pub use weights::{moving_average, peak_weights, weights};

/// Smallest intensity kept after loading.
pub const INTENSITY_FLOOR: f64 = 1e-12;

/// Reflectivity scan: grazing angles in degrees and positive intensities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasuredCurve {
    angle: Array1<f64>,
    intensity: Array1<f64>,
    wavelength_nm: f64,
}

impl MeasuredCurve {
    /// Validate a scan and clamp intensities to [`INTENSITY_FLOOR`].
    pub fn new(
        angle: Array1<f64>,
        intensity: Array1<f64>,
        wavelength_nm: f64,
    ) -> Result<Self> {
        if angle.len() != intensity.len() {
            return Err(XrrError::Input(format!(
                "angle ({}) and intensity ({}) lengths must match",
                angle.len(),
                intensity.len()
            )));
        }
        if angle.is_empty() {
            return Err(XrrError::Input("curve has no samples".to_string()));
        }
        if !(wavelength_nm.is_finite() && wavelength_nm > 0.0) {
            return Err(XrrError::Input(format!(
                "wavelength must be positive, got {}",
                wavelength_nm
            )));
        }
        if angle.iter().any(|a| !a.is_finite()) || intensity.iter().any(|y| !y.is_finite()) {
            return Err(XrrError::Input(
                "curve contains non-finite samples".to_string(),
            ));
        }
        if angle.windows(2).into_iter().any(|w| w[1] <= w[0]) {
            return Err(XrrError::Input(
                "curve angles must be strictly increasing".to_string(),
            ));
        }

        let intensity = intensity.mapv(|y| y.max(INTENSITY_FLOOR));
        Ok(Self {
            angle,
            intensity,
            wavelength_nm,
        })
    }

    pub fn from_vecs(angle: Vec<f64>, intensity: Vec<f64>, wavelength_nm: f64) -> Result<Self> {
        Self::new(Array1::from(angle), Array1::from(intensity), wavelength_nm)
    }

    pub fn angle(&self) -> &Array1<f64> {
        &self.angle
    }

    pub fn intensity(&self) -> &Array1<f64> {
        &self.intensity
    }

    pub fn wavelength_nm(&self) -> f64 {
        self.wavelength_nm
    }

    pub fn len(&self) -> usize {
        self.angle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.angle.is_empty()
    }

    /// Sub-curve at the given (sorted) indices.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            angle: indices.iter().map(|&i| self.angle[i]).collect(),
            intensity: indices.iter().map(|&i| self.intensity[i]).collect(),
            wavelength_nm: self.wavelength_nm,
        }
    }

    /// First and last angle.
    pub fn span(&self) -> (f64, f64) {
        (self.angle[0], self.angle[self.angle.len() - 1])
    }
}

/// Inclusive angle range selecting the fitted samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitWindow {
    pub start: f64,
    pub end: f64,
}

impl FitWindow {
    pub fn new(start: f64, end: f64) -> Result<Self> {
        if !(start.is_finite() && end.is_finite()) {
            return Err(XrrError::Input(format!(
                "fit window bounds must be numbers, got [{}, {}]",
                start, end
            )));
        }
        if start >= end {
            return Err(XrrError::Input(format!(
                "fit window start ({}) must be below its end ({})",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, angle: f64) -> bool {
        angle >= self.start && angle <= self.end
    }
}

/// Samples of `curve` inside `window`.
///
/// Returns a range error when the window holds no sample.
pub fn restrict_to_window(curve: &MeasuredCurve, window: &FitWindow) -> Result<MeasuredCurve> {
    let indices: Vec<usize> = curve
        .angle()
        .iter()
        .enumerate()
        .filter(|(_, &a)| window.contains(a))
        .map(|(i, _)| i)
        .collect();

    if indices.is_empty() {
        let (lo, hi) = curve.span();
        return Err(XrrError::Range(format!(
            "no data in [{}, {}]; the curve covers [{}, {}]",
            window.start, window.end, lo, hi
        )));
    }
    Ok(curve.select(&indices))
}
