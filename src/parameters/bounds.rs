//! Parameter bounds for the fit.
//!
//! Every entry of the flat parameter vector gets a closed interval derived
//! from its nominal value. Frozen entries collapse to `[nominal, nominal]`,
//! which keeps them exactly at nominal through sampling and clipping.

use ndarray::Array1;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::XrrError;
use crate::parameters::{CandidateParameters, ParameterKind, ParameterLayout};
use crate::stack::FreeSlots;

/// Errors that can occur when working with parameter bounds
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoundsError {
    #[error("Invalid bounds: min ({min}) must not exceed max ({max})")]
    InvalidBounds { min: f64, max: f64 },

    #[error("Bounds must be finite, got [{min}, {max}]")]
    Unbounded { min: f64, max: f64 },
}

impl From<BoundsError> for XrrError {
    fn from(err: BoundsError) -> Self {
        XrrError::Input(err.to_string())
    }
}

/// Closed interval for one parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Minimum allowed value for the parameter
    pub min: f64,

    /// Maximum allowed value for the parameter
    pub max: f64,
}

impl Bounds {
    /// Create a new bounds constraint with min and max values
    ///
    /// # Examples
    ///
    /// ```
    /// use xrrfit_rs::parameters::bounds::Bounds;
    ///
    /// let bounds = Bounds::new(0.0, 10.0).unwrap();
    /// assert_eq!(bounds.width(), 10.0);
    /// assert!(Bounds::new(1.0, 0.0).is_err());
    /// ```
    pub fn new(min: f64, max: f64) -> Result<Self, BoundsError> {
        if !(min.is_finite() && max.is_finite()) {
            return Err(BoundsError::Unbounded { min, max });
        }
        if min > max {
            return Err(BoundsError::InvalidBounds { min, max });
        }

        Ok(Self { min, max })
    }

    /// A degenerate interval pinning the parameter to `value`
    pub fn fixed(value: f64) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    /// Whether the interval has collapsed to a single value
    pub fn is_fixed(&self) -> bool {
        self.min == self.max
    }

    pub fn is_within_bounds(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Uniform draw; fixed intervals return their value without consuming randomness.
    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        if self.is_fixed() {
            self.min
        } else {
            rng.gen_range(self.min..self.max)
        }
    }
}

/// Bounds for every entry of the flat parameter vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterBounds {
    layout: ParameterLayout,
    bounds: Vec<Bounds>,
}

impl ParameterBounds {
    /// Search box around the nominal values.
    ///
    /// * thickness: `[max(0.3 t, 1e-5), max(3 t, 3e-5)]`
    /// * density: `[0.5 rho, 2 rho]`
    /// * roughness: `[0.01, max(3 sigma, 0.5)]`
    pub fn from_nominal(nominal: &CandidateParameters, free: &FreeSlots) -> Self {
        let layout = ParameterLayout::new(nominal.layer_count());
        let mut bounds = Vec::with_capacity(layout.len());

        for (i, &t) in nominal.thickness.iter().enumerate() {
            bounds.push(if free.thickness[i] {
                Bounds {
                    min: (0.3 * t).max(1e-5),
                    max: (3.0 * t).max(3e-5),
                }
            } else {
                Bounds::fixed(t)
            });
        }
        for (i, &rho) in nominal.density.iter().enumerate() {
            bounds.push(if free.density[i] {
                Bounds {
                    min: 0.5 * rho,
                    max: 2.0 * rho,
                }
            } else {
                Bounds::fixed(rho)
            });
        }
        for (i, &s) in nominal.roughness.iter().enumerate() {
            bounds.push(if free.roughness[i] {
                Bounds {
                    min: 0.01,
                    max: (3.0 * s).max(0.5),
                }
            } else {
                Bounds::fixed(s)
            });
        }

        Self { layout, bounds }
    }

    pub fn layout(&self) -> ParameterLayout {
        self.layout
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    pub fn as_slice(&self) -> &[Bounds] {
        &self.bounds
    }

    pub fn get(&self, kind: ParameterKind, layer: usize) -> Bounds {
        self.bounds[self.layout.index(kind, layer)]
    }

    /// Lower and upper bounds as `(min, max)` pairs.
    pub fn pairs(&self) -> Vec<(f64, f64)> {
        self.bounds.iter().map(|b| (b.min, b.max)).collect()
    }

    /// Indices of the entries with a non-degenerate interval.
    pub fn free_indices(&self) -> Vec<usize> {
        self.bounds
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.is_fixed())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn free_count(&self) -> usize {
        self.bounds.iter().filter(|b| !b.is_fixed()).count()
    }

    /// Interval widths, zero for fixed entries.
    pub fn widths(&self) -> Array1<f64> {
        self.bounds.iter().map(|b| b.width()).collect()
    }

    /// Clip a point to the bounds in place.
    pub fn clip(&self, point: &mut Array1<f64>) {
        for (x, b) in point.iter_mut().zip(self.bounds.iter()) {
            *x = b.clamp(*x);
        }
    }

    pub fn contains(&self, point: &Array1<f64>) -> bool {
        point.len() == self.bounds.len()
            && point
                .iter()
                .zip(self.bounds.iter())
                .all(|(x, b)| b.is_within_bounds(*x))
    }

    /// Uniform random point inside the box.
    pub fn random_point(&self, rng: &mut impl Rng) -> Array1<f64> {
        self.bounds.iter().map(|b| b.sample(rng)).collect()
    }
}
