//! # Fit Parameters
//!
//! The fit varies three quantities per base layer: thickness, density proxy
//! and roughness. [`CandidateParameters`] holds them per kind; the optimizers
//! work on a flat `ndarray` vector laid out `[t.., rho.., sigma..]` described
//! by [`ParameterLayout`].
//!
//! - [`bounds`]: search box around the nominal values, frozen entries pinned
//! - [`periodicity`]: keeps every periodic block at its nominal period

use std::fmt;

use ndarray::{s, Array1};
use serde::{Deserialize, Serialize};

use crate::error::{Result, XrrError};

pub mod bounds;
pub mod periodicity;

pub use bounds::{Bounds, BoundsError, ParameterBounds};
pub use periodicity::Periodicity;

/// The three per-layer parameter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterKind {
    Thickness,
    Density,
    Roughness,
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParameterKind::Thickness => "t",
            ParameterKind::Density => "d",
            ParameterKind::Roughness => "s",
        };
        f.write_str(s)
    }
}

/// Index arithmetic for the flat parameter vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterLayout {
    layers: usize,
}

impl ParameterLayout {
    pub fn new(layers: usize) -> Self {
        Self { layers }
    }

    pub fn layers(&self) -> usize {
        self.layers
    }

    pub fn len(&self) -> usize {
        3 * self.layers
    }

    pub fn is_empty(&self) -> bool {
        self.layers == 0
    }

    pub fn index(&self, kind: ParameterKind, layer: usize) -> usize {
        let offset = match kind {
            ParameterKind::Thickness => 0,
            ParameterKind::Density => self.layers,
            ParameterKind::Roughness => 2 * self.layers,
        };
        offset + layer
    }

    /// Kind and layer of a flat index.
    pub fn locate(&self, index: usize) -> (ParameterKind, usize) {
        match index / self.layers.max(1) {
            0 => (ParameterKind::Thickness, index),
            1 => (ParameterKind::Density, index - self.layers),
            _ => (ParameterKind::Roughness, index - 2 * self.layers),
        }
    }

    /// Parameter label such as `t_0`.
    pub fn label(&self, index: usize) -> String {
        let (kind, layer) = self.locate(index);
        format!("{}_{}", kind, layer)
    }
}

/// One candidate solution: per-base-layer thickness, density and roughness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateParameters {
    pub thickness: Array1<f64>,
    pub density: Array1<f64>,
    pub roughness: Array1<f64>,
}

impl CandidateParameters {
    pub fn layer_count(&self) -> usize {
        self.thickness.len()
    }

    pub fn layout(&self) -> ParameterLayout {
        ParameterLayout::new(self.layer_count())
    }

    /// Flatten to `[t.., rho.., sigma..]`.
    pub fn to_vector(&self) -> Array1<f64> {
        self.thickness
            .iter()
            .chain(self.density.iter())
            .chain(self.roughness.iter())
            .copied()
            .collect()
    }

    pub fn from_vector(x: &Array1<f64>, layout: ParameterLayout) -> Result<Self> {
        if x.len() != layout.len() {
            return Err(XrrError::DimensionMismatch(format!(
                "expected {} parameters for {} layers, got {}",
                layout.len(),
                layout.layers(),
                x.len()
            )));
        }
        let l = layout.layers();
        Ok(Self {
            thickness: x.slice(s![0..l]).to_owned(),
            density: x.slice(s![l..2 * l]).to_owned(),
            roughness: x.slice(s![2 * l..3 * l]).to_owned(),
        })
    }
}

impl fmt::Display for CandidateParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.layer_count() {
            writeln!(
                f,
                "  layer {}: t = {:.4} nm, rho = {:.4}, sigma = {:.4} nm",
                i, self.thickness[i], self.density[i], self.roughness[i]
            )?;
        }
        Ok(())
    }
}
