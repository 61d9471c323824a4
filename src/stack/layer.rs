//! Single layers and the substrate.

use serde::{Deserialize, Serialize};

use crate::error::{Result, XrrError};
use crate::stack::material::{DispersionTable, MaterialModel};

/// Source of a medium's optical constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Optics {
    /// Explicit constants, independent of wavelength
    Constant { n: f64, k: f64 },

    /// Tabulated dispersion interpolated at the fit wavelength
    Tabulated(DispersionTable),

    /// Derived from the density proxy through a [`MaterialModel`]
    Density,
}

impl Optics {
    /// Whether the optical constants are supplied explicitly.
    pub fn is_explicit(&self) -> bool {
        !matches!(self, Optics::Density)
    }

    /// Resolve explicit constants at `wavelength_nm`; `None` for density-derived optics.
    pub fn resolve_explicit(&self, wavelength_nm: f64) -> Result<Option<(f64, f64)>> {
        match self {
            Optics::Constant { n, k } => Ok(Some((*n, *k))),
            Optics::Tabulated(table) => table.at(wavelength_nm).map(Some),
            Optics::Density => Ok(None),
        }
    }

    /// Optical constants at `wavelength_nm`, falling back to `model` for density-derived optics.
    pub fn resolve(
        &self,
        density: f64,
        wavelength_nm: f64,
        model: &dyn MaterialModel,
    ) -> Result<(f64, f64)> {
        Ok(self
            .resolve_explicit(wavelength_nm)?
            .unwrap_or_else(|| model.optical_constants(density, wavelength_nm)))
    }
}

/// Per-parameter freeze flags; a frozen parameter stays at its nominal value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezeFlags {
    #[serde(default)]
    pub thickness: bool,
    #[serde(default)]
    pub density: bool,
    #[serde(default)]
    pub roughness: bool,
}

impl FreezeFlags {
    /// All three parameters frozen.
    pub fn all() -> Self {
        Self {
            thickness: true,
            density: true,
            roughness: true,
        }
    }
}

/// A finite layer of the stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub optics: Optics,
    /// Nominal thickness in nm
    pub thickness: f64,
    /// Nominal interface roughness in nm
    pub roughness: f64,
    /// Nominal density proxy
    pub density: f64,
    #[serde(default)]
    pub freeze: FreezeFlags,
}

impl Layer {
    /// A density-derived layer.
    pub fn new(name: impl Into<String>, thickness: f64, roughness: f64, density: f64) -> Self {
        Self {
            name: name.into(),
            optics: Optics::Density,
            thickness,
            roughness,
            density,
            freeze: FreezeFlags::default(),
        }
    }

    /// A layer with explicit constant optics.
    pub fn with_constants(
        name: impl Into<String>,
        n: f64,
        k: f64,
        thickness: f64,
        roughness: f64,
    ) -> Self {
        Self {
            optics: Optics::Constant { n, k },
            ..Self::new(name, thickness, roughness, 1.0)
        }
    }

    pub fn with_optics(mut self, optics: Optics) -> Self {
        self.optics = optics;
        self
    }

    pub fn with_density(mut self, density: f64) -> Self {
        self.density = density;
        self
    }

    pub fn with_freeze(mut self, freeze: FreezeFlags) -> Self {
        self.freeze = freeze;
        self
    }

    /// Whether the density enters the optical model and may be optimized.
    pub fn density_is_free(&self) -> bool {
        !self.freeze.density && !self.optics.is_explicit()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.thickness.is_finite() && self.thickness > 0.0) {
            return Err(XrrError::Input(format!(
                "layer '{}': thickness must be positive, got {}",
                self.name, self.thickness
            )));
        }
        if !(self.roughness.is_finite() && self.roughness >= 0.0) {
            return Err(XrrError::Input(format!(
                "layer '{}': roughness must be non-negative, got {}",
                self.name, self.roughness
            )));
        }
        if !(self.density.is_finite() && self.density > 0.0) {
            return Err(XrrError::Input(format!(
                "layer '{}': density must be positive, got {}",
                self.name, self.density
            )));
        }
        if let Optics::Constant { n, k } = self.optics {
            if !(n.is_finite() && k.is_finite()) {
                return Err(XrrError::Input(format!(
                    "layer '{}': optical constants must be finite",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Semi-infinite terminal medium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Substrate {
    pub name: String,
    pub optics: Optics,
    /// Density proxy used when `optics` is density-derived
    pub density: f64,
    pub roughness: f64,
}

impl Substrate {
    pub fn new(name: impl Into<String>, optics: Optics, roughness: f64) -> Self {
        Self {
            name: name.into(),
            optics,
            density: 2.33,
            roughness,
        }
    }

    pub fn with_constants(name: impl Into<String>, n: f64, k: f64, roughness: f64) -> Self {
        Self::new(name, Optics::Constant { n, k }, roughness)
    }

    pub fn with_density(mut self, density: f64) -> Self {
        self.density = density;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.roughness.is_finite() && self.roughness >= 0.0) {
            return Err(XrrError::Input(format!(
                "substrate '{}': roughness must be non-negative, got {}",
                self.name, self.roughness
            )));
        }
        if !self.optics.is_explicit() && !(self.density.is_finite() && self.density > 0.0) {
            return Err(XrrError::Input(format!(
                "substrate '{}': density must be positive, got {}",
                self.name, self.density
            )));
        }
        Ok(())
    }
}
