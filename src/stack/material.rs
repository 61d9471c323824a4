//! Optical constants of layer materials.
//!
//! A layer either carries explicit optical constants (a constant pair or a
//! tabulated dispersion) or derives them from its density through a
//! [`MaterialModel`]. The density relation is a simplified placeholder, so
//! it is kept behind a trait and can be swapped per fit.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, XrrError};

/// Maps a density proxy to optical constants `(n, k)` at a wavelength.
pub trait MaterialModel: Send + Sync + fmt::Debug {
    /// Human-readable name of this model.
    fn name(&self) -> &str;

    /// Refractive index real part `n` and extinction `k` for `density`.
    fn optical_constants(&self, density: f64, wavelength_nm: f64) -> (f64, f64);
}

/// Linear density proxy `n = 1 - c * rho`, `k = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DensityProxy {
    /// Decrement per unit density. Default: 2.7e-6
    pub coefficient: f64,
}

impl Default for DensityProxy {
    fn default() -> Self {
        Self { coefficient: 2.7e-6 }
    }
}

impl MaterialModel for DensityProxy {
    fn name(&self) -> &str {
        "density-proxy"
    }

    fn optical_constants(&self, density: f64, _wavelength_nm: f64) -> (f64, f64) {
        (1.0 - self.coefficient * density, 0.0)
    }
}

/// Tabulated dispersion `n(lambda)`, `k(lambda)` with wavelengths in nm.
///
/// Always non-empty and sorted by wavelength; deserialized tables go
/// through [`DispersionTable::new`] as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDispersionTable")]
pub struct DispersionTable {
    wavelength_nm: Vec<f64>,
    n: Vec<f64>,
    k: Vec<f64>,
}

/// Unchecked columns as they appear in a serialized stack.
#[derive(Deserialize)]
struct RawDispersionTable {
    wavelength_nm: Vec<f64>,
    n: Vec<f64>,
    k: Vec<f64>,
}

impl TryFrom<RawDispersionTable> for DispersionTable {
    type Error = XrrError;

    fn try_from(raw: RawDispersionTable) -> Result<Self> {
        Self::new(raw.wavelength_nm, raw.n, raw.k)
    }
}

impl DispersionTable {
    /// Build a table from columns. Rows are sorted by wavelength and
    /// duplicate wavelengths keep their first occurrence.
    pub fn new(wavelength_nm: Vec<f64>, n: Vec<f64>, k: Vec<f64>) -> Result<Self> {
        if wavelength_nm.len() != n.len() || wavelength_nm.len() != k.len() {
            return Err(XrrError::DimensionMismatch(format!(
                "dispersion columns differ in length: {} wavelengths, {} n, {} k",
                wavelength_nm.len(),
                n.len(),
                k.len()
            )));
        }
        if wavelength_nm.is_empty() {
            return Err(XrrError::Input("dispersion table has no rows".to_string()));
        }
        if wavelength_nm
            .iter()
            .chain(n.iter())
            .chain(k.iter())
            .any(|v| !v.is_finite())
        {
            return Err(XrrError::Input(
                "dispersion table contains non-finite values".to_string(),
            ));
        }

        let mut rows: Vec<(f64, f64, f64)> = wavelength_nm
            .into_iter()
            .zip(n)
            .zip(k)
            .map(|((l, n), k)| (l, n, k))
            .collect();
        // Stable sort keeps the first row of each duplicated wavelength in front.
        rows.sort_by(|a, b| a.0.total_cmp(&b.0));
        rows.dedup_by(|later, earlier| later.0 == earlier.0);

        Ok(Self {
            wavelength_nm: rows.iter().map(|r| r.0).collect(),
            n: rows.iter().map(|r| r.1).collect(),
            k: rows.iter().map(|r| r.2).collect(),
        })
    }

    /// Parse an `lambda[Angstrom] n k` text table.
    ///
    /// Anything after `#`, `//` or `;` is a comment. Columns may be separated
    /// by commas or whitespace; rows that do not start with three numbers are
    /// skipped. Wavelengths are converted to nm.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lam = Vec::new();
        let mut n = Vec::new();
        let mut k = Vec::new();

        for line in text.lines() {
            let row = line
                .split('#')
                .next()
                .and_then(|s| s.split("//").next())
                .and_then(|s| s.split(';').next())
                .unwrap_or("")
                .trim();
            if row.is_empty() {
                continue;
            }

            let fields: Vec<&str> = row
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .collect();
            if fields.len() < 3 {
                continue;
            }

            let parsed: std::result::Result<Vec<f64>, _> =
                fields[..3].iter().map(|s| s.parse::<f64>()).collect();
            if let Ok(values) = parsed {
                lam.push(values[0] / 10.0);
                n.push(values[1]);
                k.push(values[2]);
            }
        }

        if lam.is_empty() {
            return Err(XrrError::Input(
                "no numeric rows like 'lambda[A] n k' were found".to_string(),
            ));
        }

        Self::new(lam, n, k)
    }

    /// Covered wavelength range in nm.
    pub fn range(&self) -> (f64, f64) {
        (
            self.wavelength_nm[0],
            self.wavelength_nm[self.wavelength_nm.len() - 1],
        )
    }

    pub fn len(&self) -> usize {
        self.wavelength_nm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelength_nm.is_empty()
    }

    /// Linearly interpolated `(n, k)` at `wavelength_nm`.
    ///
    /// Returns a range error when the wavelength is outside the table.
    pub fn at(&self, wavelength_nm: f64) -> Result<(f64, f64)> {
        let (lo, hi) = self.range();
        if !(wavelength_nm >= lo && wavelength_nm <= hi) {
            return Err(XrrError::Range(format!(
                "wavelength {} nm is outside the dispersion range [{}, {}] nm",
                wavelength_nm, lo, hi
            )));
        }

        let upper = self
            .wavelength_nm
            .partition_point(|&l| l < wavelength_nm)
            .min(self.wavelength_nm.len() - 1);
        if self.wavelength_nm[upper] == wavelength_nm || upper == 0 {
            return Ok((self.n[upper], self.k[upper]));
        }

        let lower = upper - 1;
        let t = (wavelength_nm - self.wavelength_nm[lower])
            / (self.wavelength_nm[upper] - self.wavelength_nm[lower]);
        Ok((
            self.n[lower] + t * (self.n[upper] - self.n[lower]),
            self.k[lower] + t * (self.k[upper] - self.k[lower]),
        ))
    }
}
