use std::fmt;

use thiserror::Error;

/// Error types for the xrrfit-rs library.
#[derive(Error, Debug)]
pub enum XrrError {
    /// The layer stack topology cannot be modelled (too few media, empty repeat block).
    #[error("Model error: {0}")]
    Model(String),

    /// Non-numeric, non-physical or inverted input values.
    #[error("Invalid input: {0}")]
    Input(String),

    /// Empty fit window or a wavelength outside a tabulated dispersion.
    #[error("Range error: {0}")]
    Range(String),

    /// Error indicating a mismatch in vector dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Error indicating optimization failed.
    #[error("Optimization failed: {0}")]
    OptimizationFailure(String),

    /// I/O error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for cases that don't fit the other categories.
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for xrrfit-rs operations.
pub type Result<T> = std::result::Result<T, XrrError>;

/// Extensions for converting from other error types.
impl From<String> for XrrError {
    fn from(s: String) -> Self {
        XrrError::Other(s)
    }
}

impl From<&str> for XrrError {
    fn from(s: &str) -> Self {
        XrrError::Other(s.to_string())
    }
}

/// Non-fatal anomaly met while evaluating reflectivity.
///
/// Non-finite or underflowing simulated intensities are clamped to a small
/// positive floor and the run continues; the warning only records how often
/// that happened so it can be logged once per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComputationWarning {
    /// Number of non-finite simulated points replaced by the floor
    pub non_finite: usize,

    /// Number of finite points below the floor
    pub underflow: usize,
}

impl ComputationWarning {
    pub fn is_empty(&self) -> bool {
        self.non_finite == 0 && self.underflow == 0
    }

    pub fn merge(&mut self, other: ComputationWarning) {
        self.non_finite += other.non_finite;
        self.underflow += other.underflow;
    }
}

impl fmt::Display for ComputationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "clamped {} non-finite and {} underflowing reflectivity values",
            self.non_finite, self.underflow
        )
    }
}
