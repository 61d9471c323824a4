//! Tab-separated export of fitted curves.

use std::io::Write;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::curve::MeasuredCurve;
use crate::error::{Result, XrrError};

/// Scaled simulated reflectivity on the angles of the fit window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedCurve {
    pub angle: Array1<f64>,
    pub value: Array1<f64>,
}

impl FittedCurve {
    pub fn new(angle: Array1<f64>, value: Array1<f64>) -> Self {
        Self { angle, value }
    }

    pub fn len(&self) -> usize {
        self.angle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.angle.is_empty()
    }

    /// Write an `x\tfitted` table with a header row.
    pub fn write_table<W: Write>(&self, mut writer: W) -> Result<()> {
        writeln!(writer, "x\tfitted")?;
        for (x, y) in self.angle.iter().zip(self.value.iter()) {
            writeln!(writer, "{:.6}\t{:.6e}", x, y)?;
        }
        Ok(())
    }

    /// Write an `x\tmeasured\tfitted` table.
    ///
    /// The measured curve must cover exactly the fitted angles.
    pub fn write_comparison<W: Write>(&self, measured: &MeasuredCurve, mut writer: W) -> Result<()> {
        if measured.len() != self.len() {
            return Err(XrrError::DimensionMismatch(format!(
                "measured curve has {} samples, fitted curve has {}",
                measured.len(),
                self.len()
            )));
        }
        writeln!(writer, "x\tmeasured\tfitted")?;
        for ((x, m), y) in self
            .angle
            .iter()
            .zip(measured.intensity().iter())
            .zip(self.value.iter())
        {
            writeln!(writer, "{:.6}\t{:.6e}\t{:.6e}", x, m, y)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_write_table() {
        let curve = FittedCurve::new(array![0.1, 0.2], array![0.5, 0.25]);
        let mut out = Vec::new();
        curve.write_table(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "x\tfitted");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("0.100000\t5.000000e-1"));
    }

    #[test]
    fn test_write_comparison_checks_length() {
        let curve = FittedCurve::new(array![0.1, 0.2], array![0.5, 0.25]);
        let measured = MeasuredCurve::from_vecs(vec![0.1], vec![0.4], 0.154).unwrap();
        assert!(curve.write_comparison(&measured, Vec::new()).is_err());

        let measured = MeasuredCurve::from_vecs(vec![0.1, 0.2], vec![0.4, 0.2], 0.154).unwrap();
        let mut out = Vec::new();
        curve.write_comparison(&measured, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert_eq!(text.lines().next(), Some("x\tmeasured\tfitted"));
    }
}
