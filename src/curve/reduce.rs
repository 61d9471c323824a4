//! Peak-preserving downsampling.
//!
//! Half of the kept samples are spread uniformly over the curve; the rest go
//! to the points where `ln(intensity)` bends the most, which is where Kiessig
//! fringes and Bragg peaks live.

use ndarray::Array1;

use crate::curve::{weights, MeasuredCurve};

/// Floor applied before taking logarithms.
const LOG_FLOOR: f64 = 1e-18;

/// Indices of the samples to keep, sorted and unique.
///
/// Returns every index when `intensity.len() <= target`. Otherwise at most
/// `target` indices are returned, always including the first and the last.
/// The first and last samples are always kept, so a `target` below 2 is
/// raised to 2.
pub fn reduce(intensity: &Array1<f64>, target: usize) -> Vec<usize> {
    let target = target.max(2);
    let n = intensity.len();
    if n <= target {
        return (0..n).collect();
    }

    let k_uniform = (target / 2).max(2);
    let k_curv = target.saturating_sub(k_uniform);

    let mut indices: Vec<usize> = (0..k_uniform)
        .map(|i| i * (n - 1) / (k_uniform - 1))
        .collect();

    if k_curv > 0 {
        let ly: Vec<f64> = intensity.iter().map(|&y| y.max(LOG_FLOOR).ln()).collect();
        // Zero-padded second difference, same length as the input.
        let mut curvature: Vec<(usize, f64)> = (0..n)
            .map(|i| {
                let prev = if i == 0 { 0.0 } else { ly[i - 1] };
                let next = ly.get(i + 1).copied().unwrap_or(0.0);
                (i, (prev - 2.0 * ly[i] + next).abs())
            })
            .collect();
        curvature.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        indices.extend(curvature.iter().take(k_curv).map(|&(i, _)| i));
    }

    indices.sort_unstable();
    indices.dedup();

    if let Some(first) = indices.first_mut() {
        *first = 0;
    }
    if let Some(last) = indices.last_mut() {
        *last = n - 1;
    }
    indices
}

/// Downsampled copy of a windowed curve with its misfit weights.
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedCurve {
    /// Positions of the kept samples in the windowed curve
    pub indices: Vec<usize>,
    pub angle: Array1<f64>,
    pub intensity: Array1<f64>,
    pub weights: Array1<f64>,
}

impl ReducedCurve {
    /// Reduce `curve` to about `target` samples.
    ///
    /// Peak weights are recomputed on the reduced samples when `periodic`.
    pub fn new(curve: &MeasuredCurve, target: usize, periodic: bool) -> Self {
        let indices = reduce(curve.intensity(), target);
        let reduced = curve.select(&indices);
        let weights = weights(reduced.intensity(), periodic);
        Self {
            indices,
            angle: reduced.angle().clone(),
            intensity: reduced.intensity().clone(),
            weights,
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Every `step`-th sample, keeping the last one.
    pub fn every_nth(&self, step: usize) -> Self {
        let step = step.max(1);
        let n = self.len();
        let mut picks: Vec<usize> = (0..n).step_by(step).collect();
        if n > 0 && picks.last() != Some(&(n - 1)) {
            picks.push(n - 1);
        }
        Self {
            indices: picks.iter().map(|&i| self.indices[i]).collect(),
            angle: picks.iter().map(|&i| self.angle[i]).collect(),
            intensity: picks.iter().map(|&i| self.intensity[i]).collect(),
            weights: picks.iter().map(|&i| self.weights[i]).collect(),
        }
    }
}
