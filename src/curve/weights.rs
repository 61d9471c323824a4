//! Peak weights for multilayer curves.
//!
//! Bragg peaks of a superlattice stand well above the local background and
//! carry most of the period information, so the misfit counts them more.

use ndarray::Array1;

/// Centered moving average with zero padding at both ends.
///
/// The window is at least 5 samples. Output has the input's length; near the
/// edges the missing neighbours count as zero.
pub fn moving_average(y: &Array1<f64>, window: usize) -> Array1<f64> {
    let n = y.len();
    let m = window.max(5);
    let half = (m - 1) / 2;

    // prefix[i] = y[0] + ... + y[i-1]
    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    let mut acc = 0.0;
    for &v in y.iter() {
        acc += v;
        prefix.push(acc);
    }

    (0..n)
        .map(|t| {
            let hi = (t + half).min(n - 1);
            let lo = (t + half).saturating_sub(m - 1);
            (prefix[hi + 1] - prefix[lo]) / m as f64
        })
        .collect()
}

/// Weight `max(y / avg, 1)` on samples at least three times their local average.
pub fn peak_weights(intensity: &Array1<f64>) -> Array1<f64> {
    let window = (intensity.len() / 50).max(7);
    let avg = moving_average(intensity, window);
    intensity
        .iter()
        .zip(avg.iter())
        .map(|(&y, &a)| {
            if a > 0.0 && y >= 3.0 * a {
                (y / a).max(1.0)
            } else {
                1.0
            }
        })
        .collect()
}

/// Misfit weights: peak weights for periodic stacks, uniform otherwise.
pub fn weights(intensity: &Array1<f64>, periodic: bool) -> Array1<f64> {
    if periodic {
        peak_weights(intensity)
    } else {
        Array1::ones(intensity.len())
    }
}
