//! Curve preprocessing: windowing, reduction, weights and export.

use approx::assert_relative_eq;
use ndarray::Array1;
use xrrfit_rs::curve::{
    reduce, restrict_to_window, weights, FitWindow, FittedCurve, MeasuredCurve, ReducedCurve,
};
use xrrfit_rs::error::XrrError;

/// Smooth decay with a narrow spike every `period` samples.
fn spiky_curve(n: usize, period: usize) -> MeasuredCurve {
    let angle: Vec<f64> = (0..n).map(|i| 0.01 * (i + 1) as f64).collect();
    let intensity: Vec<f64> = (0..n)
        .map(|i| {
            let base = (-0.004 * i as f64).exp();
            if i % period == period / 2 {
                base * 20.0
            } else {
                base
            }
        })
        .collect();
    MeasuredCurve::from_vecs(angle, intensity, 0.15418).unwrap()
}

#[test]
fn test_window_selects_samples() {
    let curve = spiky_curve(300, 50);
    let window = FitWindow::new(0.495, 1.005).unwrap();
    let windowed = restrict_to_window(&curve, &window).unwrap();
    let (lo, hi) = windowed.span();
    assert_relative_eq!(lo, 0.5, epsilon = 1e-12);
    assert_relative_eq!(hi, 1.0, epsilon = 1e-12);
    assert_eq!(windowed.len(), 51);
    assert_eq!(windowed.wavelength_nm(), curve.wavelength_nm());
}

#[test]
fn test_empty_window_is_range_error() {
    let curve = spiky_curve(300, 50);
    let window = FitWindow::new(5.0, 6.0).unwrap();
    assert!(matches!(
        restrict_to_window(&curve, &window),
        Err(XrrError::Range(_))
    ));
    assert!(matches!(FitWindow::new(2.0, 2.0), Err(XrrError::Input(_))));
}

#[test]
fn test_reduction_keeps_spikes() {
    let curve = spiky_curve(3000, 100);
    let idx = reduce(curve.intensity(), 200);
    assert!(idx.len() <= 200);
    assert_eq!(idx[0], 0);
    assert_eq!(*idx.last().unwrap(), 2999);
    for spike in (50..3000).step_by(100) {
        assert!(idx.binary_search(&spike).is_ok(), "spike {} dropped", spike);
    }
}

#[test]
fn test_reduced_curve_weights() {
    let curve = spiky_curve(3000, 100);

    let flat = ReducedCurve::new(&curve, 600, false);
    assert!(flat.weights.iter().all(|&w| w == 1.0));

    let periodic = ReducedCurve::new(&curve, 600, true);
    assert_eq!(periodic.len(), periodic.weights.len());
    let spike_pos = periodic.indices.iter().position(|&i| i == 1050).unwrap();
    assert!(periodic.weights[spike_pos] > 3.0);
    assert!(periodic.weights.iter().all(|&w| w >= 1.0));

    for (k, &i) in periodic.indices.iter().enumerate() {
        assert_eq!(periodic.angle[k], curve.angle()[i]);
        assert_eq!(periodic.intensity[k], curve.intensity()[i]);
    }
}

#[test]
fn test_weights_on_short_curve() {
    let mut y = Array1::from_elem(40, 1.0);
    y[20] = 30.0;
    let w = weights(&y, true);
    assert!(w[20] > 3.0);
    assert_eq!(w[5], 1.0);
    assert_eq!(weights(&y, false), Array1::<f64>::ones(40));
}

#[test]
fn test_export_tables() {
    let curve = spiky_curve(4, 2);
    let fitted = FittedCurve::new(curve.angle().clone(), curve.intensity() * 0.5);

    let mut out = Vec::new();
    fitted.write_table(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "x\tfitted");
    assert_eq!(lines.len(), 5);
    assert!(lines[1].starts_with("0.010000\t"));

    let mut out = Vec::new();
    fitted.write_comparison(&curve, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("x\tmeasured\tfitted\n"));
    assert_eq!(text.lines().count(), 5);

    let short = FittedCurve::new(Array1::zeros(2), Array1::zeros(2));
    assert!(matches!(
        short.write_comparison(&curve, Vec::<u8>::new()),
        Err(XrrError::DimensionMismatch(_))
    ));
}
