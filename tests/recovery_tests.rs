//! End-to-end recovery of layer thicknesses from a synthetic curve.

use approx::assert_relative_eq;
use xrrfit_rs::curve::MeasuredCurve;
use xrrfit_rs::global_opt::StopReason;
use xrrfit_rs::reflectivity::simulate;
use xrrfit_rs::stack::{Block, FreezeFlags, Layer, LayerStack, Substrate};
use xrrfit_rs::{FitConfig, FitController};

const CU_KA: f64 = 0.15418;

// Dense film on a light film on a medium substrate.
const A: (f64, f64) = (1.0 - 2.0e-5, 2.0e-6);
const B: (f64, f64) = (1.0 - 8.0e-6, 1.0e-7);
const SUB: (f64, f64) = (1.0 - 1.5e-5, 3.0e-7);

fn thickness_only() -> FreezeFlags {
    FreezeFlags {
        thickness: false,
        density: true,
        roughness: true,
    }
}

fn stack(t_a: f64, t_b: f64) -> LayerStack {
    LayerStack::new(
        vec![
            Block::Single(
                Layer::with_constants("A", A.0, A.1, t_a, 0.3).with_freeze(thickness_only()),
            ),
            Block::Single(
                Layer::with_constants("B", B.0, B.1, t_b, 0.3).with_freeze(thickness_only()),
            ),
        ],
        Substrate::with_constants("sub", SUB.0, SUB.1, 0.3),
    )
}

fn synthetic_curve() -> MeasuredCurve {
    let angle: Vec<f64> = (0..200).map(|i| 3.0 * i as f64 / 199.0).collect();
    let r = simulate(
        &[1.0, A.0, B.0, SUB.0],
        &[0.0, A.1, B.1, SUB.1],
        &[0.0, 20.0, 15.0, 0.0],
        &[0.0, 0.3, 0.3, 0.3],
        CU_KA,
        &angle,
    );
    MeasuredCurve::from_vecs(angle, r.to_vec(), CU_KA).unwrap()
}

#[test]
fn test_synthetic_curve_is_fit_exactly_at_truth() {
    let curve = synthetic_curve();
    let truth = stack(20.0, 15.0);
    let config = FitConfig::new().with_trials(1).with_iterations(1);
    let report = FitController::new(config).run(&truth, &curve).unwrap();
    // Trial 0 is the nominal stack, which already reproduces the data.
    assert!(report.seed_misfit < 1e-20, "seed misfit {}", report.seed_misfit);
    assert_eq!(report.params.thickness[0], 20.0);
}

#[test]
fn test_recovers_two_thicknesses() {
    let curve = synthetic_curve();
    let mut start = stack(19.0, 15.6);
    let config = FitConfig::new().with_iterations(500).with_seed(42);

    let handle = FitController::new(config).start(&start, &curve).unwrap();
    let report = handle.commit(&mut start).unwrap();

    assert!(report.iter_max >= 200);
    assert_ne!(report.stop, StopReason::Cancelled);
    assert!(report.misfit <= report.seed_misfit);
    assert_relative_eq!(report.params.thickness[0], 20.0, max_relative = 0.02);
    assert_relative_eq!(report.params.thickness[1], 15.0, max_relative = 0.02);

    // Frozen entries were untouched and the stack now carries the fit.
    assert_eq!(report.params.roughness[0], 0.3);
    assert_eq!(report.params.roughness[1], 0.3);
    let layers: Vec<&Layer> = start.base_layers().collect();
    assert_eq!(layers[0].thickness, report.params.thickness[0]);
    assert_eq!(layers[1].thickness, report.params.thickness[1]);
    assert_eq!(report.curve.len(), 200);
}
