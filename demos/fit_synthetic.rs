//! Fit a noisy synthetic superlattice curve.
//!
//! Run with `RUST_LOG=xrrfit_rs=debug cargo run --example fit_synthetic` to
//! see the optimizer's own log lines next to the progress output.

use std::sync::Arc;

use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tracing_subscriber::EnvFilter;
use xrrfit_rs::reflectivity::simulate_stack;
use xrrfit_rs::{
    Block, DensityProxy, FitConfig, FitController, FitStage, FitWindow, FreezeFlags,
    JsonFileTrialStore, Layer, LayerStack, MeasuredCurve, Result, Substrate,
};

const CU_KA: f64 = 0.15418;

fn stack(mo: f64, si: f64, cap: f64) -> LayerStack {
    LayerStack::new(
        vec![
            Block::Single(Layer::with_constants("SiO2", 0.999992, 1e-7, cap, 0.4)),
            Block::repeat(
                "MoSi",
                vec![Layer::new("Mo", mo, 0.3, 10.2), Layer::new("Si", si, 0.3, 2.33)],
                20,
            ),
        ],
        Substrate::with_constants("Si", 0.999992, 1e-7, 0.2).with_density(2.33),
    )
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("xrrfit_rs=info")),
        )
        .with_target(false)
        .init();

    // Measured data: the true stack plus 5 % multiplicative noise.
    let truth = stack(2.9, 4.0, 1.5);
    let theta: Vec<f64> = (1..=1500).map(|i| 0.004 * i as f64).collect();
    let clean = simulate_stack(&truth.expand(CU_KA, &DensityProxy::default())?, CU_KA, &theta);
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let noise = Normal::new(1.0, 0.05).map_err(|e| e.to_string())?;
    let intensity: Vec<f64> = clean
        .iter()
        .map(|&r| (r * noise.sample(&mut rng)).max(1e-12))
        .collect();
    let curve = MeasuredCurve::from_vecs(theta, intensity, CU_KA)?;

    // Starting guess: right period, wrong split, Mo/Si roughness frozen.
    let mut model = stack(2.6, 4.3, 2.0);
    for block in model.blocks.iter_mut() {
        if let Block::Repeat { layers, .. } = block {
            for layer in layers.iter_mut() {
                layer.freeze = FreezeFlags {
                    roughness: true,
                    ..FreezeFlags::default()
                };
            }
        }
    }

    let config = FitConfig::new()
        .with_window(FitWindow::new(0.1, 5.5)?)
        .with_iterations(300);
    let history = std::env::temp_dir().join("xrrfit-demo-history");
    let controller = FitController::new(config)
        .with_store(Arc::new(JsonFileTrialStore::new(&history)));

    let handle = controller.start(&model, &curve)?;
    for snapshot in handle.progress().iter() {
        match snapshot.stage {
            FitStage::WarmStart => println!("warm start seed: misfit {:.4e}", snapshot.misfit),
            FitStage::Refinement => println!(
                "iteration {:>4}/{}: misfit {:.4e} ({} reshakes)",
                snapshot.iteration, snapshot.iter_max, snapshot.misfit, snapshot.reshakes
            ),
        }
    }

    let report = handle.commit(&mut model)?;
    println!("\n{}", report);
    println!("trial history kept in {}", history.display());

    let table = std::env::temp_dir().join("xrrfit-demo-fit.tsv");
    report.curve.write_table(std::fs::File::create(&table)?)?;
    println!("fitted curve written to {}", table.display());
    Ok(())
}
