// Copyright (c) 2025-2026 brdigetrlol. All rights reserved.
// SPDX-License-Identifier: LicenseRef-Icarus-Proprietary
// See LICENSE in the repository root for full license terms.

//! Echo State Network demo
//!
//! Walks through the engine on four tasks:
//! 1. Sine prediction with an offline ridge readout
//! 2. Pattern generation with readout feedback (teacher-forced, then free-running)
//! 3. Online RLS training on a drifting signal
//! 4. Saving and restoring trained parameters
//!
//! Run: RUST_LOG=resonant_engine=debug cargo run --release --example esn_demo -p resonant-engine

use anyhow::{Context, Result};
use nalgebra::{DMatrix, DVector};
use tracing_subscriber::EnvFilter;

use resonant_engine::{
    EsnConfig, Input, Model, Node, OnlineConfig, OnlineReadout, OnlineRule, Reservoir,
    ReservoirConfig, Targets,
};
use resonant_math::metrics::nmse_series;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("╔══════════════════════════════════════════════════╗");
    println!("║        Resonant: Echo State Network Demo         ║");
    println!("╠══════════════════════════════════════════════════╣");
    println!("║ Reservoir: leaky tanh, sparse recurrent weights  ║");
    println!("║ Readouts:  ridge (closed form), RLS (streaming)  ║");
    println!("╚══════════════════════════════════════════════════╝");
    println!();

    task_sine_prediction()?;
    task_pattern_generation()?;
    task_online_tracking()?;
    task_persistence()?;
    Ok(())
}

fn series(n: usize, f: impl Fn(f64) -> f64) -> DMatrix<f64> {
    DMatrix::from_fn(n, 1, |t, _| f(t as f64))
}

// ─── Task 1: Sine prediction ─────────────────────────

fn task_sine_prediction() -> Result<()> {
    println!("━━━ Task 1: Sine prediction ━━━");
    println!("  u(t) = sin(0.2 t), target u(t+1)");

    let config = EsnConfig::minimal();
    let mut esn = Model::esn(&config)?;
    let u = series(501, |t| (0.2 * t).sin());
    let inputs = u.rows(0, 500).into_owned();
    let targets = u.rows(1, 500).into_owned();

    let report = esn.fit_with(
        &[inputs.rows(0, 400).into_owned()],
        vec![targets.rows(0, 400).into_owned()],
        &config.training,
    )?;
    let fit = report.summary("readout").context("readout summary")?;
    println!("  Fitted on {} samples ({} features)", fit.samples, fit.features);

    let predicted = esn.run(&inputs.rows(400, 100).into_owned())?;
    let nmse = nmse_series(&predicted, &targets.rows(400, 100).into_owned());
    println!("  Held-out NMSE: {nmse:.2e}");
    println!();
    Ok(())
}

// ─── Task 2: Pattern generation ──────────────────────

fn task_pattern_generation() -> Result<()> {
    println!("━━━ Task 2: Pattern generation with feedback ━━━");
    println!("  Constant input, readout fed back into the reservoir");

    let config = EsnConfig::generative();
    let mut esn = Model::esn(&config)?;
    let n = 1200;
    let pattern = series(n + 1, |t| 0.5 * (0.1 * t).sin() + 0.3 * (0.23 * t).sin());
    let inputs = DMatrix::from_element(n, 1, 1.0);

    // The readout is teacher-forced during the fit, so the reservoir sees
    // the true pattern through feedback
    esn.fit_with(
        &[inputs.rows(0, 1000).into_owned()],
        vec![pattern.rows(1, 1000).into_owned()],
        &config.training,
    )?;

    let free = esn.run(&inputs.rows(1000, 200).into_owned())?;
    let expected = pattern.rows(1001, 200).into_owned();
    for horizon in [20, 50, 100, 200] {
        let nmse = nmse_series(
            &free.rows(0, horizon).into_owned(),
            &expected.rows(0, horizon).into_owned(),
        );
        println!("  Free-running NMSE over {horizon:>3} steps: {nmse:.3e}");
    }
    println!();
    Ok(())
}

// ─── Task 3: Online tracking ─────────────────────────

fn task_online_tracking() -> Result<()> {
    println!("━━━ Task 3: Online RLS on a drifting signal ━━━");
    println!("  Frequency changes halfway; forgetting factor 0.995");

    let mut model = Model::new("tracker");
    model.add_node(Input::new("input"))?;
    model.add_node(Reservoir::new(
        "reservoir",
        ReservoirConfig {
            units: 80,
            leak_rate: 0.5,
            connectivity: 0.1,
            input_connectivity: 0.5,
            ..ReservoirConfig::default()
        },
    )?)?;
    model.add_node(OnlineReadout::new(
        "readout",
        OnlineConfig {
            rule: OnlineRule::Rls {
                forgetting: 0.995,
                ridge: 1e-2,
                max_covariance_trace: 1e10,
            },
            ..OnlineConfig::default()
        },
    )?)?;
    model.chain(&["input", "reservoir", "readout"])?;

    let freq = |t: f64| if t < 1000.0 { 0.1 } else { 0.25 };
    let u = series(2001, |t| (freq(t) * t).sin());
    let inputs = u.rows(0, 2000).into_owned();
    let targets = u.rows(1, 2000).into_owned();

    let predictions = model.train(&inputs, Targets::from(targets.clone()), true)?;
    for (label, start) in [("warm-up", 0), ("settled", 800), ("after drift", 1000), ("re-settled", 1800)] {
        let nmse = nmse_series(
            &predictions.rows(start, 200).into_owned(),
            &targets.rows(start, 200).into_owned(),
        );
        println!("  {label:<12} steps {start:>4}..{:<4} NMSE {nmse:.3e}", start + 200);
    }
    println!();
    Ok(())
}

// ─── Task 4: Persistence ─────────────────────────────

fn task_persistence() -> Result<()> {
    println!("━━━ Task 4: Saving and restoring parameters ━━━");

    let config = EsnConfig::minimal();
    let mut trained = Model::esn(&config)?;
    let u = series(301, |t| (0.3 * t).cos());
    let inputs = u.rows(0, 300).into_owned();
    trained.fit_with(&[inputs.clone()], vec![u.rows(1, 300).into_owned()], &config.training)?;

    let path = std::env::temp_dir().join("resonant-esn-demo.json");
    trained.save_params(&path)?;
    println!("  Saved {} parameter arrays to {}", trained.params().len(), path.display());

    let mut restored = Model::esn(&config)?;
    restored.load_params_from(&path)?;
    trained.reset(None)?;

    let sample = DVector::from_element(1, 0.5);
    let a = trained.call(&sample)?;
    let b = restored.call(&sample)?;
    println!("  Original output: {:.6}", a[0]);
    println!("  Restored output: {:.6}", b[0]);
    std::fs::remove_file(&path).ok();
    Ok(())
}
