// Copyright (c) 2025-2026 brdigetrlol. All rights reserved.
// SPDX-License-Identifier: LicenseRef-Icarus-Proprietary
// See LICENSE in the repository root for full license terms.

//! Reservoir computing benchmarks for Echo State Networks
//!
//! 1. Sine prediction: one-step-ahead regression of a smooth signal
//! 2. Delayed recall: reproduce the input from k steps back
//! 3. NARMA-10: temporal nonlinear benchmark
//! 4. Feedback loop: readout output fed back into the reservoir
//! 5. Online RLS readout trained step by step
//!
//! Methodology: one model is driven over the whole series. The first part is
//! used for fitting (teacher-forced, with washout); the model then continues
//! statefully over the held-out part, which is scored by NMSE.
//!
//! Run with: `cargo test -p resonant-engine --test reservoir_benchmarks -- --nocapture`

use anyhow::{Context, Result};
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use resonant_engine::{
    Activation, EsnConfig, Input, Model, Node, OfflineConfig, OnlineConfig, OnlineReadout,
    Reservoir, ReservoirConfig, RidgeConfig, Targets,
};
use resonant_math::metrics::nmse_series;

// ═══════════════════════════════════════════════════════════
// Dataset generators
// ═══════════════════════════════════════════════════════════

fn column(values: &[f64]) -> DMatrix<f64> {
    DMatrix::from_column_slice(values.len(), 1, values)
}

/// `sin(ω t)` as input, `sin(ω (t+1))` as target.
fn sine_dataset(n: usize, omega: f64) -> (DMatrix<f64>, DMatrix<f64>) {
    let u: Vec<f64> = (0..=n).map(|t| (omega * t as f64).sin()).collect();
    (column(&u[..n]), column(&u[1..]))
}

/// Uniform white noise as input, the same noise `delay` steps earlier as target.
fn delay_dataset(n: usize, delay: usize, seed: u64) -> (DMatrix<f64>, DMatrix<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let u: Vec<f64> = (0..n).map(|_| rng.gen_range(-0.5..0.5)).collect();
    let y: Vec<f64> = (0..n).map(|t| if t >= delay { u[t - delay] } else { 0.0 }).collect();
    (column(&u), column(&y))
}

/// NARMA-10: `u(t)` uniform in [0, 0.5), target `y(t+1)`.
fn narma10(n: usize, seed: u64) -> (DMatrix<f64>, DMatrix<f64>) {
    let total = n + 50;
    let mut rng = StdRng::seed_from_u64(seed);
    let u: Vec<f64> = (0..total).map(|_| rng.gen_range(0.0..0.5)).collect();
    let mut y = vec![0.0f64; total + 1];
    for t in 9..total {
        let y_sum: f64 = (0..10).map(|i| y[t - i]).sum();
        let next = 0.3 * y[t] + 0.05 * y[t] * y_sum + 1.5 * u[t - 9] * u[t] + 0.1;
        y[t + 1] = next.clamp(-10.0, 10.0);
    }
    let start = total - n;
    (column(&u[start..total]), column(&y[start + 1..total + 1]))
}

fn split(m: &DMatrix<f64>, at: usize) -> (DMatrix<f64>, DMatrix<f64>) {
    (
        m.rows(0, at).into_owned(),
        m.rows(at, m.nrows() - at).into_owned(),
    )
}

/// Fit on the first `train` rows, then score the rest.
fn fit_and_score(
    model: &mut Model,
    inputs: &DMatrix<f64>,
    targets: &DMatrix<f64>,
    train: usize,
    washout: usize,
) -> Result<(f64, f64)> {
    let (x_train, x_test) = split(inputs, train);
    let (y_train, y_test) = split(targets, train);

    let config = OfflineConfig {
        washout,
        retain_states: true,
        ..OfflineConfig::default()
    };
    let report = model
        .fit_with(&[x_train.clone()], vec![y_train.clone()], &config)
        .context("offline fit")?;
    let summary = &report.fits[0];
    println!(
        "  Fitted '{}': {} samples, {} features, ridge {:e}",
        summary.node, summary.samples, summary.features, summary.ridge
    );

    // The model continues from the end of the training span
    let predicted_test = model.run(&x_test).context("held-out run")?;
    let test_nmse = nmse_series(&predicted_test, &y_test);

    let states = report
        .states
        .as_ref()
        .and_then(|s| s.get(&summary.node))
        .context("retained states")?;
    let readout = model.node(&summary.node).context("readout")?;
    let params = readout.params();
    let w = params["Wout"].to_matrix()?;
    let b = params["bias"].to_vector()?;
    let mut predicted_train = states * w.transpose();
    for mut row in predicted_train.row_iter_mut() {
        row += &b.transpose();
    }
    let kept = y_train.rows(washout, train - washout).into_owned();
    let train_nmse = nmse_series(&predicted_train, &kept);
    Ok((train_nmse, test_nmse))
}

fn banner(title: &str) {
    println!("\n{}", "=".repeat(60));
    println!("BENCHMARK: {title}");
    println!("{}", "=".repeat(60));
}

// ═══════════════════════════════════════════════════════════
// Benchmark 1: Sine prediction
// ═══════════════════════════════════════════════════════════

#[test]
fn bench_sine_prediction() -> Result<()> {
    banner("Sine one-step-ahead prediction (minimal ESN)");
    let (inputs, targets) = sine_dataset(600, 0.2);
    let mut model = Model::esn(&EsnConfig::minimal())?;

    let (train_nmse, test_nmse) = fit_and_score(&mut model, &inputs, &targets, 400, 20)?;
    println!("  Train NMSE: {train_nmse:.2e}");
    println!("  Test NMSE:  {test_nmse:.2e}");

    assert!(test_nmse < 0.05, "sine test NMSE too high: {test_nmse}");
    println!("  PASS (test NMSE < 0.05)");
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Benchmark 2: Delayed recall
// ═══════════════════════════════════════════════════════════

#[test]
fn bench_delayed_recall() -> Result<()> {
    banner("Delayed recall (k = 3)");
    let (inputs, targets) = delay_dataset(1300, 3, 17);
    let config = EsnConfig {
        reservoir: ReservoirConfig {
            units: 100,
            leak_rate: 1.0,
            spectral_radius: 0.9,
            connectivity: 0.1,
            input_connectivity: 1.0,
            input_scaling: 0.3,
            bias_scaling: 0.0,
            seed: 3,
            ..ReservoirConfig::default()
        },
        readout: RidgeConfig {
            ridge: 1e-8,
            ..RidgeConfig::default()
        },
        ..EsnConfig::default()
    };
    let mut model = Model::esn(&config)?;

    let (train_nmse, test_nmse) = fit_and_score(&mut model, &inputs, &targets, 1000, 50)?;
    println!("  Train NMSE: {train_nmse:.4}");
    println!("  Test NMSE:  {test_nmse:.4}");

    assert!(test_nmse < 0.1, "recall test NMSE too high: {test_nmse}");
    println!("  PASS (test NMSE < 0.1)");
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Benchmark 3: NARMA-10
// ═══════════════════════════════════════════════════════════

#[test]
fn bench_narma10() -> Result<()> {
    banner("NARMA-10 (ridge selected by 5-fold CV)");
    let (inputs, targets) = narma10(1200, 7);
    let config = EsnConfig {
        reservoir: ReservoirConfig {
            units: 200,
            leak_rate: 1.0,
            spectral_radius: 0.95,
            connectivity: 0.05,
            input_connectivity: 1.0,
            input_scaling: 0.5,
            bias_scaling: 0.2,
            seed: 7,
            ..ReservoirConfig::default()
        },
        readout: RidgeConfig {
            cv_folds: Some(5),
            ..RidgeConfig::default()
        },
        ..EsnConfig::default()
    };
    let mut model = Model::esn(&config)?;

    let (train_nmse, test_nmse) = fit_and_score(&mut model, &inputs, &targets, 1000, 100)?;
    println!("  Train NMSE: {train_nmse:.4}");
    println!("  Test NMSE:  {test_nmse:.4}");

    assert!(train_nmse < 1.0, "NARMA-10 should beat the mean predictor on train: {train_nmse}");
    println!("  PASS (train NMSE < 1.0)");
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Benchmark 4: Readout feedback
// ═══════════════════════════════════════════════════════════

#[test]
fn bench_feedback_one_step() -> Result<()> {
    banner("One-step prediction with readout feedback");
    let (inputs, targets) = sine_dataset(700, 0.15);
    let mut config = EsnConfig::minimal();
    config.feedback = true;
    config.reservoir.feedback_scaling = 0.2;
    config.reservoir.feedback_connectivity = 0.5;
    let mut model = Model::esn(&config)?;

    let (_, test_nmse) = fit_and_score(&mut model, &inputs, &targets, 500, 50)?;
    println!("  Test NMSE (free-running feedback): {test_nmse:.2e}");

    assert!(test_nmse < 0.05, "feedback model test NMSE too high: {test_nmse}");
    println!("  PASS (test NMSE < 0.05)");
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Benchmark 5: Online readout
// ═══════════════════════════════════════════════════════════

#[test]
fn bench_online_rls_sine() -> Result<()> {
    banner("Online RLS readout on sine prediction");
    let (inputs, targets) = sine_dataset(800, 0.2);

    let mut model = Model::new("online-esn");
    model.add_node(Input::new("input"))?;
    model.add_node(Reservoir::new(
        "reservoir",
        ReservoirConfig {
            units: 50,
            leak_rate: 0.5,
            connectivity: 0.2,
            input_connectivity: 0.5,
            activation: Activation::Tanh,
            ..ReservoirConfig::default()
        },
    )?)?;
    model.add_node(OnlineReadout::new("readout", OnlineConfig::default())?)?;
    model.chain(&["input", "reservoir", "readout"])?;

    let preds = model.train(&inputs, Targets::from(targets.clone()), true)?;
    let early = nmse_series(&preds.rows(0, 100).into_owned(), &targets.rows(0, 100).into_owned());
    let late = nmse_series(&preds.rows(700, 100).into_owned(), &targets.rows(700, 100).into_owned());
    println!("  NMSE first 100 steps: {early:.4}");
    println!("  NMSE last 100 steps:  {late:.2e}");

    assert!(late < 0.01, "RLS should have converged: {late}");
    assert!(late < early);
    assert!(model.node("readout").context("readout")?.is_fitted());
    println!("  PASS (late NMSE < 0.01)");
    Ok(())
}
