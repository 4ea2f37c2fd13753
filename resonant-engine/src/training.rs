// Copyright (c) 2025-2026 brdigetrlol. All rights reserved.
// SPDX-License-Identifier: LicenseRef-Icarus-Proprietary
// See LICENSE in the repository root for full license terms.

//! Training protocols for readouts.
//!
//! Offline: states are collected sequence by sequence, the first `washout`
//! rows of each sequence are discarded, and the remaining rows are stacked
//! into one design matrix solved in closed form. Inside a model, readouts
//! being fitted are teacher-forced: they emit their target row so that
//! downstream nodes and feedback consumers see the desired signal.
//!
//! Online: every timestep is predicted first and then learned, so the
//! returned predictions are honest out-of-sample estimates.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};
use resonant_math::linalg::{solve_normal_equations, SolveMethod};
use resonant_math::metrics::nmse_series;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{OfflineConfig, OnlineTrainConfig};
use crate::error::{EngineError, Result};
use crate::executor::RunMode;
use crate::model::Model;
use crate::node::{Node, OfflineFit, OnlineFit};

/// Logarithmic ridge grid searched by cross-validation.
const RIDGE_GRID: [f64; 14] = [
    1e-8, 1e-7, 1e-6, 1e-5, 1e-4, 1e-3, 1e-2, 1e-1, 1.0, 10.0, 100.0, 1e3, 1e4, 1e5,
];

/// Outcome of fitting one readout.
#[derive(Debug, Clone, Serialize)]
pub struct FitSummary {
    pub node: String,
    /// Rows used after washout
    pub samples: usize,
    /// Input features (without the bias column)
    pub features: usize,
    /// Ridge coefficient actually used
    pub ridge: f64,
    #[serde(skip)]
    pub method: SolveMethod,
}

/// Outcome of an offline fit, one summary per fitted readout.
#[derive(Debug, Clone, Default)]
pub struct FitReport {
    pub fits: Vec<FitSummary>,
    /// Collected state matrices by node name, kept on request
    pub states: Option<BTreeMap<String, DMatrix<f64>>>,
}

impl FitReport {
    pub fn summary(&self, node: &str) -> Option<&FitSummary> {
        self.fits.iter().find(|f| f.node == node)
    }
}

/// Target sequences for model-level training.
#[derive(Debug, Clone)]
pub enum Targets {
    /// Targets for the model's only trainable node.
    Shared(Vec<DMatrix<f64>>),
    /// Targets keyed by trainable node name.
    PerNode(BTreeMap<String, Vec<DMatrix<f64>>>),
}

impl Targets {
    pub fn per_node() -> Self {
        Self::PerNode(BTreeMap::new())
    }

    /// Add (or replace) the targets of one node. A `Shared` value is
    /// converted to an empty `PerNode` first.
    pub fn with(self, node: impl Into<String>, sequences: Vec<DMatrix<f64>>) -> Self {
        let mut map = match self {
            Self::PerNode(map) => map,
            Self::Shared(_) => BTreeMap::new(),
        };
        map.insert(node.into(), sequences);
        Self::PerNode(map)
    }
}

impl From<Vec<DMatrix<f64>>> for Targets {
    fn from(sequences: Vec<DMatrix<f64>>) -> Self {
        Self::Shared(sequences)
    }
}

impl From<DMatrix<f64>> for Targets {
    fn from(sequence: DMatrix<f64>) -> Self {
        Self::Shared(vec![sequence])
    }
}

// ─── State collection ────────────────────────────────

/// Accumulates washed-out state and target rows for one readout.
#[derive(Debug, Clone, Default)]
pub(crate) struct StateCollector {
    states: Vec<DMatrix<f64>>,
    targets: Vec<DMatrix<f64>>,
}

impl StateCollector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Keep the rows of one sequence after `washout`.
    pub(crate) fn push(
        &mut self,
        node: &str,
        states: &DMatrix<f64>,
        targets: &DMatrix<f64>,
        washout: usize,
    ) -> Result<()> {
        if states.nrows() != targets.nrows() {
            return Err(EngineError::Shape(format!(
                "'{node}': sequence has {} state rows but {} target rows",
                states.nrows(),
                targets.nrows()
            )));
        }
        if washout > states.nrows() {
            return Err(EngineError::Shape(format!(
                "'{node}': washout {washout} exceeds sequence length {}",
                states.nrows()
            )));
        }
        let kept = states.nrows() - washout;
        self.states.push(states.rows(washout, kept).into_owned());
        self.targets.push(targets.rows(washout, kept).into_owned());
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.states.iter().map(|m| m.nrows()).sum()
    }

    /// Stack every retained row into `(X, Y)`.
    pub(crate) fn into_matrices(self, node: &str) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
        if self.len() == 0 {
            return Err(EngineError::Shape(format!(
                "'{node}': no timesteps left after washout"
            )));
        }
        Ok((vstack(&self.states)?, vstack(&self.targets)?))
    }
}

fn vstack(parts: &[DMatrix<f64>]) -> Result<DMatrix<f64>> {
    let cols = parts.first().map_or(0, |m| m.ncols());
    if parts.iter().any(|m| m.ncols() != cols) {
        return Err(EngineError::Shape(
            "sequences of one batch must share a feature dimension".into(),
        ));
    }
    let rows = parts.iter().map(|m| m.nrows()).sum();
    let mut out = DMatrix::<f64>::zeros(rows, cols);
    let mut offset = 0;
    for m in parts {
        out.view_mut((offset, 0), (m.nrows(), cols)).copy_from(m);
        offset += m.nrows();
    }
    Ok(out)
}

/// Inputs and targets must pair up sequence by sequence, row by row.
pub(crate) fn check_pairs(
    node: &str,
    inputs: &[DMatrix<f64>],
    targets: &[DMatrix<f64>],
) -> Result<()> {
    if inputs.len() != targets.len() {
        return Err(EngineError::Shape(format!(
            "'{node}': {} input sequences but {} target sequences",
            inputs.len(),
            targets.len()
        )));
    }
    if inputs.is_empty() {
        return Err(EngineError::Shape(format!("'{node}': no training sequences")));
    }
    for (i, (x, y)) in inputs.iter().zip(targets).enumerate() {
        if x.nrows() != y.nrows() {
            return Err(EngineError::Shape(format!(
                "'{node}': sequence {i} has {} input rows but {} target rows",
                x.nrows(),
                y.nrows()
            )));
        }
    }
    Ok(())
}

// ─── Offline ─────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct OfflineTrainer {
    config: OfflineConfig,
}

impl OfflineTrainer {
    pub fn new(config: OfflineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    /// Fit a standalone readout: `inputs` are its input sequences (usually
    /// reservoir states), paired with `targets`.
    pub fn fit_readout(
        &self,
        readout: &mut dyn OfflineFit,
        inputs: &[DMatrix<f64>],
        targets: &[DMatrix<f64>],
    ) -> Result<FitReport> {
        let name = readout.name().to_string();
        check_pairs(&name, inputs, targets)?;
        let mut collector = StateCollector::new();
        for (x, y) in inputs.iter().zip(targets) {
            collector.push(&name, x, y, self.config.washout)?;
        }
        let (summary, states) = self.solve(readout, collector)?;
        Ok(FitReport {
            fits: vec![summary],
            states: states.map(|s| BTreeMap::from([(name, s)])),
        })
    }

    /// Fit every readout of `model` that has targets.
    ///
    /// Each sequence is run through the whole graph with the readouts
    /// teacher-forced; their inputs are collected, washed out per sequence
    /// and solved once all sequences have been seen.
    pub fn fit_model(
        &self,
        model: &mut Model,
        inputs: &[DMatrix<f64>],
        targets: impl Into<Targets>,
    ) -> Result<FitReport> {
        let targets = targets.into();
        let trainees = model.resolve_offline_targets(&targets)?;
        for (idx, seqs) in &trainees {
            check_pairs(model.node_name(*idx), inputs, seqs)?;
        }
        model.prepare_fit(&trainees, inputs)?;

        let mut collectors: BTreeMap<usize, StateCollector> =
            trainees.keys().map(|i| (*i, StateCollector::new())).collect();
        for (s, seq) in inputs.iter().enumerate() {
            self.reset_for_sequence(model)?;
            let forced: BTreeMap<usize, &DMatrix<f64>> =
                trainees.iter().map(|(i, seqs)| (*i, &seqs[s])).collect();
            let mut collected = model.collect_sequence(seq, &forced)?;
            for (idx, collector) in collectors.iter_mut() {
                let name = model.node_name(*idx);
                match collected.remove(idx) {
                    Some(states) => {
                        collector.push(name, &states, forced[idx], self.config.washout)?
                    }
                    None if self.config.washout > 0 => {
                        return Err(EngineError::Shape(format!(
                            "'{name}': washout {} exceeds empty sequence {s}",
                            self.config.washout
                        )))
                    }
                    None => {}
                }
            }
            debug!(model = model.name(), sequence = s, rows = seq.nrows(), "collected states");
        }

        let mut report = FitReport {
            fits: Vec::with_capacity(collectors.len()),
            states: self.config.retain_states.then(BTreeMap::new),
        };
        for (idx, collector) in collectors {
            let name = model.node_name(idx).to_string();
            let readout = model
                .node_mut_at(idx)
                .as_offline()
                .ok_or_else(|| EngineError::NotTrainable(name.clone()))?;
            let (summary, states) = self.solve(readout, collector)?;
            report.fits.push(summary);
            if let (Some(kept), Some(s)) = (report.states.as_mut(), states) {
                kept.insert(name, s);
            }
        }
        Ok(report)
    }

    fn reset_for_sequence(&self, node: &mut dyn Node) -> Result<()> {
        match &self.config.mode {
            RunMode::Stateful => Ok(()),
            RunMode::Stateless { initial } => {
                let initial = initial.as_ref().map(|v| DVector::from_column_slice(v));
                node.reset(initial.as_ref())
            }
        }
    }

    fn solve(
        &self,
        readout: &mut dyn OfflineFit,
        collector: StateCollector,
    ) -> Result<(FitSummary, Option<DMatrix<f64>>)> {
        let name = readout.name().to_string();
        let (x, y) = collector.into_matrices(&name)?;
        readout.set_output_dim(y.ncols())?;
        let summary = readout.fit_collected(&x, &y)?;
        info!(
            node = %summary.node,
            samples = summary.samples,
            features = summary.features,
            ridge = summary.ridge,
            "readout fitted"
        );
        Ok((summary, self.config.retain_states.then_some(x)))
    }
}

/// Pick the ridge coefficient with the lowest mean NMSE over contiguous
/// k-fold cross-validation.
///
/// `x` is the full design matrix (bias column included). The Gram matrix of
/// all rows is formed once; each fold's contribution is subtracted from it
/// to obtain the training system.
pub fn select_ridge(node: &str, x: &DMatrix<f64>, y: &DMatrix<f64>, folds: usize) -> Result<f64> {
    let n = x.nrows();
    if folds < 2 || n < folds {
        return Err(EngineError::Shape(format!(
            "'{node}': cannot run {folds}-fold cross-validation on {n} samples"
        )));
    }
    let gram_all = x.tr_mul(x);
    let rhs_all = x.tr_mul(y);
    let fold_size = n / folds;

    let mut best: Option<(f64, f64)> = None;
    for &ridge in &RIDGE_GRID {
        let mut total = 0.0;
        let mut valid = 0usize;
        for fold in 0..folds {
            let start = fold * fold_size;
            let len = if fold == folds - 1 { n - start } else { fold_size };
            let x_test = x.rows(start, len);
            let y_test = y.rows(start, len);
            let gram = &gram_all - x_test.tr_mul(&x_test);
            let rhs = &rhs_all - x_test.tr_mul(&y_test);
            let Ok(solution) = solve_normal_equations(&gram, &rhs, ridge) else {
                continue;
            };
            let predicted = x_test * &solution.weights;
            let score = nmse_series(&predicted, &y_test.into_owned());
            if score.is_finite() {
                total += score;
                valid += 1;
            }
        }
        if valid == 0 {
            continue;
        }
        let mean = total / valid as f64;
        debug!(node, ridge, cv_nmse = mean, "cross-validated ridge");
        if best.map_or(true, |(_, b)| mean < b) {
            best = Some((ridge, mean));
        }
    }

    let (ridge, score) = best.ok_or_else(|| EngineError::SingularMatrix {
        node: node.to_string(),
        reason: "no ridge coefficient produced a finite cross-validation score".into(),
    })?;
    info!(node, ridge, cv_nmse = score, folds, "selected ridge by cross-validation");
    Ok(ridge)
}

// ─── Online ──────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct OnlineTrainer {
    config: OnlineTrainConfig,
}

impl OnlineTrainer {
    pub fn new(config: OnlineTrainConfig) -> Self {
        Self { config }
    }

    /// Stream one sequence through a standalone online readout. Returns the
    /// prediction made at each timestep before learning from it.
    pub fn train_readout(
        &self,
        node: &mut dyn OnlineFit,
        inputs: &DMatrix<f64>,
        targets: &DMatrix<f64>,
    ) -> Result<DMatrix<f64>> {
        let name = node.name().to_string();
        check_pairs(&name, std::slice::from_ref(inputs), std::slice::from_ref(targets))?;
        let mut out = DMatrix::<f64>::zeros(inputs.nrows(), targets.ncols());
        for t in 0..inputs.nrows() {
            let pred = node.partial_fit(&inputs.row(t).transpose(), &targets.row(t).transpose())?;
            out.set_row(t, &pred.transpose());
        }
        debug!(node = %name, steps = inputs.nrows(), "online pass complete");
        Ok(out)
    }

    /// Stream one sequence through a model, updating every online readout
    /// that has targets. Returns the model output with the readouts'
    /// pre-update predictions in place of their outputs.
    pub fn train_model(
        &self,
        model: &mut Model,
        inputs: &DMatrix<f64>,
        targets: impl Into<Targets>,
    ) -> Result<DMatrix<f64>> {
        model.train_online(inputs, &targets.into(), self.config.force_teachers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{OnlineReadout, Ridge};

    fn ramp(n: usize) -> (DMatrix<f64>, DMatrix<f64>) {
        let x = DMatrix::from_fn(n, 1, |i, _| i as f64 / n as f64);
        let y = x.map(|v| 3.0 * v - 1.0);
        (x, y)
    }

    #[test]
    fn test_collector_applies_washout() {
        let (x, y) = ramp(10);
        let mut c = StateCollector::new();
        c.push("r", &x, &y, 4).unwrap();
        c.push("r", &x, &y, 10).unwrap();
        assert_eq!(c.len(), 6);
        let (xs, ys) = c.into_matrices("r").unwrap();
        assert_eq!(xs.nrows(), 6);
        assert_eq!(xs[(0, 0)], 0.4);
        assert_eq!(ys[(0, 0)], y[(4, 0)]);
    }

    #[test]
    fn test_washout_longer_than_sequence() {
        let (x, y) = ramp(5);
        let mut c = StateCollector::new();
        assert!(matches!(c.push("r", &x, &y, 6), Err(EngineError::Shape(_))));
    }

    #[test]
    fn test_washout_consuming_everything() {
        let (x, y) = ramp(5);
        let mut readout = Ridge::with_ridge("r", 1e-6).unwrap();
        let trainer = OfflineTrainer::new(OfflineConfig {
            washout: 5,
            ..OfflineConfig::default()
        });
        let e = trainer.fit_readout(&mut readout, &[x], &[y]);
        assert!(matches!(e, Err(EngineError::Shape(_))));
    }

    #[test]
    fn test_sequence_count_mismatch() {
        let (x, y) = ramp(5);
        let mut readout = Ridge::with_ridge("r", 1e-6).unwrap();
        let e = readout.fit(&[x.clone(), x], &[y], 0);
        assert!(matches!(e, Err(EngineError::Shape(_))));
    }

    #[test]
    fn test_fit_readout_multiple_sequences() {
        let (x1, y1) = ramp(20);
        let (x2, y2) = ramp(30);
        let mut readout = Ridge::with_ridge("r", 1e-9).unwrap();
        let report = OfflineTrainer::new(OfflineConfig {
            washout: 2,
            retain_states: true,
            ..OfflineConfig::default()
        })
        .fit_readout(&mut readout, &[x1, x2], &[y1, y2])
        .unwrap();
        let summary = report.summary("r").unwrap();
        assert_eq!(summary.samples, 46);
        assert_eq!(report.states.unwrap()["r"].nrows(), 46);
        let out = readout.forward(&DVector::from_vec(vec![0.5]), None).unwrap();
        assert!((out[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let x = DMatrix::from_fn(60, 3, |i, j| ((i * 7 + j * 3) as f64).sin());
        let y = DMatrix::from_fn(60, 2, |i, j| ((i + j) as f64 * 0.1).cos());
        let mut a = Ridge::with_ridge("r", 1e-3).unwrap();
        let mut b = Ridge::with_ridge("r", 1e-3).unwrap();
        a.fit(&[x.clone()], &[y.clone()], 5).unwrap();
        b.fit(&[x], &[y], 5).unwrap();
        assert_eq!(a.weights(), b.weights());
        assert_eq!(a.bias(), b.bias());
    }

    #[test]
    fn test_select_ridge_prefers_heavy_ridge_for_noise() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(3);
        let x = DMatrix::from_fn(60, 30, |_, _| rng.gen_range(-1.0..1.0));
        let y = DMatrix::from_fn(60, 1, |_, _| rng.gen_range(-1.0..1.0));
        let ridge = select_ridge("r", &x, &y, 3).unwrap();
        assert!(ridge >= 1.0, "pure noise should be regularized, got {ridge}");
    }

    #[test]
    fn test_select_ridge_too_few_samples() {
        let (x, y) = ramp(3);
        assert!(select_ridge("r", &x, &y, 5).is_err());
    }

    #[test]
    fn test_online_trainer_returns_pre_update_predictions() {
        let (x, y) = ramp(40);
        let mut node = OnlineReadout::rls("o", 1.0).unwrap();
        let preds = OnlineTrainer::default().train_readout(&mut node, &x, &y).unwrap();
        assert_eq!(preds[(0, 0)], 0.0);
        let last = (preds[(39, 0)] - y[(39, 0)]).abs();
        assert!(last < 1e-2, "late prediction error {last}");
    }

    #[test]
    fn test_targets_builder() {
        let t = Targets::from(DMatrix::<f64>::zeros(2, 1)).with("a", vec![]);
        match t {
            Targets::PerNode(map) => assert!(map.contains_key("a")),
            Targets::Shared(_) => panic!("expected per-node targets"),
        }
    }
}
