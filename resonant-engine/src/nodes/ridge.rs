// Copyright (c) 2025-2026 brdigetrlol. All rights reserved.
// SPDX-License-Identifier: LicenseRef-Icarus-Proprietary
// See LICENSE in the repository root for full license terms.

//! Offline linear readout trained by ridge regression.
//!
//! `y = W_out · x + b`, with `W_out` (`output_dim × input_dim`) and `b`
//! learned in closed form from collected states. The bias is learned as the
//! weight of a constant column appended to the design matrix, so it is
//! regularized together with the other weights.

use nalgebra::{DMatrix, DVector};
use resonant_math::{linalg::solve_normal_equations, Precision};
use tracing::debug;

use crate::config::RidgeConfig;
use crate::error::{EngineError, Result};
use crate::node::{check_len, require_param, Node, OfflineFit, ParamArray, ParamMap};
use crate::training::{select_ridge, FitSummary};

#[derive(Debug, Clone)]
pub struct Ridge {
    name: String,
    config: RidgeConfig,
    input_dim: Option<usize>,
    output_dim: Option<usize>,
    wout: Option<DMatrix<f64>>,
    bias: Option<DVector<f64>>,
    state: Option<DVector<f64>>,
    fitted: bool,
}

impl Ridge {
    pub fn new(name: impl Into<String>, config: RidgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            input_dim: config.input_dim,
            output_dim: config.output_dim,
            config,
            wout: None,
            bias: None,
            state: None,
            fitted: false,
        })
    }

    /// Readout with the given ridge coefficient and default settings.
    pub fn with_ridge(name: impl Into<String>, ridge: f64) -> Result<Self> {
        Self::new(
            name,
            RidgeConfig {
                ridge,
                ..RidgeConfig::default()
            },
        )
    }

    pub fn config(&self) -> &RidgeConfig {
        &self.config
    }

    /// Learned weights, `output_dim × input_dim`.
    pub fn weights(&self) -> Option<&DMatrix<f64>> {
        self.wout.as_ref()
    }

    pub fn bias(&self) -> Option<&DVector<f64>> {
        self.bias.as_ref()
    }

    fn allocate_state(&mut self) {
        if let (Some(_), Some(out), None) = (self.input_dim, self.output_dim, &self.state) {
            self.state = Some(DVector::zeros(out));
        }
    }

    fn fix_input_dim(&mut self, dim: usize) -> Result<()> {
        match self.input_dim {
            Some(d) if d != dim => Err(EngineError::Shape(format!(
                "node '{}' expected input of dimension {d}, got {dim}",
                self.name
            ))),
            _ => {
                self.input_dim = Some(dim);
                self.allocate_state();
                Ok(())
            }
        }
    }

    /// Design matrix with the constant bias column appended when enabled.
    fn design(&self, states: &DMatrix<f64>) -> DMatrix<f64> {
        if self.config.input_bias {
            states.clone().insert_column(states.ncols(), 1.0)
        } else {
            states.clone()
        }
    }
}

impl Node for Ridge {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "ridge"
    }

    fn input_dim(&self) -> Option<usize> {
        self.input_dim
    }

    fn output_dim(&self) -> Option<usize> {
        self.output_dim
    }

    fn precision(&self) -> Precision {
        self.config.precision
    }

    fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    fn is_trainable(&self) -> bool {
        true
    }

    fn is_fitted(&self) -> bool {
        self.fitted
    }

    fn initialize(&mut self, sample: &DVector<f64>) -> Result<()> {
        self.fix_input_dim(sample.len())
    }

    fn reset_shape(&mut self) {
        self.input_dim = self.config.input_dim;
        self.output_dim = self.config.output_dim;
        self.wout = None;
        self.bias = None;
        self.state = None;
        self.fitted = false;
    }

    fn forward(
        &mut self,
        input: &DVector<f64>,
        feedback: Option<&DVector<f64>>,
    ) -> Result<DVector<f64>> {
        if feedback.is_some() {
            return Err(EngineError::Shape(format!(
                "node '{}' does not accept feedback",
                self.name
            )));
        }
        let (wout, bias) = match (&self.wout, &self.bias) {
            (Some(w), Some(b)) if self.fitted => (w, b),
            _ => return Err(EngineError::UseBeforeFit(self.name.clone())),
        };
        check_len(&self.name, "input", input, wout.ncols())?;
        let mut y = wout * input + bias;
        self.config.precision.apply_vector(&mut y);
        self.state = Some(y.clone());
        Ok(y)
    }

    fn run(&mut self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        let (wout, bias) = match (&self.wout, &self.bias) {
            (Some(w), Some(b)) if self.fitted => (w, b),
            _ => return Err(EngineError::UseBeforeFit(self.name.clone())),
        };
        if inputs.ncols() != wout.ncols() {
            return Err(EngineError::Shape(format!(
                "node '{}' expected input of dimension {}, got {}",
                self.name,
                wout.ncols(),
                inputs.ncols()
            )));
        }
        let mut out = inputs * wout.transpose();
        for mut row in out.row_iter_mut() {
            row += bias.transpose();
        }
        self.config.precision.apply_matrix(&mut out);
        if out.nrows() > 0 {
            self.state = Some(out.row(out.nrows() - 1).transpose());
        }
        Ok(out)
    }

    fn state(&self) -> Option<DVector<f64>> {
        self.state.clone()
    }

    fn set_state(&mut self, state: &DVector<f64>) -> Result<()> {
        let dim = self
            .output_dim
            .filter(|_| self.state.is_some())
            .ok_or_else(|| EngineError::NotInitialized(self.name.clone()))?;
        check_len(&self.name, "state", state, dim)?;
        let mut state = state.clone();
        self.config.precision.apply_vector(&mut state);
        self.state = Some(state);
        Ok(())
    }

    fn params(&self) -> ParamMap {
        let mut params = ParamMap::new();
        if let (Some(w), Some(b)) = (&self.wout, &self.bias) {
            params.insert("Wout".into(), ParamArray::from_matrix(w));
            params.insert("bias".into(), ParamArray::from_vector(b));
        }
        params
    }

    fn load_params(&mut self, params: &ParamMap) -> Result<()> {
        if params.is_empty() {
            return Ok(());
        }
        let wout = require_param(params, &self.name, "Wout")?.to_matrix()?;
        let bias = require_param(params, &self.name, "bias")?.to_vector()?;
        if bias.len() != wout.nrows() {
            return Err(EngineError::Shape(format!(
                "'{}' bias has {} entries for {} outputs",
                self.name,
                bias.len(),
                wout.nrows()
            )));
        }
        self.fix_input_dim(wout.ncols())?;
        OfflineFit::set_output_dim(self, wout.nrows())?;
        self.wout = Some(wout);
        self.bias = Some(bias);
        self.fitted = true;
        Ok(())
    }

    fn as_offline(&mut self) -> Option<&mut dyn OfflineFit> {
        Some(self)
    }
}

impl OfflineFit for Ridge {
    fn set_output_dim(&mut self, dim: usize) -> Result<()> {
        match self.output_dim {
            Some(d) if d != dim => Err(EngineError::Shape(format!(
                "node '{}' has output dimension {d}, targets have {dim}",
                self.name
            ))),
            _ => {
                self.output_dim = Some(dim);
                self.allocate_state();
                Ok(())
            }
        }
    }

    fn fit_collected(
        &mut self,
        states: &DMatrix<f64>,
        targets: &DMatrix<f64>,
    ) -> Result<FitSummary> {
        if states.nrows() != targets.nrows() {
            return Err(EngineError::Shape(format!(
                "'{}': {} state rows but {} target rows",
                self.name,
                states.nrows(),
                targets.nrows()
            )));
        }
        if states.nrows() == 0 {
            return Err(EngineError::Shape(format!("'{}': no samples to fit", self.name)));
        }
        self.fix_input_dim(states.ncols())?;
        OfflineFit::set_output_dim(self, targets.ncols())?;

        let x = self.design(states);
        let ridge = match self.config.cv_folds {
            Some(folds) => select_ridge(&self.name, &x, targets, folds)?,
            None => self.config.ridge,
        };
        let gram = x.tr_mul(&x);
        let rhs = x.tr_mul(targets);
        let solution = solve_normal_equations(&gram, &rhs, ridge)
            .map_err(|e| EngineError::from_math(&self.name, e))?;

        let d = states.ncols();
        let mut wout = solution.weights.rows(0, d).transpose();
        let mut bias = if self.config.input_bias {
            solution.weights.row(d).transpose()
        } else {
            DVector::zeros(targets.ncols())
        };
        self.config.precision.apply_matrix(&mut wout);
        self.config.precision.apply_vector(&mut bias);
        debug!(node = %self.name, ?solution.method, ridge, "readout weights solved");

        self.wout = Some(wout);
        self.bias = Some(bias);
        self.fitted = true;
        Ok(FitSummary {
            node: self.name.clone(),
            samples: states.nrows(),
            features: d,
            ridge,
            method: solution.method,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resonant_math::linalg::SolveMethod;

    fn linear_data(n: usize) -> (DMatrix<f64>, DMatrix<f64>) {
        let x = DMatrix::from_fn(n, 2, |i, j| ((i * (j + 3)) as f64 * 0.37).sin());
        let y = DMatrix::from_fn(n, 1, |i, _| 2.0 * x[(i, 0)] - 0.5 * x[(i, 1)] + 0.25);
        (x, y)
    }

    #[test]
    fn test_forward_before_fit() {
        let mut r = Ridge::with_ridge("out", 1e-6).unwrap();
        r.initialize(&DVector::zeros(2)).unwrap();
        let e = r.forward(&DVector::zeros(2), None);
        assert!(matches!(e, Err(EngineError::UseBeforeFit(_))));
    }

    #[test]
    fn test_recovers_linear_map() {
        let (x, y) = linear_data(200);
        let mut r = Ridge::with_ridge("out", 1e-10).unwrap();
        let summary = r.fit_collected(&x, &y).unwrap();
        assert_eq!(summary.samples, 200);
        assert_eq!(summary.method, SolveMethod::Cholesky);
        assert!(r.is_fitted());
        let w = r.weights().unwrap();
        assert!((w[(0, 0)] - 2.0).abs() < 1e-6);
        assert!((w[(0, 1)] + 0.5).abs() < 1e-6);
        assert!((r.bias().unwrap()[0] - 0.25).abs() < 1e-6);
        let out = r.forward(&DVector::from_vec(vec![1.0, 1.0]), None).unwrap();
        assert!((out[0] - 1.75).abs() < 1e-6);
    }

    #[test]
    fn test_ridge_monotonic_norm() {
        let (x, y) = linear_data(80);
        let mut last = f64::INFINITY;
        for ridge in [1e-4, 1e-2, 1.0, 10.0, 100.0] {
            let mut r = Ridge::new(
                "out",
                RidgeConfig {
                    ridge,
                    input_bias: false,
                    ..RidgeConfig::default()
                },
            )
            .unwrap();
            r.fit_collected(&x, &y).unwrap();
            let norm = r.weights().unwrap().norm();
            assert!(norm < last, "ridge {ridge}: {norm} >= {last}");
            last = norm;
        }
    }

    #[test]
    fn test_zero_states_no_bias_is_singular() {
        let mut r = Ridge::new(
            "out",
            RidgeConfig {
                ridge: 0.0,
                input_bias: false,
                ..RidgeConfig::default()
            },
        )
        .unwrap();
        let x = DMatrix::zeros(10, 3);
        let y = DMatrix::from_element(10, 1, 1.0);
        assert!(matches!(
            r.fit_collected(&x, &y),
            Err(EngineError::SingularMatrix { .. })
        ));
        assert!(!r.is_fitted());
    }

    #[test]
    fn test_zero_states_with_bias_learns_mean() {
        let mut r = Ridge::with_ridge("out", 0.0).unwrap();
        let x = DMatrix::zeros(10, 3);
        let y = DMatrix::from_element(10, 1, 3.0);
        r.fit_collected(&x, &y).unwrap();
        let out = r.forward(&DVector::zeros(3), None).unwrap();
        assert!((out[0] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_row_mismatch() {
        let mut r = Ridge::with_ridge("out", 1e-6).unwrap();
        let e = r.fit_collected(&DMatrix::zeros(5, 2), &DMatrix::zeros(4, 1));
        assert!(matches!(e, Err(EngineError::Shape(_))));
    }

    #[test]
    fn test_fixed_output_dim_checked() {
        let mut r = Ridge::new(
            "out",
            RidgeConfig {
                output_dim: Some(2),
                ..RidgeConfig::default()
            },
        )
        .unwrap();
        let (x, y) = linear_data(20);
        assert!(matches!(r.fit_collected(&x, &y), Err(EngineError::Shape(_))));
    }

    #[test]
    fn test_run_matches_forward() {
        let (x, y) = linear_data(50);
        let mut a = Ridge::with_ridge("out", 1e-6).unwrap();
        a.fit_collected(&x, &y).unwrap();
        let mut b = a.clone();
        let batched = a.run(&x).unwrap();
        for t in 0..50 {
            let y = b.forward(&x.row(t).transpose(), None).unwrap();
            assert!((batched[(t, 0)] - y[0]).abs() < 1e-12);
        }
        assert_eq!(a.state(), b.state());
    }

    #[test]
    fn test_cv_selects_from_grid() {
        let (x, y) = linear_data(120);
        let mut r = Ridge::new(
            "out",
            RidgeConfig {
                cv_folds: Some(4),
                ..RidgeConfig::default()
            },
        )
        .unwrap();
        let summary = r.fit_collected(&x, &y).unwrap();
        assert!(summary.ridge > 0.0);
        assert!(summary.ridge <= 1e-2, "noise-free data should pick a small ridge");
    }

    #[test]
    fn test_params_round_trip() {
        let (x, y) = linear_data(40);
        let mut a = Ridge::with_ridge("out", 1e-6).unwrap();
        a.fit_collected(&x, &y).unwrap();
        let mut b = Ridge::with_ridge("copy", 1.0).unwrap();
        b.load_params(&a.params()).unwrap();
        assert!(b.is_fitted());
        let v = DVector::from_vec(vec![0.3, -0.1]);
        assert_eq!(a.forward(&v, None).unwrap(), b.forward(&v, None).unwrap());
    }

    #[test]
    fn test_f32_state_is_rounded_when_forced() {
        let (x, y) = linear_data(30);
        let mut r = Ridge::new(
            "out",
            RidgeConfig {
                precision: Precision::F32,
                ..RidgeConfig::default()
            },
        )
        .unwrap();
        r.fit_collected(&x, &y).unwrap();
        r.set_state(&DVector::from_element(1, 0.1)).unwrap();
        assert_eq!(r.state().unwrap()[0], 0.1f32 as f64);
    }
}
