// Copyright (c) 2025-2026 brdigetrlol. All rights reserved.
// SPDX-License-Identifier: LicenseRef-Icarus-Proprietary
// See LICENSE in the repository root for full license terms.

//! Streaming linear readout: recursive least squares or least mean squares.
//!
//! RLS keeps the inverse covariance `P ≈ (XᵀX + λI)⁻¹` and applies a
//! Sherman-Morrison rank-1 update per sample, O(d²) per step:
//!
//! ```text
//! g = P·x
//! k = g / (λ_f + xᵀg)
//! W += e ⊗ k
//! P  = (P − k·gᵀ) / λ_f
//! ```
//!
//! With `λ_f = 1` this is the exact online ridge solution. When inputs carry
//! no new information for long stretches `P` can blow up under forgetting;
//! it is re-conditioned to `I/λ` whenever it stops looking like a covariance.

use nalgebra::{DMatrix, DVector};
use resonant_math::Precision;
use tracing::warn;

use crate::config::{OnlineConfig, OnlineRule};
use crate::error::{EngineError, Result};
use crate::node::{check_len, require_param, Node, OnlineFit, ParamArray, ParamMap};
use crate::nodes::Ridge;

/// Updates between forced re-symmetrizations of `P`.
const SYMMETRIZE_EVERY: u64 = 64;

#[derive(Debug, Clone)]
pub struct OnlineReadout {
    name: String,
    config: OnlineConfig,
    input_dim: Option<usize>,
    output_dim: Option<usize>,
    /// `output_dim × features`, bias in the last column when enabled
    weights: Option<DMatrix<f64>>,
    /// Inverse covariance (RLS only)
    p: Option<DMatrix<f64>>,
    state: Option<DVector<f64>>,
    num_updates: u64,
    reconditions: usize,
    /// Holds usable weights: updated, warm-started or loaded
    fitted: bool,
}

impl OnlineReadout {
    pub fn new(name: impl Into<String>, config: OnlineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            input_dim: config.input_dim,
            output_dim: config.output_dim,
            config,
            weights: None,
            p: None,
            state: None,
            num_updates: 0,
            reconditions: 0,
            fitted: false,
        })
    }

    /// RLS readout with the given forgetting factor.
    pub fn rls(name: impl Into<String>, forgetting: f64) -> Result<Self> {
        let rule = match OnlineRule::default() {
            OnlineRule::Rls {
                ridge,
                max_covariance_trace,
                ..
            } => OnlineRule::Rls {
                forgetting,
                ridge,
                max_covariance_trace,
            },
            other => other,
        };
        Self::new(
            name,
            OnlineConfig {
                rule,
                ..OnlineConfig::default()
            },
        )
    }

    pub fn lms(name: impl Into<String>, learning_rate: f64) -> Result<Self> {
        Self::new(
            name,
            OnlineConfig {
                rule: OnlineRule::Lms { learning_rate },
                ..OnlineConfig::default()
            },
        )
    }

    pub fn config(&self) -> &OnlineConfig {
        &self.config
    }

    pub fn num_updates(&self) -> u64 {
        self.num_updates
    }

    /// Times `P` was reset to `I/λ` after becoming ill-conditioned.
    pub fn reconditions(&self) -> usize {
        self.reconditions
    }

    /// Learned weights without the bias column.
    pub fn weights(&self) -> Option<DMatrix<f64>> {
        let w = self.weights.as_ref()?;
        let d = self.input_dim?;
        Some(w.columns(0, d).into_owned())
    }

    pub fn bias(&self) -> Option<DVector<f64>> {
        let w = self.weights.as_ref()?;
        let d = self.input_dim?;
        if self.config.input_bias {
            Some(w.column(d).into_owned())
        } else {
            Some(DVector::zeros(w.nrows()))
        }
    }

    /// Adopt the weights of a fitted ridge readout and restart `P` from
    /// `I/λ`, so streaming updates continue from the batch solution.
    pub fn warm_start(&mut self, readout: &Ridge) -> Result<()> {
        let (w, b) = match (readout.weights(), readout.bias()) {
            (Some(w), Some(b)) if readout.is_fitted() => (w, b),
            _ => return Err(EngineError::UseBeforeFit(readout.name().to_string())),
        };
        self.fix_dims(w.ncols(), w.nrows())?;
        let mut weights = if self.config.input_bias {
            w.clone().insert_column(w.ncols(), 0.0)
        } else {
            w.clone()
        };
        if self.config.input_bias {
            weights.set_column(w.ncols(), b);
        }
        self.weights = Some(weights);
        self.p = self.fresh_covariance();
        self.num_updates = 0;
        self.fitted = true;
        Ok(())
    }

    fn features(&self) -> Option<usize> {
        self.input_dim
            .map(|d| d + usize::from(self.config.input_bias))
    }

    fn fresh_covariance(&self) -> Option<DMatrix<f64>> {
        match (self.config.rule, self.features()) {
            (OnlineRule::Rls { ridge, .. }, Some(f)) => Some(DMatrix::identity(f, f) / ridge),
            _ => None,
        }
    }

    fn allocate(&mut self) {
        let (Some(out), Some(f)) = (self.output_dim, self.features()) else {
            return;
        };
        if self.weights.is_none() {
            self.weights = Some(DMatrix::zeros(out, f));
            self.p = self.fresh_covariance();
        }
        if self.state.is_none() {
            self.state = Some(DVector::zeros(out));
        }
    }

    fn fix_dims(&mut self, input: usize, output: usize) -> Result<()> {
        if let Some(d) = self.input_dim.filter(|d| *d != input) {
            return Err(EngineError::Shape(format!(
                "node '{}' expected input of dimension {d}, got {input}",
                self.name
            )));
        }
        if let Some(d) = self.output_dim.filter(|d| *d != output) {
            return Err(EngineError::Shape(format!(
                "node '{}' has output dimension {d}, target has {output}",
                self.name
            )));
        }
        self.input_dim = Some(input);
        self.output_dim = Some(output);
        self.allocate();
        Ok(())
    }

    fn augment(&self, x: &DVector<f64>) -> DVector<f64> {
        if self.config.input_bias {
            x.clone().push(1.0)
        } else {
            x.clone()
        }
    }

    fn predict(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        let w = self
            .weights
            .as_ref()
            .ok_or_else(|| EngineError::NotInitialized(self.name.clone()))?;
        let mut y = w * x;
        self.config.precision.apply_vector(&mut y);
        Ok(y)
    }

    fn rls_update(&mut self, x: &DVector<f64>, error: &DVector<f64>, forgetting: f64, ridge: f64, max_trace: f64) {
        let (Some(w), Some(p)) = (self.weights.as_mut(), self.p.as_mut()) else {
            return;
        };
        let g = &*p * x;
        let denom = forgetting + x.dot(&g);
        let k = &g / denom;
        *w += error * k.transpose();
        *p -= &k * g.transpose();
        if forgetting < 1.0 {
            *p /= forgetting;
        }
        self.num_updates += 1;
        if self.num_updates % SYMMETRIZE_EVERY == 0 {
            let sym = (&*p + p.transpose()) * 0.5;
            *p = sym;
        }

        let trace = p.trace();
        let healthy = p.iter().all(|v| v.is_finite())
            && p.diagonal().iter().all(|v| *v > 0.0)
            && trace <= max_trace;
        if !healthy {
            warn!(
                node = %self.name,
                trace,
                updates = self.num_updates,
                "inverse covariance ill-conditioned, resetting to I/ridge"
            );
            let f = p.nrows();
            *p = DMatrix::identity(f, f) / ridge;
            self.reconditions += 1;
        }
    }
}

impl Node for OnlineReadout {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "online"
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
        if let Some(d) = self.input_dim {
            check_len(&self.name, "input", sample, d)?;
        }
        self.input_dim = Some(sample.len());
        self.allocate();
        Ok(())
    }

    fn reset_shape(&mut self) {
        self.input_dim = self.config.input_dim;
        self.output_dim = self.config.output_dim;
        self.weights = None;
        self.p = None;
        self.state = None;
        self.num_updates = 0;
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
        if !self.is_fitted() {
            return Err(EngineError::UseBeforeFit(self.name.clone()));
        }
        let d = self
            .input_dim
            .ok_or_else(|| EngineError::NotInitialized(self.name.clone()))?;
        check_len(&self.name, "input", input, d)?;
        let y = self.predict(&self.augment(input))?;
        self.state = Some(y.clone());
        Ok(y)
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
        if let (Some(w), Some(b)) = (self.weights(), self.bias()) {
            params.insert("Wout".into(), ParamArray::from_matrix(&w));
            params.insert("bias".into(), ParamArray::from_vector(&b));
        }
        if let Some(p) = &self.p {
            params.insert("P".into(), ParamArray::from_matrix(p));
        }
        params
    }

    fn load_params(&mut self, params: &ParamMap) -> Result<()> {
        if params.is_empty() {
            return Ok(());
        }
        let w = require_param(params, &self.name, "Wout")?.to_matrix()?;
        let b = require_param(params, &self.name, "bias")?.to_vector()?;
        if b.len() != w.nrows() {
            return Err(EngineError::Shape(format!(
                "'{}' bias has {} entries for {} outputs",
                self.name,
                b.len(),
                w.nrows()
            )));
        }
        self.fix_dims(w.ncols(), w.nrows())?;
        let mut weights = w.clone();
        if self.config.input_bias {
            weights = weights.insert_column(w.ncols(), 0.0);
            weights.set_column(w.ncols(), &b);
        }
        let p = match params.get("P") {
            Some(p) => {
                let p = p.to_matrix()?;
                if p.shape() != (weights.ncols(), weights.ncols()) {
                    return Err(EngineError::Shape(format!(
                        "'{}' covariance is {}×{}, expected {f}×{f}",
                        self.name,
                        p.nrows(),
                        p.ncols(),
                        f = weights.ncols()
                    )));
                }
                Some(p)
            }
            None => self.fresh_covariance(),
        };
        self.weights = Some(weights);
        self.p = p;
        self.fitted = true;
        Ok(())
    }

    fn as_online(&mut self) -> Option<&mut dyn OnlineFit> {
        Some(self)
    }
}

impl OnlineFit for OnlineReadout {
    fn set_output_dim(&mut self, dim: usize) -> Result<()> {
        if let Some(d) = self.output_dim.filter(|d| *d != dim) {
            return Err(EngineError::Shape(format!(
                "node '{}' has output dimension {d}, target has {dim}",
                self.name
            )));
        }
        self.output_dim = Some(dim);
        self.allocate();
        Ok(())
    }

    fn partial_fit(
        &mut self,
        input: &DVector<f64>,
        target: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        self.fix_dims(input.len(), target.len())?;
        let x = self.augment(input);
        let prediction = self.predict(&x)?;
        let error = target - &prediction;

        match self.config.rule {
            OnlineRule::Rls {
                forgetting,
                ridge,
                max_covariance_trace,
            } => self.rls_update(&x, &error, forgetting, ridge, max_covariance_trace),
            OnlineRule::Lms { learning_rate } => {
                if let Some(w) = self.weights.as_mut() {
                    *w += (&error * x.transpose()) * learning_rate;
                }
                self.num_updates += 1;
            }
        }
        let precision = self.config.precision;
        if let Some(w) = self.weights.as_mut() {
            precision.apply_matrix(w);
        }
        self.fitted = true;
        self.state = Some(prediction.clone());
        Ok(prediction)
    }
}
