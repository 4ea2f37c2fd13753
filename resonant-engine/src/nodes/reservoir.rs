// Copyright (c) 2025-2026 brdigetrlol. All rights reserved.
// SPDX-License-Identifier: LicenseRef-Icarus-Proprietary
// See LICENSE in the repository root for full license terms.

//! Leaky-integrator reservoir (Echo State Network core).
//!
//! Update rule, per timestep:
//!
//! ```text
//! pre(t)   = W · s(t-1) + W_in · u(t) + W_fb · fb(t-1) + b
//! s(t)     = (1 - α) · s(t-1) + α · f(pre(t))
//! ```
//!
//! `W` is a sparse random matrix rescaled to the configured spectral radius;
//! `W_in`, `W_fb` and `b` are sparse random draws multiplied by their scaling
//! factors. All weights are fixed once generated. Each matrix has its own
//! seed derived from `config.seed`, so allocating feedback weights later never
//! changes the recurrent or input weights.

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use resonant_math::{random_matrix, scale_to_spectral_radius, Precision};
use tracing::debug;

use crate::config::ReservoirConfig;
use crate::error::{EngineError, Result};
use crate::node::{check_len, require_param, Node, ParamArray, ParamMap};

const SEED_RECURRENT: u64 = 0;
const SEED_INPUT: u64 = 1;
const SEED_BIAS: u64 = 2;
const SEED_FEEDBACK: u64 = 3;

#[derive(Debug, Clone)]
pub struct Reservoir {
    name: String,
    config: ReservoirConfig,
    input_dim: Option<usize>,
    feedback_dim: Option<usize>,
    w: Option<DMatrix<f64>>,
    w_in: Option<DMatrix<f64>>,
    w_fb: Option<DMatrix<f64>>,
    bias: Option<DVector<f64>>,
    state: Option<DVector<f64>>,
}

impl Reservoir {
    pub fn new(name: impl Into<String>, config: ReservoirConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            input_dim: config.input_dim,
            config,
            feedback_dim: None,
            w: None,
            w_in: None,
            w_fb: None,
            bias: None,
            state: None,
        })
    }

    /// Build a reservoir around explicit weights instead of random draws.
    ///
    /// `w` is `units × units`, `w_in` is `units × input_dim`, `bias` has
    /// `units` entries. `config.units` and `config.input_dim` are overridden
    /// by the matrix shapes.
    pub fn with_weights(
        name: impl Into<String>,
        mut config: ReservoirConfig,
        w: DMatrix<f64>,
        w_in: DMatrix<f64>,
        bias: DVector<f64>,
    ) -> Result<Self> {
        let name = name.into();
        let units = w.nrows();
        if !w.is_square() || w_in.nrows() != units || bias.len() != units {
            return Err(EngineError::Shape(format!(
                "reservoir '{name}': W is {}×{}, W_in is {}×{}, bias has {} entries",
                w.nrows(),
                w.ncols(),
                w_in.nrows(),
                w_in.ncols(),
                bias.len()
            )));
        }
        config.units = units;
        config.input_dim = Some(w_in.ncols());
        let mut node = Self::new(name, config)?;
        node.w = Some(w);
        node.w_in = Some(w_in);
        node.bias = Some(bias);
        node.round_weights();
        Ok(node)
    }

    pub fn config(&self) -> &ReservoirConfig {
        &self.config
    }

    pub fn units(&self) -> usize {
        self.config.units
    }

    pub fn recurrent_weights(&self) -> Option<&DMatrix<f64>> {
        self.w.as_ref()
    }

    pub fn input_weights(&self) -> Option<&DMatrix<f64>> {
        self.w_in.as_ref()
    }

    pub fn feedback_weights(&self) -> Option<&DMatrix<f64>> {
        self.w_fb.as_ref()
    }

    pub fn bias(&self) -> Option<&DVector<f64>> {
        self.bias.as_ref()
    }

    fn rng(&self, stream: u64) -> StdRng {
        StdRng::seed_from_u64(self.config.seed.wrapping_add(stream))
    }

    fn round_weights(&mut self) {
        let p = self.config.precision;
        for m in [&mut self.w, &mut self.w_in, &mut self.w_fb].into_iter().flatten() {
            p.apply_matrix(m);
        }
        if let Some(b) = self.bias.as_mut() {
            p.apply_vector(b);
        }
    }

    fn generate_weights(&mut self, input_dim: usize) -> Result<()> {
        let c = &self.config;
        let units = c.units;

        if self.w.is_none() {
            let mut w = random_matrix(
                units,
                units,
                c.connectivity,
                c.distribution,
                &mut self.rng(SEED_RECURRENT),
            )
            .map_err(|e| EngineError::from_math(&self.name, e))?;
            let before = scale_to_spectral_radius(&mut w, c.spectral_radius)
                .map_err(|e| EngineError::from_math(&self.name, e))?;
            debug!(
                node = %self.name,
                units,
                radius_before = before,
                radius = c.spectral_radius,
                "generated recurrent weights"
            );
            self.w = Some(w);
        }
        if self.w_in.is_none() {
            let w_in = random_matrix(
                units,
                input_dim,
                c.input_connectivity,
                c.input_distribution,
                &mut self.rng(SEED_INPUT),
            )
            .map_err(|e| EngineError::from_math(&self.name, e))?
                * c.input_scaling;
            self.w_in = Some(w_in);
        }
        if self.bias.is_none() {
            let b = random_matrix(units, 1, 1.0, c.input_distribution, &mut self.rng(SEED_BIAS))
                .map_err(|e| EngineError::from_math(&self.name, e))?
                * c.bias_scaling;
            self.bias = Some(b.column(0).into_owned());
        }
        self.round_weights();
        Ok(())
    }

    /// `W · s + b` plus the optional feedback term, before the input term.
    fn recurrent_drive(&self, state: &DVector<f64>, feedback: Option<&DVector<f64>>) -> Result<DVector<f64>> {
        let (w, bias) = match (&self.w, &self.bias) {
            (Some(w), Some(b)) => (w, b),
            _ => return Err(EngineError::NotInitialized(self.name.clone())),
        };
        let mut pre = w * state + bias;
        match (feedback, &self.w_fb) {
            (Some(fb), Some(w_fb)) => {
                check_len(&self.name, "feedback", fb, w_fb.ncols())?;
                pre += w_fb * fb;
            }
            (Some(_), None) => {
                return Err(EngineError::Shape(format!(
                    "reservoir '{}' received feedback but has no feedback weights",
                    self.name
                )))
            }
            (None, Some(_)) => {
                return Err(EngineError::Shape(format!(
                    "reservoir '{}' expects feedback every timestep",
                    self.name
                )))
            }
            (None, None) => {}
        }
        Ok(pre)
    }

    /// Apply the activation and leaky integration to a pre-activation.
    fn integrate(&self, state: &DVector<f64>, mut pre: DVector<f64>) -> DVector<f64> {
        self.config.activation.apply(&mut pre);
        let lr = self.config.leak_rate;
        let mut next = if lr >= 1.0 {
            pre
        } else {
            state * (1.0 - lr) + pre * lr
        };
        self.config.precision.apply_vector(&mut next);
        next
    }
}

impl Node for Reservoir {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "reservoir"
    }

    fn input_dim(&self) -> Option<usize> {
        self.input_dim
    }

    fn output_dim(&self) -> Option<usize> {
        Some(self.config.units)
    }

    fn precision(&self) -> Precision {
        self.config.precision
    }

    fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    fn accepts_feedback(&self) -> bool {
        true
    }

    fn feedback_dim(&self) -> Option<usize> {
        self.feedback_dim
    }

    fn initialize(&mut self, sample: &DVector<f64>) -> Result<()> {
        let dim = match self.input_dim {
            Some(d) => {
                check_len(&self.name, "input", sample, d)?;
                d
            }
            None => sample.len(),
        };
        if self.state.is_some() {
            return Ok(());
        }
        self.generate_weights(dim)?;
        self.input_dim = Some(dim);
        self.state = Some(DVector::zeros(self.config.units));
        debug!(node = %self.name, input_dim = dim, units = self.config.units, "reservoir initialized");
        Ok(())
    }

    fn initialize_feedback(&mut self, sample: &DVector<f64>) -> Result<()> {
        if let Some(d) = self.feedback_dim {
            return check_len(&self.name, "feedback", sample, d);
        }
        let dim = sample.len();
        if self.w_fb.as_ref().map_or(true, |w| w.ncols() != dim) {
            let c = &self.config;
            let w_fb = random_matrix(
                c.units,
                dim,
                c.feedback_connectivity,
                c.input_distribution,
                &mut self.rng(SEED_FEEDBACK),
            )
            .map_err(|e| EngineError::from_math(&self.name, e))?
                * c.feedback_scaling;
            self.w_fb = Some(w_fb);
            self.round_weights();
        }
        self.feedback_dim = Some(dim);
        Ok(())
    }

    fn reset_shape(&mut self) {
        self.input_dim = self.config.input_dim;
        self.feedback_dim = None;
        self.w_in = None;
        self.w_fb = None;
        self.state = None;
    }

    fn forward(
        &mut self,
        input: &DVector<f64>,
        feedback: Option<&DVector<f64>>,
    ) -> Result<DVector<f64>> {
        let (state, w_in) = match (&self.state, &self.w_in) {
            (Some(s), Some(w_in)) => (s, w_in),
            _ => return Err(EngineError::NotInitialized(self.name.clone())),
        };
        check_len(&self.name, "input", input, w_in.ncols())?;
        let mut pre = self.recurrent_drive(state, feedback)?;
        pre += w_in * input;
        let next = self.integrate(state, pre);
        self.state = Some(next.clone());
        Ok(next)
    }

    /// Batched sequence processing: the input projection `U · W_inᵀ` is
    /// computed for all timesteps at once before the recurrent loop.
    fn run(&mut self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        let (mut state, w_in) = match (&self.state, &self.w_in) {
            (Some(s), Some(w_in)) => (s.clone(), w_in),
            _ => return Err(EngineError::NotInitialized(self.name.clone())),
        };
        if inputs.ncols() != w_in.ncols() {
            return Err(EngineError::Shape(format!(
                "node '{}' expected input of dimension {}, got {}",
                self.name,
                w_in.ncols(),
                inputs.ncols()
            )));
        }
        let projected = inputs * w_in.transpose();
        let mut out = DMatrix::<f64>::zeros(inputs.nrows(), self.config.units);
        for t in 0..inputs.nrows() {
            let mut pre = self.recurrent_drive(&state, None)?;
            pre += projected.row(t).transpose();
            state = self.integrate(&state, pre);
            out.set_row(t, &state.transpose());
        }
        self.state = Some(state);
        Ok(out)
    }

    fn state(&self) -> Option<DVector<f64>> {
        self.state.clone()
    }

    fn set_state(&mut self, state: &DVector<f64>) -> Result<()> {
        if self.state.is_none() {
            return Err(EngineError::NotInitialized(self.name.clone()));
        }
        check_len(&self.name, "state", state, self.config.units)?;
        let mut s = state.clone();
        self.config.precision.apply_vector(&mut s);
        self.state = Some(s);
        Ok(())
    }

    fn params(&self) -> ParamMap {
        let mut params = ParamMap::new();
        if let Some(w) = &self.w {
            params.insert("W".into(), ParamArray::from_matrix(w));
        }
        if let Some(w_in) = &self.w_in {
            params.insert("Win".into(), ParamArray::from_matrix(w_in));
        }
        if let Some(w_fb) = &self.w_fb {
            params.insert("Wfb".into(), ParamArray::from_matrix(w_fb));
        }
        if let Some(b) = &self.bias {
            params.insert("bias".into(), ParamArray::from_vector(b));
        }
        params
    }

    fn load_params(&mut self, params: &ParamMap) -> Result<()> {
        let units = self.config.units;
        let w = require_param(params, &self.name, "W")?.to_matrix()?;
        let w_in = require_param(params, &self.name, "Win")?.to_matrix()?;
        let bias = require_param(params, &self.name, "bias")?.to_vector()?;
        if w.shape() != (units, units) || w_in.nrows() != units || bias.len() != units {
            return Err(EngineError::Shape(format!(
                "parameters for '{}' do not match {units} units",
                self.name
            )));
        }
        if let Some(d) = self.config.input_dim {
            if w_in.ncols() != d {
                return Err(EngineError::Shape(format!(
                    "'{}' has fixed input dimension {d} but Win has {} columns",
                    self.name,
                    w_in.ncols()
                )));
            }
        }
        let w_fb = params.get("Wfb").map(|p| p.to_matrix()).transpose()?;
        if let Some(w_fb) = &w_fb {
            if w_fb.nrows() != units {
                return Err(EngineError::Shape(format!(
                    "'{}' Wfb has {} rows, expected {units}",
                    self.name,
                    w_fb.nrows()
                )));
            }
        }
        self.input_dim = Some(w_in.ncols());
        self.feedback_dim = w_fb.as_ref().map(|m| m.ncols());
        self.w = Some(w);
        self.w_in = Some(w_in);
        self.w_fb = w_fb;
        self.bias = Some(bias);
        self.round_weights();
        if self.state.is_none() {
            self.state = Some(DVector::zeros(units));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resonant_math::{spectral_radius, Activation};

    fn small_config() -> ReservoirConfig {
        ReservoirConfig {
            units: 20,
            connectivity: 0.3,
            input_connectivity: 1.0,
            seed: 7,
            ..ReservoirConfig::default()
        }
    }

    fn sample(dim: usize, v: f64) -> DVector<f64> {
        DVector::from_element(dim, v)
    }

    #[test]
    fn test_initialize_then_forward() {
        let mut res = Reservoir::new("res", small_config()).unwrap();
        assert!(!res.is_initialized());
        res.initialize(&sample(3, 0.0)).unwrap();
        assert_eq!(res.input_dim(), Some(3));
        let s = res.forward(&sample(3, 0.5), None).unwrap();
        assert_eq!(s.len(), 20);
        assert!(s.iter().all(|v| v.abs() <= 1.0));
    }

    #[test]
    fn test_forward_before_initialize() {
        let mut res = Reservoir::new("res", small_config()).unwrap();
        let r = res.forward(&sample(3, 0.5), None);
        assert!(matches!(r, Err(EngineError::NotInitialized(_))));
    }

    #[test]
    fn test_mismatched_input_after_init() {
        let mut res = Reservoir::new("res", small_config()).unwrap();
        res.initialize(&sample(3, 0.0)).unwrap();
        assert!(matches!(
            res.forward(&sample(4, 0.5), None),
            Err(EngineError::Shape(_))
        ));
        assert!(matches!(res.initialize(&sample(2, 0.0)), Err(EngineError::Shape(_))));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let mut res = Reservoir::new("res", small_config()).unwrap();
        res.initialize(&sample(3, 0.0)).unwrap();
        let w = res.recurrent_weights().unwrap().clone();
        res.initialize(&sample(3, 1.0)).unwrap();
        assert_eq!(res.recurrent_weights().unwrap(), &w);
    }

    #[test]
    fn test_spectral_radius_applied() {
        let mut res = Reservoir::new("res", small_config()).unwrap();
        res.initialize(&sample(1, 0.0)).unwrap();
        let rho = spectral_radius(res.recurrent_weights().unwrap()).unwrap();
        assert!((rho - 0.9).abs() < 1e-8, "rho = {rho}");
    }

    #[test]
    fn test_seeded_weights_reproducible() {
        let mut a = Reservoir::new("a", small_config()).unwrap();
        let mut b = Reservoir::new("b", small_config()).unwrap();
        a.initialize(&sample(2, 0.0)).unwrap();
        b.initialize(&sample(2, 0.0)).unwrap();
        assert_eq!(a.params(), b.params());
    }

    #[test]
    fn test_reset_is_memoryless() {
        let mut res = Reservoir::new("res", small_config()).unwrap();
        res.initialize(&sample(2, 0.0)).unwrap();
        let mut fresh = res.clone();
        for t in 0..30 {
            res.forward(&sample(2, (t as f64 * 0.3).sin()), None).unwrap();
        }
        res.reset(None).unwrap();
        let x = DVector::from_vec(vec![0.4, -0.2]);
        assert_eq!(res.forward(&x, None).unwrap(), fresh.forward(&x, None).unwrap());
    }

    #[test]
    fn test_reset_to_wrong_dim() {
        let mut res = Reservoir::new("res", small_config()).unwrap();
        res.initialize(&sample(2, 0.0)).unwrap();
        assert!(matches!(res.reset(Some(&sample(3, 0.0))), Err(EngineError::Shape(_))));
    }

    #[test]
    fn test_degenerate_reservoir_stays_zero() {
        let config = ReservoirConfig {
            units: 10,
            leak_rate: 1.0,
            input_scaling: 0.0,
            bias_scaling: 0.0,
            activation: Activation::Identity,
            ..ReservoirConfig::default()
        };
        let mut res = Reservoir::new("res", config).unwrap();
        res.initialize(&sample(2, 0.0)).unwrap();
        for t in 0..50 {
            let s = res.forward(&sample(2, t as f64 - 25.0), None).unwrap();
            assert!(s.iter().all(|v| *v == 0.0));
        }
    }

    #[test]
    fn test_leaky_update_matches_formula() {
        let w = DMatrix::from_row_slice(2, 2, &[0.5, 0.0, 0.0, 0.5]);
        let w_in = DMatrix::from_row_slice(2, 1, &[1.0, -1.0]);
        let bias = DVector::from_vec(vec![0.1, 0.0]);
        let config = ReservoirConfig {
            leak_rate: 0.5,
            activation: Activation::Tanh,
            ..ReservoirConfig::default()
        };
        let mut res = Reservoir::with_weights("res", config, w, w_in, bias).unwrap();
        res.initialize(&sample(1, 0.0)).unwrap();
        res.set_state(&DVector::from_vec(vec![0.2, -0.4])).unwrap();
        let s = res.forward(&DVector::from_vec(vec![0.3]), None).unwrap();
        let e0 = 0.5 * 0.2 + 0.5 * (0.5 * 0.2 + 0.3 + 0.1f64).tanh();
        let e1 = 0.5 * -0.4 + 0.5 * (0.5 * -0.4 - 0.3f64).tanh();
        assert!((s[0] - e0).abs() < 1e-12);
        assert!((s[1] - e1).abs() < 1e-12);
    }

    #[test]
    fn test_run_matches_forward() {
        let mut a = Reservoir::new("res", small_config()).unwrap();
        a.initialize(&sample(2, 0.0)).unwrap();
        let mut b = a.clone();
        let inputs = DMatrix::from_fn(25, 2, |t, j| ((t + j) as f64 * 0.2).cos());
        let batched = a.run(&inputs).unwrap();
        for t in 0..25 {
            let s = b.forward(&inputs.row(t).transpose(), None).unwrap();
            for j in 0..20 {
                assert!((batched[(t, j)] - s[j]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_feedback_required_once_initialized() {
        let mut res = Reservoir::new("res", small_config()).unwrap();
        res.initialize(&sample(1, 0.0)).unwrap();
        res.initialize_feedback(&sample(2, 0.0)).unwrap();
        assert_eq!(res.feedback_dim(), Some(2));
        assert!(res.forward(&sample(1, 0.1), None).is_err());
        assert!(res.forward(&sample(1, 0.1), Some(&sample(3, 0.0))).is_err());
        assert!(res.forward(&sample(1, 0.1), Some(&sample(2, 0.5))).is_ok());
    }

    #[test]
    fn test_feedback_weights_do_not_perturb_recurrent() {
        let mut a = Reservoir::new("a", small_config()).unwrap();
        a.initialize(&sample(1, 0.0)).unwrap();
        let before = a.recurrent_weights().unwrap().clone();
        a.initialize_feedback(&sample(1, 0.0)).unwrap();
        assert_eq!(a.recurrent_weights().unwrap(), &before);
    }

    #[test]
    fn test_f32_precision_state() {
        let config = ReservoirConfig {
            precision: Precision::F32,
            ..small_config()
        };
        let mut res = Reservoir::new("res", config).unwrap();
        res.initialize(&sample(1, 0.0)).unwrap();
        let s = res.forward(&sample(1, 0.37), None).unwrap();
        assert!(s.iter().all(|v| (*v as f32) as f64 == *v));
    }

    #[test]
    fn test_params_round_trip() {
        let mut a = Reservoir::new("a", small_config()).unwrap();
        a.initialize(&sample(2, 0.0)).unwrap();
        let mut b = Reservoir::new(
            "b",
            ReservoirConfig {
                seed: 999,
                ..small_config()
            },
        )
        .unwrap();
        b.load_params(&a.params()).unwrap();
        let x = sample(2, 0.3);
        assert_eq!(a.forward(&x, None).unwrap(), b.forward(&x, None).unwrap());
    }
}
