// Copyright (c) 2025-2026 brdigetrlol. All rights reserved.
// SPDX-License-Identifier: LicenseRef-Icarus-Proprietary
// See LICENSE in the repository root for full license terms.

//! The `Node` capability set shared by every computational unit.
//!
//! A node owns a state vector equal to its last output. Its shape is fixed
//! lazily by the first sample it is initialized with, and from then on every
//! input must match. Training capabilities are exposed through the
//! [`OfflineFit`] and [`OnlineFit`] seams rather than inheritance.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use nalgebra::{DMatrix, DVector};
use resonant_math::Precision;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::OfflineConfig;
use crate::error::{EngineError, Result};
use crate::training::{FitReport, FitSummary, OfflineTrainer};

/// A stateful computational unit.
pub trait Node: Send {
    /// Unique name used for graph lookups and feedback resolution.
    fn name(&self) -> &str;

    /// Short variant label ("reservoir", "ridge", ...).
    fn kind(&self) -> &'static str;

    fn input_dim(&self) -> Option<usize>;

    fn output_dim(&self) -> Option<usize>;

    fn precision(&self) -> Precision;

    /// Shape fixed and parameters allocated.
    fn is_initialized(&self) -> bool;

    fn is_trainable(&self) -> bool {
        false
    }

    /// Has received training data at least once.
    fn is_fitted(&self) -> bool {
        false
    }

    fn accepts_feedback(&self) -> bool {
        false
    }

    fn feedback_dim(&self) -> Option<usize> {
        None
    }

    /// Infer or validate `input_dim` from a sample and allocate
    /// shape-dependent parameters. Idempotent once the shape is fixed.
    fn initialize(&mut self, sample: &DVector<f64>) -> Result<()>;

    /// Allocate feedback weights from a sample of the feedback vector.
    fn initialize_feedback(&mut self, _sample: &DVector<f64>) -> Result<()> {
        Err(EngineError::Shape(format!(
            "node '{}' does not accept feedback",
            self.name()
        )))
    }

    /// Forget inferred dimensions and parameters so the node can be
    /// initialized again with a different shape.
    fn reset_shape(&mut self);

    /// One timestep: compute the new state from the current state, the
    /// input and the optional previous-step feedback. Returns the new state.
    fn forward(
        &mut self,
        input: &DVector<f64>,
        feedback: Option<&DVector<f64>>,
    ) -> Result<DVector<f64>>;

    /// Process a whole sequence (rows are timesteps), keeping state across
    /// timesteps. Equivalent to repeated `forward`.
    fn run(&mut self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        let dim = self
            .output_dim()
            .ok_or_else(|| EngineError::NotInitialized(self.name().to_string()))?;
        let mut out = DMatrix::<f64>::zeros(inputs.nrows(), dim);
        for t in 0..inputs.nrows() {
            let x = inputs.row(t).transpose();
            let y = self.forward(&x, None)?;
            out.set_row(t, &y.transpose());
        }
        Ok(out)
    }

    /// Current state, `None` before initialization.
    fn state(&self) -> Option<DVector<f64>>;

    fn set_state(&mut self, state: &DVector<f64>) -> Result<()>;

    /// Zero the state, or set it to `to` (which must match `output_dim`).
    fn reset(&mut self, to: Option<&DVector<f64>>) -> Result<()> {
        match to {
            Some(s) => self.set_state(s),
            None => {
                let dim = self
                    .output_dim()
                    .ok_or_else(|| EngineError::NotInitialized(self.name().to_string()))?;
                self.set_state(&DVector::zeros(dim))
            }
        }
    }

    /// Named parameter arrays, for persistence.
    fn params(&self) -> ParamMap {
        ParamMap::new()
    }

    fn load_params(&mut self, params: &ParamMap) -> Result<()> {
        if params.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Shape(format!(
                "node '{}' has no parameters to load",
                self.name()
            )))
        }
    }

    fn as_offline(&mut self) -> Option<&mut dyn OfflineFit> {
        None
    }

    fn as_online(&mut self) -> Option<&mut dyn OnlineFit> {
        None
    }

    /// Fit on `(inputs, targets)` sequence pairs, discarding the first
    /// `washout` rows of each sequence.
    fn fit(
        &mut self,
        inputs: &[DMatrix<f64>],
        targets: &[DMatrix<f64>],
        washout: usize,
    ) -> Result<FitReport> {
        let name = self.name().to_string();
        let trainer = OfflineTrainer::new(OfflineConfig {
            washout,
            ..OfflineConfig::default()
        });
        match self.as_offline() {
            Some(readout) => trainer.fit_readout(readout, inputs, targets),
            None => Err(EngineError::NotTrainable(name)),
        }
    }
}

/// Closed-form training over collected states.
pub trait OfflineFit: Node {
    /// Fix the output dimension from the targets if not configured.
    fn set_output_dim(&mut self, dim: usize) -> Result<()>;

    /// Fit from a state matrix (rows = timesteps) and aligned targets.
    fn fit_collected(&mut self, states: &DMatrix<f64>, targets: &DMatrix<f64>)
        -> Result<FitSummary>;
}

/// Incremental training, one timestep at a time.
pub trait OnlineFit: Node {
    fn set_output_dim(&mut self, dim: usize) -> Result<()>;

    /// Predict from `input`, then learn from `target`. Returns the
    /// prediction made before the update.
    fn partial_fit(&mut self, input: &DVector<f64>, target: &DVector<f64>)
        -> Result<DVector<f64>>;
}

// ─── Scoped state substitution ───────────────────────

/// Guard returned by [`NodeExt::with_state`]. Derefs to the node and puts
/// the previous state back when dropped.
pub struct StateGuard<'a, N: Node + ?Sized> {
    node: &'a mut N,
    saved: Option<DVector<f64>>,
}

impl<N: Node + ?Sized> Deref for StateGuard<'_, N> {
    type Target = N;

    fn deref(&self) -> &N {
        self.node
    }
}

impl<N: Node + ?Sized> DerefMut for StateGuard<'_, N> {
    fn deref_mut(&mut self) -> &mut N {
        self.node
    }
}

impl<N: Node + ?Sized> Drop for StateGuard<'_, N> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            if let Err(e) = self.node.set_state(&saved) {
                warn!(node = self.node.name(), error = %e, "failed to restore node state");
            }
        }
    }
}

pub trait NodeExt: Node {
    /// Temporarily substitute the node's state. The prior state is restored
    /// when the returned guard goes out of scope.
    fn with_state(&mut self, state: &DVector<f64>) -> Result<StateGuard<'_, Self>> {
        let saved = self
            .state()
            .ok_or_else(|| EngineError::NotInitialized(self.name().to_string()))?;
        self.set_state(state)?;
        Ok(StateGuard {
            node: self,
            saved: Some(saved),
        })
    }

    /// Run `f` with a substituted state; the prior state is restored
    /// whether `f` succeeds or fails.
    fn scoped<R>(
        &mut self,
        state: &DVector<f64>,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let mut guard = self.with_state(state)?;
        f(&mut *guard)
    }
}

impl<N: Node + ?Sized> NodeExt for N {}

// ─── Parameters ──────────────────────────────────────

/// A named parameter matrix, stored row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamArray {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl ParamArray {
    pub fn from_matrix(m: &DMatrix<f64>) -> Self {
        Self {
            rows: m.nrows(),
            cols: m.ncols(),
            data: m.transpose().as_slice().to_vec(),
        }
    }

    pub fn from_vector(v: &DVector<f64>) -> Self {
        Self {
            rows: v.len(),
            cols: 1,
            data: v.as_slice().to_vec(),
        }
    }

    pub fn to_matrix(&self) -> Result<DMatrix<f64>> {
        if self.data.len() != self.rows * self.cols {
            return Err(EngineError::Shape(format!(
                "parameter array declares {}×{} but holds {} values",
                self.rows,
                self.cols,
                self.data.len()
            )));
        }
        Ok(DMatrix::from_row_slice(self.rows, self.cols, &self.data))
    }

    pub fn to_vector(&self) -> Result<DVector<f64>> {
        if self.cols != 1 || self.data.len() != self.rows {
            return Err(EngineError::Shape(format!(
                "expected a column vector, got {}×{}",
                self.rows, self.cols
            )));
        }
        Ok(DVector::from_vec(self.data.clone()))
    }
}

pub type ParamMap = BTreeMap<String, ParamArray>;

/// Fetch a required parameter from a map.
pub(crate) fn require_param<'a>(
    params: &'a ParamMap,
    node: &str,
    key: &str,
) -> Result<&'a ParamArray> {
    params
        .get(key)
        .ok_or_else(|| EngineError::Shape(format!("node '{node}' is missing parameter '{key}'")))
}

// ─── Helpers ─────────────────────────────────────────

/// Fail with `Shape` unless `v` has the expected length.
pub(crate) fn check_len(node: &str, what: &str, v: &DVector<f64>, expected: usize) -> Result<()> {
    if v.len() != expected {
        return Err(EngineError::Shape(format!(
            "node '{node}' expected {what} of dimension {expected}, got {}",
            v.len()
        )));
    }
    Ok(())
}

/// Concatenate vectors end to end.
pub fn concat_vectors<'a, I>(parts: I) -> DVector<f64>
where
    I: IntoIterator<Item = &'a DVector<f64>>,
{
    let mut data = Vec::new();
    for p in parts {
        data.extend_from_slice(p.as_slice());
    }
    DVector::from_vec(data)
}

/// Concatenate timeseries side by side (same number of rows).
pub fn concat_columns(parts: &[&DMatrix<f64>]) -> Result<DMatrix<f64>> {
    let rows = parts.first().map_or(0, |m| m.nrows());
    if parts.iter().any(|m| m.nrows() != rows) {
        return Err(EngineError::Shape(
            "cannot concatenate timeseries of different lengths".into(),
        ));
    }
    let cols: usize = parts.iter().map(|m| m.ncols()).sum();
    let mut out = DMatrix::<f64>::zeros(rows, cols);
    let mut offset = 0;
    for m in parts {
        out.view_mut((0, offset), (rows, m.ncols())).copy_from(*m);
        offset += m.ncols();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReservoirConfig;
    use crate::nodes::Reservoir;

    fn warmed_reservoir() -> Reservoir {
        let mut r = Reservoir::new(
            "res",
            ReservoirConfig {
                units: 8,
                ..ReservoirConfig::default()
            },
        )
        .unwrap();
        r.initialize(&DVector::zeros(1)).unwrap();
        r.forward(&DVector::from_vec(vec![0.7]), None).unwrap();
        r
    }

    #[test]
    fn test_with_state_restores_on_drop() {
        let mut r = warmed_reservoir();
        let before = r.state().unwrap();
        {
            let mut guard = r.with_state(&DVector::zeros(8)).unwrap();
            assert_eq!(guard.state().unwrap(), DVector::zeros(8));
            guard.forward(&DVector::from_vec(vec![1.0]), None).unwrap();
        }
        assert_eq!(r.state().unwrap(), before);
    }

    #[test]
    fn test_scoped_restores_after_error() {
        let mut r = warmed_reservoir();
        let before = r.state().unwrap();
        let result: Result<()> = r.scoped(&DVector::zeros(8), |n| {
            n.forward(&DVector::zeros(3), None)?;
            Ok(())
        });
        assert!(matches!(result, Err(EngineError::Shape(_))));
        assert_eq!(r.state().unwrap(), before);
    }

    #[test]
    fn test_with_state_restores_after_panic() {
        let mut r = warmed_reservoir();
        let before = r.state().unwrap();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = r.with_state(&DVector::zeros(8)).unwrap();
            panic!("interrupted");
        }));
        assert!(outcome.is_err());
        assert_eq!(r.state().unwrap(), before);
    }

    #[test]
    fn test_with_state_wrong_dim() {
        let mut r = warmed_reservoir();
        let before = r.state().unwrap();
        assert!(matches!(r.with_state(&DVector::zeros(3)), Err(EngineError::Shape(_))));
        assert_eq!(r.state().unwrap(), before);
    }

    #[test]
    fn test_fit_on_untrainable_node() {
        let mut r = warmed_reservoir();
        let x = DMatrix::<f64>::zeros(4, 1);
        assert!(matches!(
            r.fit(&[x.clone()], &[x], 0),
            Err(EngineError::NotTrainable(_))
        ));
    }

    #[test]
    fn test_param_array_round_trip_is_row_major() {
        let m = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let p = ParamArray::from_matrix(&m);
        assert_eq!(p.data, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(p.to_matrix().unwrap(), m);
    }

    #[test]
    fn test_param_array_bad_length() {
        let p = ParamArray {
            rows: 2,
            cols: 2,
            data: vec![1.0],
        };
        assert!(p.to_matrix().is_err());
        assert!(p.to_vector().is_err());
    }

    #[test]
    fn test_concat_vectors() {
        let a = DVector::from_vec(vec![1.0, 2.0]);
        let b = DVector::from_vec(vec![3.0]);
        assert_eq!(concat_vectors([&a, &b]).as_slice(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_concat_columns() {
        let a = DMatrix::from_row_slice(2, 1, &[1.0, 2.0]);
        let b = DMatrix::from_row_slice(2, 2, &[3.0, 4.0, 5.0, 6.0]);
        let c = concat_columns(&[&a, &b]).unwrap();
        assert_eq!(c, DMatrix::from_row_slice(2, 3, &[1.0, 3.0, 4.0, 2.0, 5.0, 6.0]));
    }

    #[test]
    fn test_concat_columns_length_mismatch() {
        let a = DMatrix::<f64>::zeros(2, 1);
        let b = DMatrix::<f64>::zeros(3, 1);
        assert!(concat_columns(&[&a, &b]).is_err());
    }
}
