// Copyright (c) 2025-2026 brdigetrlol. All rights reserved.
// SPDX-License-Identifier: LicenseRef-Icarus-Proprietary
// See LICENSE in the repository root for full license terms.

//! Drives nodes and models over whole sequences and batches.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::node::Node;

/// How state is carried between the sequences of a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum RunMode {
    /// Each sequence continues from where the previous one ended.
    #[default]
    Stateful,
    /// State is reset before every sequence, to zeros or to `initial`.
    Stateless { initial: Option<Vec<f64>> },
}

#[derive(Debug, Clone, Default)]
pub struct Executor {
    mode: RunMode,
}

impl Executor {
    pub fn new(mode: RunMode) -> Self {
        Self { mode }
    }

    pub fn stateful() -> Self {
        Self::new(RunMode::Stateful)
    }

    pub fn stateless() -> Self {
        Self::new(RunMode::Stateless { initial: None })
    }

    pub fn mode(&self) -> &RunMode {
        &self.mode
    }

    /// Run one sequence. The node is initialized from the first row if
    /// needed. An empty sequence returns an empty matrix and leaves the
    /// node untouched.
    pub fn run(&self, node: &mut dyn Node, sequence: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        if sequence.nrows() == 0 {
            return Ok(DMatrix::zeros(0, node.output_dim().unwrap_or(0)));
        }
        if !node.is_initialized() {
            node.initialize(&sequence.row(0).transpose())?;
        }
        if let RunMode::Stateless { initial } = &self.mode {
            let initial = initial.as_ref().map(|v| DVector::from_column_slice(v));
            node.reset(initial.as_ref())?;
        }
        node.run(sequence)
    }

    /// Run every sequence of a batch in order, honoring the run mode for
    /// the whole call.
    pub fn run_batch(
        &self,
        node: &mut dyn Node,
        sequences: &[DMatrix<f64>],
    ) -> Result<Vec<DMatrix<f64>>> {
        let mut outputs = Vec::with_capacity(sequences.len());
        for seq in sequences {
            outputs.push(self.run(&mut *node, seq)?);
        }
        debug!(
            node = node.name(),
            sequences = sequences.len(),
            mode = ?self.mode,
            "batch complete"
        );
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReservoirConfig;
    use crate::nodes::Reservoir;

    fn reservoir() -> Reservoir {
        Reservoir::new(
            "res",
            ReservoirConfig {
                units: 15,
                seed: 11,
                ..ReservoirConfig::default()
            },
        )
        .unwrap()
    }

    fn seq(offset: f64) -> DMatrix<f64> {
        DMatrix::from_fn(12, 1, |t, _| (t as f64 * 0.4 + offset).sin())
    }

    #[test]
    fn test_run_initializes_lazily() {
        let mut node = reservoir();
        let out = Executor::stateful().run(&mut node, &seq(0.0)).unwrap();
        assert_eq!(out.shape(), (12, 15));
        assert!(node.is_initialized());
    }

    #[test]
    fn test_empty_sequence() {
        let mut node = reservoir();
        let out = Executor::stateful().run(&mut node, &DMatrix::zeros(0, 1)).unwrap();
        assert_eq!(out.nrows(), 0);
        assert!(!node.is_initialized());
    }

    #[test]
    fn test_stateless_batch_is_order_independent() {
        let exec = Executor::stateless();
        let mut a = reservoir();
        let mut b = reservoir();
        let ab = exec.run_batch(&mut a, &[seq(0.0), seq(1.0)]).unwrap();
        let ba = exec.run_batch(&mut b, &[seq(1.0), seq(0.0)]).unwrap();
        assert_eq!(ab[0], ba[1]);
        assert_eq!(ab[1], ba[0]);
    }

    #[test]
    fn test_stateful_batch_carries_state() {
        let mut a = reservoir();
        let mut b = reservoir();
        let carried = Executor::stateful().run_batch(&mut a, &[seq(0.0), seq(1.0)]).unwrap();
        let fresh = Executor::stateless().run_batch(&mut b, &[seq(0.0), seq(1.0)]).unwrap();
        assert_eq!(carried[0], fresh[0]);
        assert_ne!(carried[1], fresh[1]);
    }

    #[test]
    fn test_stateless_with_initial_state() {
        let initial = vec![0.5; 15];
        let exec = Executor::new(RunMode::Stateless {
            initial: Some(initial.clone()),
        });
        let mut a = reservoir();
        let out = exec.run(&mut a, &seq(0.0)).unwrap();

        let mut b = reservoir();
        b.initialize(&DVector::zeros(1)).unwrap();
        b.reset(Some(&DVector::from_vec(initial))).unwrap();
        assert_eq!(out, b.run(&seq(0.0)).unwrap());
    }

    #[test]
    fn test_run_mode_serde() {
        let json = serde_json::to_string(&RunMode::Stateless { initial: None }).unwrap();
        assert_eq!(json, r#"{"mode":"stateless","initial":null}"#);
        let back: RunMode = serde_json::from_str(r#"{"mode":"stateful"}"#).unwrap();
        assert_eq!(back, RunMode::Stateful);
    }
}
