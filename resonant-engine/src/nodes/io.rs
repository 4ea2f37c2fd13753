// Copyright (c) 2025-2026 brdigetrlol. All rights reserved.
// SPDX-License-Identifier: LicenseRef-Icarus-Proprietary
// See LICENSE in the repository root for full license terms.

//! Identity nodes marking where data enters and leaves a model.
//!
//! Both forward their input unchanged; an optional fixed dimension turns
//! them into shape checkpoints.

use nalgebra::DVector;
use resonant_math::Precision;

use crate::error::{EngineError, Result};
use crate::node::{check_len, Node};

#[derive(Debug, Clone)]
struct Passthrough {
    name: String,
    dim: Option<usize>,
    fixed: bool,
    state: Option<DVector<f64>>,
    precision: Precision,
}

impl Passthrough {
    fn new(name: impl Into<String>, dim: Option<usize>) -> Self {
        Self {
            name: name.into(),
            dim,
            fixed: dim.is_some(),
            state: None,
            precision: Precision::F64,
        }
    }

    fn initialize(&mut self, sample: &DVector<f64>) -> Result<()> {
        match self.dim {
            Some(d) => check_len(&self.name, "input", sample, d)?,
            None => self.dim = Some(sample.len()),
        }
        if self.state.is_none() {
            self.state = Some(DVector::zeros(sample.len()));
        }
        Ok(())
    }

    fn forward(&mut self, input: &DVector<f64>) -> Result<DVector<f64>> {
        let dim = self
            .dim
            .filter(|_| self.state.is_some())
            .ok_or_else(|| EngineError::NotInitialized(self.name.clone()))?;
        check_len(&self.name, "input", input, dim)?;
        let mut out = input.clone();
        self.precision.apply_vector(&mut out);
        self.state = Some(out.clone());
        Ok(out)
    }

    fn set_state(&mut self, state: &DVector<f64>) -> Result<()> {
        let dim = self
            .dim
            .ok_or_else(|| EngineError::NotInitialized(self.name.clone()))?;
        check_len(&self.name, "state", state, dim)?;
        self.state = Some(state.clone());
        Ok(())
    }

    fn reset_shape(&mut self) {
        if !self.fixed {
            self.dim = None;
        }
        self.state = None;
    }
}

macro_rules! passthrough_node {
    ($ty:ident, $kind:literal) => {
        impl $ty {
            /// Dimension inferred from the first sample.
            pub fn new(name: impl Into<String>) -> Self {
                Self(Passthrough::new(name, None))
            }

            /// Dimension fixed up front.
            pub fn with_dim(name: impl Into<String>, dim: usize) -> Self {
                Self(Passthrough::new(name, Some(dim)))
            }

            pub fn with_precision(mut self, precision: Precision) -> Self {
                self.0.precision = precision;
                self
            }
        }

        impl Node for $ty {
            fn name(&self) -> &str {
                &self.0.name
            }

            fn kind(&self) -> &'static str {
                $kind
            }

            fn input_dim(&self) -> Option<usize> {
                self.0.dim
            }

            fn output_dim(&self) -> Option<usize> {
                self.0.dim
            }

            fn precision(&self) -> Precision {
                self.0.precision
            }

            fn is_initialized(&self) -> bool {
                self.0.state.is_some()
            }

            fn initialize(&mut self, sample: &DVector<f64>) -> Result<()> {
                self.0.initialize(sample)
            }

            fn reset_shape(&mut self) {
                self.0.reset_shape()
            }

            fn forward(
                &mut self,
                input: &DVector<f64>,
                feedback: Option<&DVector<f64>>,
            ) -> Result<DVector<f64>> {
                if feedback.is_some() {
                    return Err(EngineError::Shape(format!(
                        "node '{}' does not accept feedback",
                        self.0.name
                    )));
                }
                self.0.forward(input)
            }

            fn state(&self) -> Option<DVector<f64>> {
                self.0.state.clone()
            }

            fn set_state(&mut self, state: &DVector<f64>) -> Result<()> {
                self.0.set_state(state)
            }
        }
    };
}

/// Entry point of a model.
#[derive(Debug, Clone)]
pub struct Input(Passthrough);

/// Exit point of a model.
#[derive(Debug, Clone)]
pub struct Output(Passthrough);

passthrough_node!(Input, "input");
passthrough_node!(Output, "output");
