// Copyright (c) 2025-2026 brdigetrlol. All rights reserved.
// SPDX-License-Identifier: LicenseRef-Icarus-Proprietary
// See LICENSE in the repository root for full license terms.

//! Elementwise activation functions.
//!
//! Only the handful needed to drive reservoirs is provided here; anything
//! else plugs in through [`Activation::Custom`].

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::MathError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Identity,
    Tanh,
    Sigmoid,
    Relu,
    Softsign,
    /// User-supplied scalar function. Not serializable.
    #[serde(skip)]
    Custom(fn(f64) -> f64),
}

impl Default for Activation {
    fn default() -> Self {
        Self::Tanh
    }
}

impl Activation {
    /// Look up an activation by name.
    pub fn from_name(name: &str) -> Result<Self, MathError> {
        match name.to_ascii_lowercase().as_str() {
            "identity" | "linear" => Ok(Self::Identity),
            "tanh" => Ok(Self::Tanh),
            "sigmoid" => Ok(Self::Sigmoid),
            "relu" => Ok(Self::Relu),
            "softsign" => Ok(Self::Softsign),
            other => Err(MathError::InvalidParameter(format!(
                "unknown activation '{other}'"
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Tanh => "tanh",
            Self::Sigmoid => "sigmoid",
            Self::Relu => "relu",
            Self::Softsign => "softsign",
            Self::Custom(_) => "custom",
        }
    }

    #[inline]
    pub fn apply_scalar(&self, x: f64) -> f64 {
        match self {
            Self::Identity => x,
            Self::Tanh => x.tanh(),
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::Relu => x.max(0.0),
            Self::Softsign => x / (1.0 + x.abs()),
            Self::Custom(f) => f(x),
        }
    }

    /// Apply elementwise in place.
    pub fn apply(&self, v: &mut DVector<f64>) {
        if matches!(self, Self::Identity) {
            return;
        }
        v.apply(|x| *x = self.apply_scalar(*x));
    }
}
