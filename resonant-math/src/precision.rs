// Copyright (c) 2025-2026 brdigetrlol. All rights reserved.
// SPDX-License-Identifier: LicenseRef-Icarus-Proprietary
// See LICENSE in the repository root for full license terms.

//! Floating-point precision policy for node state.
//!
//! All arithmetic is carried out in f64. A node configured for `F32` rounds
//! every value it stores through f32, so its state and parameters stay
//! representable in single precision for the node's whole lifetime.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    F32,
    F64,
}

impl Default for Precision {
    fn default() -> Self {
        Self::F64
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precision::F32 => write!(f, "f32"),
            Precision::F64 => write!(f, "f64"),
        }
    }
}

impl Precision {
    /// Round a single value to this precision.
    #[inline]
    pub fn round(self, v: f64) -> f64 {
        match self {
            Precision::F32 => v as f32 as f64,
            Precision::F64 => v,
        }
    }

    /// Round a vector in place.
    pub fn apply_vector(self, v: &mut DVector<f64>) {
        if self == Precision::F32 {
            v.apply(|x| *x = self.round(*x));
        }
    }

    /// Round a matrix in place.
    pub fn apply_matrix(self, m: &mut DMatrix<f64>) {
        if self == Precision::F32 {
            m.apply(|x| *x = self.round(*x));
        }
    }
}
