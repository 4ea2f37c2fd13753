// Copyright (c) 2025-2026 brdigetrlol. All rights reserved.
// SPDX-License-Identifier: LicenseRef-Icarus-Proprietary
// See LICENSE in the repository root for full license terms.

pub mod activation;
pub mod init;
pub mod linalg;
pub mod metrics;
pub mod precision;

pub use activation::Activation;
pub use init::{random_matrix, scale_to_spectral_radius, spectral_radius, WeightDistribution};
pub use linalg::{solve_ridge, RidgeSolution, SolveMethod};
pub use precision::Precision;

use thiserror::Error;

/// Failures raised by the numerical collaborators.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MathError {
    #[error("shape error: {0}")]
    Shape(String),
    #[error("singular system: {0}")]
    Singular(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}
