// Copyright (c) 2025-2026 brdigetrlol. All rights reserved.
// SPDX-License-Identifier: LicenseRef-Icarus-Proprietary
// See LICENSE in the repository root for full license terms.

//! Regularized normal-equation solver.
//!
//! Given a design matrix `X` (N × D) and targets `Y` (N × K):
//!
//! `W = (XᵀX + λI)⁻¹ · XᵀY`
//!
//! solved without forming an inverse. The Gram system is factored by
//! Cholesky; when that fails (λ = 0 with a rank-deficient `X`) the solve
//! falls back to an SVD least-squares solution with a relative singular
//! value cutoff. Only a numerically zero Gram matrix is reported as
//! singular.

use nalgebra::DMatrix;
use tracing::warn;

use crate::MathError;

/// Relative cutoff for singular values in the SVD fallback.
const SVD_RELATIVE_TOLERANCE: f64 = 1e-12;

/// Which factorization produced a solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveMethod {
    Cholesky,
    Svd,
}

/// Result of a ridge solve: `weights` is `D × K`.
#[derive(Debug, Clone)]
pub struct RidgeSolution {
    pub weights: DMatrix<f64>,
    pub method: SolveMethod,
}

/// Solve ridge regression from raw design and target matrices.
pub fn solve_ridge(
    x: &DMatrix<f64>,
    y: &DMatrix<f64>,
    ridge: f64,
) -> Result<RidgeSolution, MathError> {
    if x.nrows() != y.nrows() {
        return Err(MathError::Shape(format!(
            "design matrix has {} rows but targets have {}",
            x.nrows(),
            y.nrows()
        )));
    }
    if x.nrows() == 0 {
        return Err(MathError::Shape("no samples to fit".into()));
    }
    let xtx = x.tr_mul(x);
    let xty = x.tr_mul(y);
    solve_normal_equations(&xtx, &xty, ridge)
}

/// Solve `(G + λI) · W = B` where `G = XᵀX` is symmetric positive semi-definite.
pub fn solve_normal_equations(
    gram: &DMatrix<f64>,
    rhs: &DMatrix<f64>,
    ridge: f64,
) -> Result<RidgeSolution, MathError> {
    if !(ridge >= 0.0) || !ridge.is_finite() {
        return Err(MathError::InvalidParameter(format!(
            "ridge must be a finite non-negative number, got {ridge}"
        )));
    }
    let d = gram.nrows();
    if !gram.is_square() || rhs.nrows() != d {
        return Err(MathError::Shape(format!(
            "gram matrix is {}×{}, right-hand side is {}×{}",
            gram.nrows(),
            gram.ncols(),
            rhs.nrows(),
            rhs.ncols()
        )));
    }

    let mut a = gram.clone();
    for i in 0..d {
        a[(i, i)] += ridge;
    }

    let scale = a.amax();
    if !scale.is_finite() {
        return Err(MathError::Singular("gram matrix contains non-finite values".into()));
    }
    if scale == 0.0 {
        return Err(MathError::Singular(
            "regularized gram matrix is zero (all-zero states with ridge = 0)".into(),
        ));
    }

    if let Some(w) = cholesky_solve(&a, rhs) {
        if w.iter().all(|v| v.is_finite()) {
            return Ok(RidgeSolution {
                weights: w,
                method: SolveMethod::Cholesky,
            });
        }
    }

    warn!(ridge, dim = d, "Cholesky failed on gram matrix, falling back to SVD solve");
    let svd = a.svd(true, true);
    let max_sv = svd.singular_values.amax();
    if max_sv == 0.0 {
        return Err(MathError::Singular("gram matrix has no non-zero singular value".into()));
    }
    let w = svd
        .solve(rhs, max_sv * SVD_RELATIVE_TOLERANCE)
        .map_err(|e| MathError::Singular(format!("SVD solve failed: {e}")))?;
    if w.iter().any(|v| !v.is_finite()) {
        return Err(MathError::Singular("SVD solve produced non-finite weights".into()));
    }
    Ok(RidgeSolution {
        weights: w,
        method: SolveMethod::Svd,
    })
}

/// Solve `A·X = B` via Cholesky decomposition.
///
/// `A` is `d × d` symmetric positive definite, `B` is `d × k`.
/// Returns `None` if a pivot is not clearly positive.
fn cholesky_solve(a: &DMatrix<f64>, b: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let d = a.nrows();
    // Pivots this small relative to the diagonal are treated as rank loss
    let tiny = a.diagonal().amax() * f64::EPSILON * d as f64;

    let chol = a.clone().cholesky()?;
    if !chol.l_dirty().diagonal().iter().all(|l| l * l > tiny) {
        return None;
    }
    Some(chol.solve(b))
}
