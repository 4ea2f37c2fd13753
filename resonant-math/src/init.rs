// Copyright (c) 2025-2026 brdigetrlol. All rights reserved.
// SPDX-License-Identifier: LicenseRef-Icarus-Proprietary
// See LICENSE in the repository root for full license terms.

//! Seeded random weight generators for reservoirs.
//!
//! Matrices are dense `DMatrix<f64>` with a target fraction of non-zero
//! entries. The recurrent matrix is rescaled after generation so that its
//! largest-magnitude eigenvalue matches the requested spectral radius:
//!
//! ```text
//! W ← W · (ρ_target / ρ(W))
//! ```

use nalgebra::DMatrix;
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::MathError;

/// Below this, a matrix is treated as having no spectral content to rescale.
const NEGLIGIBLE_RADIUS: f64 = 1e-12;

/// Distribution of the non-zero entries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WeightDistribution {
    /// Uniform on `[low, high)`.
    Uniform { low: f64, high: f64 },
    /// Gaussian with the given mean and standard deviation.
    Normal { mean: f64, std: f64 },
    /// `±value` with equal probability.
    Bernoulli { value: f64 },
}

impl Default for WeightDistribution {
    fn default() -> Self {
        Self::Uniform {
            low: -1.0,
            high: 1.0,
        }
    }
}

/// Draw a `rows × cols` matrix where each entry is non-zero with
/// probability `connectivity` and drawn from `dist` when it is.
pub fn random_matrix<R: Rng + ?Sized>(
    rows: usize,
    cols: usize,
    connectivity: f64,
    dist: WeightDistribution,
    rng: &mut R,
) -> Result<DMatrix<f64>, MathError> {
    if !(connectivity > 0.0 && connectivity <= 1.0) {
        return Err(MathError::InvalidParameter(format!(
            "connectivity must be in (0, 1], got {connectivity}"
        )));
    }

    let mut sampler = EntrySampler::new(dist)?;
    let mut m = DMatrix::<f64>::zeros(rows, cols);
    for i in 0..rows {
        for j in 0..cols {
            if connectivity >= 1.0 || rng.gen::<f64>() < connectivity {
                m[(i, j)] = sampler.sample(rng);
            }
        }
    }
    Ok(m)
}

/// Largest eigenvalue magnitude of a square matrix.
pub fn spectral_radius(m: &DMatrix<f64>) -> Result<f64, MathError> {
    if !m.is_square() {
        return Err(MathError::Shape(format!(
            "spectral radius needs a square matrix, got {}×{}",
            m.nrows(),
            m.ncols()
        )));
    }
    if m.is_empty() {
        return Ok(0.0);
    }
    let radius = m
        .complex_eigenvalues()
        .iter()
        .map(|c| c.norm())
        .fold(0.0f64, f64::max);
    Ok(radius)
}

/// Rescale `m` in place to the target spectral radius.
///
/// Returns the radius before rescaling. A matrix whose radius is
/// numerically zero (e.g. nilpotent sparse draws) is left untouched.
pub fn scale_to_spectral_radius(m: &mut DMatrix<f64>, target: f64) -> Result<f64, MathError> {
    if target < 0.0 || !target.is_finite() {
        return Err(MathError::InvalidParameter(format!(
            "spectral radius must be a finite non-negative number, got {target}"
        )));
    }
    let current = spectral_radius(m)?;
    if current <= NEGLIGIBLE_RADIUS {
        if target > 0.0 {
            warn!(
                current,
                target, "recurrent matrix has negligible spectral radius; not rescaled"
            );
        }
        return Ok(current);
    }
    *m *= target / current;
    Ok(current)
}

enum EntrySampler {
    Uniform(Uniform<f64>),
    Normal(Normal<f64>),
    Bernoulli(f64),
}

impl EntrySampler {
    fn new(dist: WeightDistribution) -> Result<Self, MathError> {
        match dist {
            WeightDistribution::Uniform { low, high } => {
                if !(low < high) {
                    return Err(MathError::InvalidParameter(format!(
                        "uniform bounds must satisfy low < high, got [{low}, {high})"
                    )));
                }
                Ok(Self::Uniform(Uniform::new(low, high)))
            }
            WeightDistribution::Normal { mean, std } => Normal::new(mean, std)
                .map(Self::Normal)
                .map_err(|e| MathError::InvalidParameter(format!("normal distribution: {e}"))),
            WeightDistribution::Bernoulli { value } => Ok(Self::Bernoulli(value)),
        }
    }

    fn sample<R: Rng + ?Sized>(&mut self, rng: &mut R) -> f64 {
        match self {
            Self::Uniform(u) => u.sample(rng),
            Self::Normal(n) => n.sample(rng),
            Self::Bernoulli(v) => {
                if rng.gen::<bool>() {
                    *v
                } else {
                    -*v
                }
            }
        }
    }
}
