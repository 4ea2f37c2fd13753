// Copyright (c) 2025-2026 brdigetrlol. All rights reserved.
// SPDX-License-Identifier: LicenseRef-Icarus-Proprietary
// See LICENSE in the repository root for full license terms.

//! Evaluation metrics over predicted/actual timeseries.
//!
//! All functions treat their inputs as flat sequences of values and panic
//! if the lengths disagree.

use nalgebra::DMatrix;

/// Mean squared error.
pub fn mse(predicted: &[f64], actual: &[f64]) -> f64 {
    assert_eq!(predicted.len(), actual.len());
    if actual.is_empty() {
        return 0.0;
    }
    predicted
        .iter()
        .zip(actual.iter())
        .map(|(&p, &a)| (p - a) * (p - a))
        .sum::<f64>()
        / actual.len() as f64
}

/// Root mean squared error.
pub fn rmse(predicted: &[f64], actual: &[f64]) -> f64 {
    mse(predicted, actual).sqrt()
}

/// Normalized Mean Squared Error: `MSE / variance(actual)`.
///
/// Lower is better. NMSE < 1 means the model beats predicting the mean.
pub fn nmse(predicted: &[f64], actual: &[f64]) -> f64 {
    assert_eq!(predicted.len(), actual.len());
    if actual.is_empty() {
        return 0.0;
    }
    let n = actual.len() as f64;
    let mean = actual.iter().sum::<f64>() / n;
    let variance = actual.iter().map(|&y| (y - mean) * (y - mean)).sum::<f64>() / n;
    if variance < 1e-24 {
        return 0.0;
    }
    mse(predicted, actual) / variance
}

/// Coefficient of determination, `1 - NMSE`.
pub fn rsquare(predicted: &[f64], actual: &[f64]) -> f64 {
    1.0 - nmse(predicted, actual)
}

/// NMSE between two timeseries matrices of equal shape.
pub fn nmse_series(predicted: &DMatrix<f64>, actual: &DMatrix<f64>) -> f64 {
    assert_eq!(predicted.shape(), actual.shape());
    nmse(predicted.as_slice(), actual.as_slice())
}
