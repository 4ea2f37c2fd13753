// Copyright (c) 2025-2026 brdigetrlol. All rights reserved.
// SPDX-License-Identifier: LicenseRef-Icarus-Proprietary
// See LICENSE in the repository root for full license terms.

//! Configuration for nodes, trainers and complete Echo State Networks.
//!
//! Every hyperparameter lives in a typed struct with a `Default`; `EsnConfig`
//! bundles them and can be loaded from JSON.

use resonant_math::{Activation, Precision, WeightDistribution};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::executor::RunMode;

/// Hyperparameters of a leaky-integrator reservoir.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservoirConfig {
    /// Number of reservoir units (state dimension)
    pub units: usize,
    /// Leak rate in (0, 1]; 1.0 is the non-leaky update
    pub leak_rate: f64,
    /// Target spectral radius of the recurrent matrix
    pub spectral_radius: f64,
    /// Fraction of non-zero recurrent weights
    pub connectivity: f64,
    /// Fraction of non-zero input weights
    pub input_connectivity: f64,
    /// Fraction of non-zero feedback weights
    pub feedback_connectivity: f64,
    /// Scale applied to the input weight matrix
    pub input_scaling: f64,
    /// Scale applied to the bias vector (0 disables the bias)
    pub bias_scaling: f64,
    /// Scale applied to the feedback weight matrix
    pub feedback_scaling: f64,
    /// Elementwise non-linearity
    pub activation: Activation,
    /// Distribution of recurrent weights (before spectral rescaling)
    pub distribution: WeightDistribution,
    /// Distribution of input, bias and feedback weights (before scaling)
    pub input_distribution: WeightDistribution,
    /// Seed for every generated matrix
    pub seed: u64,
    /// Fixed input dimension; inferred from the first sample when `None`
    pub input_dim: Option<usize>,
    pub precision: Precision,
}

impl Default for ReservoirConfig {
    fn default() -> Self {
        Self {
            units: 100,
            leak_rate: 0.3,
            spectral_radius: 0.9,
            connectivity: 0.1,
            input_connectivity: 0.1,
            feedback_connectivity: 0.1,
            input_scaling: 1.0,
            bias_scaling: 1.0,
            feedback_scaling: 1.0,
            activation: Activation::Tanh,
            distribution: WeightDistribution::Normal { mean: 0.0, std: 1.0 },
            input_distribution: WeightDistribution::Uniform {
                low: -1.0,
                high: 1.0,
            },
            seed: 42,
            input_dim: None,
            precision: Precision::F64,
        }
    }
}

impl ReservoirConfig {
    pub fn validate(&self) -> Result<()> {
        if self.units == 0 {
            return Err(EngineError::InvalidConfig("reservoir needs at least one unit".into()));
        }
        if !(self.leak_rate > 0.0 && self.leak_rate <= 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "leak_rate must be in (0, 1], got {}",
                self.leak_rate
            )));
        }
        for (what, c) in [
            ("connectivity", self.connectivity),
            ("input_connectivity", self.input_connectivity),
            ("feedback_connectivity", self.feedback_connectivity),
        ] {
            if !(c > 0.0 && c <= 1.0) {
                return Err(EngineError::InvalidConfig(format!(
                    "{what} must be in (0, 1], got {c}"
                )));
            }
        }
        if !(self.spectral_radius >= 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "spectral_radius must be non-negative, got {}",
                self.spectral_radius
            )));
        }
        Ok(())
    }
}

/// Hyperparameters of the offline ridge readout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RidgeConfig {
    /// Regularization coefficient (λ ≥ 0); 0 is ordinary least squares
    pub ridge: f64,
    /// Augment states with a constant column so a bias is learned
    pub input_bias: bool,
    /// Fixed output dimension; inferred from the targets when `None`
    pub output_dim: Option<usize>,
    /// Fixed input dimension; inferred from the first sample when `None`
    pub input_dim: Option<usize>,
    /// Select `ridge` by contiguous k-fold cross-validation when set
    pub cv_folds: Option<usize>,
    pub precision: Precision,
}

impl Default for RidgeConfig {
    fn default() -> Self {
        Self {
            ridge: 1e-6,
            input_bias: true,
            output_dim: None,
            input_dim: None,
            cv_folds: None,
            precision: Precision::F64,
        }
    }
}

impl RidgeConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.ridge >= 0.0) || !self.ridge.is_finite() {
            return Err(EngineError::InvalidConfig(format!(
                "ridge must be a finite non-negative number, got {}",
                self.ridge
            )));
        }
        if let Some(k) = self.cv_folds {
            if k < 2 {
                return Err(EngineError::InvalidConfig(format!(
                    "cv_folds must be at least 2, got {k}"
                )));
            }
        }
        Ok(())
    }
}

/// Streaming update rule of an online readout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "lowercase")]
pub enum OnlineRule {
    /// Recursive least squares with exponential forgetting.
    Rls {
        /// Forgetting factor in (0, 1]; 1.0 never forgets
        forgetting: f64,
        /// Initial inverse covariance is `I / ridge`
        ridge: f64,
        /// Re-condition the covariance when its trace exceeds this
        max_covariance_trace: f64,
    },
    /// Least mean squares (stochastic gradient) update.
    Lms { learning_rate: f64 },
}

impl Default for OnlineRule {
    fn default() -> Self {
        Self::Rls {
            forgetting: 1.0,
            ridge: 1e-2,
            max_covariance_trace: 1e12,
        }
    }
}

/// Hyperparameters of an online readout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnlineConfig {
    pub rule: OnlineRule,
    /// Learn a bias through a constant input
    pub input_bias: bool,
    pub output_dim: Option<usize>,
    pub input_dim: Option<usize>,
    pub precision: Precision,
}

impl Default for OnlineConfig {
    fn default() -> Self {
        Self {
            rule: OnlineRule::default(),
            input_bias: true,
            output_dim: None,
            input_dim: None,
            precision: Precision::F64,
        }
    }
}

impl OnlineConfig {
    pub fn validate(&self) -> Result<()> {
        match self.rule {
            OnlineRule::Rls {
                forgetting,
                ridge,
                max_covariance_trace,
            } => {
                if !(forgetting > 0.0 && forgetting <= 1.0) {
                    return Err(EngineError::InvalidConfig(format!(
                        "forgetting factor must be in (0, 1], got {forgetting}"
                    )));
                }
                if !(ridge > 0.0) {
                    return Err(EngineError::InvalidConfig(format!(
                        "RLS ridge must be positive, got {ridge}"
                    )));
                }
                if !(max_covariance_trace > 0.0) {
                    return Err(EngineError::InvalidConfig(
                        "max_covariance_trace must be positive".into(),
                    ));
                }
            }
            OnlineRule::Lms { learning_rate } => {
                if !(learning_rate > 0.0) {
                    return Err(EngineError::InvalidConfig(format!(
                        "learning_rate must be positive, got {learning_rate}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Offline training protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Timesteps discarded at the start of every sequence
    pub washout: usize,
    /// Keep the collected state matrices in the fit report
    pub retain_states: bool,
    /// Whether state carries over between training sequences
    pub mode: RunMode,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            washout: 0,
            retain_states: false,
            mode: RunMode::Stateful,
        }
    }
}

/// Online training protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnlineTrainConfig {
    /// Feed targets instead of predictions to downstream nodes and feedback
    pub force_teachers: bool,
}

impl Default for OnlineTrainConfig {
    fn default() -> Self {
        Self {
            force_teachers: true,
        }
    }
}

/// A complete Input → Reservoir → Ridge network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EsnConfig {
    pub reservoir: ReservoirConfig,
    pub readout: RidgeConfig,
    pub training: OfflineConfig,
    /// Feed the readout's previous output back into the reservoir
    pub feedback: bool,
}

impl Default for EsnConfig {
    fn default() -> Self {
        Self {
            reservoir: ReservoirConfig::default(),
            readout: RidgeConfig::default(),
            training: OfflineConfig::default(),
            feedback: false,
        }
    }
}

impl EsnConfig {
    /// Small reservoir suited to quick experiments and tests.
    pub fn minimal() -> Self {
        Self {
            reservoir: ReservoirConfig {
                units: 50,
                leak_rate: 0.5,
                connectivity: 0.2,
                input_connectivity: 0.5,
                ..ReservoirConfig::default()
            },
            readout: RidgeConfig {
                ridge: 1e-6,
                ..RidgeConfig::default()
            },
            training: OfflineConfig {
                washout: 10,
                ..OfflineConfig::default()
            },
            feedback: false,
        }
    }

    /// Autonomous generator: readout output is fed back into the reservoir.
    pub fn generative() -> Self {
        Self {
            reservoir: ReservoirConfig {
                units: 200,
                leak_rate: 0.3,
                spectral_radius: 1.1,
                connectivity: 0.05,
                input_connectivity: 0.2,
                feedback_connectivity: 0.2,
                feedback_scaling: 0.5,
                ..ReservoirConfig::default()
            },
            readout: RidgeConfig {
                ridge: 1e-7,
                ..RidgeConfig::default()
            },
            training: OfflineConfig {
                washout: 100,
                ..OfflineConfig::default()
            },
            feedback: true,
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.reservoir.validate()?;
        self.readout.validate()?;
        if self.reservoir.precision != self.readout.precision {
            return Err(EngineError::InvalidConfig(format!(
                "reservoir uses {} but readout uses {}",
                self.reservoir.precision, self.readout.precision
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(EsnConfig::default().validate().is_ok());
        assert!(EsnConfig::minimal().validate().is_ok());
        assert!(EsnConfig::generative().validate().is_ok());
        assert!(OnlineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_leak_rate_bounds() {
        let mut c = ReservoirConfig::default();
        c.leak_rate = 0.0;
        assert!(c.validate().is_err());
        c.leak_rate = 1.0;
        assert!(c.validate().is_ok());
        c.leak_rate = 1.01;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_negative_ridge_rejected() {
        let c = RidgeConfig {
            ridge: -1e-3,
            ..RidgeConfig::default()
        };
        assert!(matches!(c.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_forgetting_bounds() {
        let c = OnlineConfig {
            rule: OnlineRule::Rls {
                forgetting: 1.5,
                ridge: 1.0,
                max_covariance_trace: 1e6,
            },
            ..OnlineConfig::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let config = EsnConfig::generative();
        let text = config.to_json().unwrap();
        let back = EsnConfig::from_json(&text).unwrap();
        assert_eq!(back.reservoir.units, 200);
        assert!(back.feedback);
        assert_eq!(back.training.washout, 100);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EsnConfig::from_json(
            r#"{ "reservoir": { "units": 12, "activation": "relu" }, "readout": { "ridge": 0.5 } }"#,
        )
        .unwrap();
        assert_eq!(config.reservoir.units, 12);
        assert_eq!(config.reservoir.activation.name(), "relu");
        assert_eq!(config.readout.ridge, 0.5);
        assert!(config.readout.input_bias);
    }

    #[test]
    fn test_mixed_precision_rejected() {
        let mut config = EsnConfig::minimal();
        config.readout.precision = Precision::F32;
        assert!(config.validate().is_err());
    }
}
