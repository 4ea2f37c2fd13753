// Copyright (c) 2025-2026 brdigetrlol. All rights reserved.
// SPDX-License-Identifier: LicenseRef-Icarus-Proprietary
// See LICENSE in the repository root for full license terms.

//! Error taxonomy for node construction, execution and training.
//!
//! Structural errors (`Cycle`, `UnresolvedFeedback`, `DuplicateNode`,
//! `PrecisionMismatch`) are raised while a model is being built, so a
//! constructed model is always structurally valid. Numerical errors are
//! raised to the caller of `fit` and never replaced with fallback values.

use resonant_math::{MathError, Precision};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("shape error: {0}")]
    Shape(String),

    #[error(
        "dimension mismatch: '{producer}' emits {produced} values but '{consumer}' expects {expected}"
    )]
    DimensionMismatch {
        producer: String,
        consumer: String,
        produced: usize,
        expected: usize,
    },

    #[error("node '{0}' is not initialized")]
    NotInitialized(String),

    #[error("linking '{from}' -> '{to}' would create a forward cycle")]
    Cycle { from: String, to: String },

    #[error("feedback references unknown node '{0}'")]
    UnresolvedFeedback(String),

    #[error("singular system while fitting '{node}': {reason}")]
    SingularMatrix { node: String, reason: String },

    #[error("precision mismatch: node '{node}' uses {found} but the model uses {expected}")]
    PrecisionMismatch {
        node: String,
        expected: Precision,
        found: Precision,
    },

    #[error("readout '{0}' used before it was fitted")]
    UseBeforeFit(String),

    #[error("duplicate node name '{0}'")]
    DuplicateNode(String),

    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("node '{0}' is not trainable")]
    NotTrainable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl EngineError {
    /// Attach the owning node's name to a numerical failure.
    pub fn from_math(node: &str, err: MathError) -> Self {
        match err {
            MathError::Shape(msg) => Self::Shape(format!("{node}: {msg}")),
            MathError::Singular(reason) => Self::SingularMatrix {
                node: node.to_string(),
                reason,
            },
            MathError::InvalidParameter(msg) => Self::InvalidConfig(format!("{node}: {msg}")),
        }
    }
}
