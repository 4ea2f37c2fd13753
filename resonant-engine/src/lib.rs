// Copyright (c) 2025-2026 brdigetrlol. All rights reserved.
// SPDX-License-Identifier: LicenseRef-Icarus-Proprietary
// See LICENSE in the repository root for full license terms.

pub mod config;
pub mod error;
pub mod executor;
pub mod feedback;
pub mod model;
pub mod node;
pub mod nodes;
pub mod persistence;
pub mod training;

pub use config::{EsnConfig, OfflineConfig, OnlineConfig, OnlineRule, OnlineTrainConfig, ReservoirConfig, RidgeConfig};
pub use error::{EngineError, Result};
pub use executor::{Executor, RunMode};
pub use feedback::FeedbackRegistry;
pub use model::Model;
pub use node::{concat_columns, concat_vectors, Node, NodeExt, OfflineFit, OnlineFit, ParamArray, ParamMap, StateGuard};
pub use nodes::{Input, OnlineReadout, Output, Reservoir, Ridge};
pub use persistence::ModelParams;
pub use training::{select_ridge, FitReport, FitSummary, OfflineTrainer, OnlineTrainer, Targets};

pub use resonant_math::{Activation, Precision, WeightDistribution};
