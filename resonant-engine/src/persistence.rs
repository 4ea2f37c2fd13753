// Copyright (c) 2025-2026 brdigetrlol. All rights reserved.
// SPDX-License-Identifier: LicenseRef-Icarus-Proprietary
// See LICENSE in the repository root for full license terms.

//! JSON snapshots of model parameters.
//!
//! Only parameters are stored (weights, biases, covariances); the graph
//! itself is rebuilt in code and the snapshot loaded into it by node name.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::node::ParamMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Name of the model the parameters were taken from
    pub model: String,
    /// node name → parameter name → array
    pub nodes: BTreeMap<String, ParamMap>,
}

impl ModelParams {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?)?;
        info!(model = %self.model, path = %path.display(), nodes = self.nodes.len(), "saved parameters");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let params = Self::from_json(&fs::read_to_string(path)?)?;
        info!(model = %params.model, path = %path.display(), "loaded parameters");
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::node::ParamArray;

    fn sample() -> ModelParams {
        let mut node = ParamMap::new();
        node.insert(
            "Wout".into(),
            ParamArray {
                rows: 1,
                cols: 2,
                data: vec![0.5, -0.25],
            },
        );
        ModelParams {
            model: "esn".into(),
            nodes: BTreeMap::from([("readout".to_string(), node)]),
        }
    }

    #[test]
    fn test_json_round_trip() {
        let params = sample();
        let back = ModelParams::from_json(&params.to_json().unwrap()).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("resonant-params-{}.json", std::process::id()));
        let params = sample();
        params.save(&path).unwrap();
        let back = ModelParams::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(back, params);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let r = ModelParams::load("/nonexistent/resonant/params.json");
        assert!(matches!(r, Err(EngineError::Io(_))));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            ModelParams::from_json("{ not json"),
            Err(EngineError::Serde(_))
        ));
    }
}
