// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reconciler configuration loaded from JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use trellis_host_port::Priority;

/// Error type for config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error while reading a config file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed JSON.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Well-formed but unusable settings.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables of one root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Log defect signals such as a placement without a host parent.
    pub diagnostics: bool,
    /// Compute state eagerly at dispatch and skip renders that change nothing.
    pub eager_state: bool,
    /// Priority of the deferred passive-effect flush.
    pub passive_priority: Priority,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            diagnostics: true,
            eager_state: true,
            passive_priority: Priority::Normal,
        }
    }
}

impl ReconcilerConfig {
    /// Parses and validates a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Rejects settings the work loop cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.passive_priority == Priority::Immediate {
            return Err(ConfigError::Invalid(
                "passive_priority must not be immediate; passive effects never flush inside commit"
                    .into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = ReconcilerConfig::from_json_str("{}").unwrap();
        assert_eq!(config, ReconcilerConfig::default());
    }

    #[test]
    fn fields_override_defaults() {
        let config =
            ReconcilerConfig::from_json_str(r#"{"eager_state": false, "passive_priority": "low"}"#)
                .unwrap();
        assert!(!config.eager_state);
        assert!(config.diagnostics);
        assert_eq!(config.passive_priority, Priority::Low);
    }

    #[test]
    fn immediate_passive_priority_is_rejected() {
        let err = ReconcilerConfig::from_json_str(r#"{"passive_priority": "immediate"}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_json_is_a_serde_error() {
        let err = ReconcilerConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, ConfigError::Serde(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = ReconcilerConfig::from_json_file("/nonexistent/trellis.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
