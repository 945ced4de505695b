//! Procurement configuration
//!
//! Policy knobs that are decided per deployment rather than hard-coded.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Who may trigger `release_payment` for an approved milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutPolicy {
    /// Anyone; the funds only ever go to the tender's winner.
    #[default]
    Anyone,
    OwnerOnly,
    OwnerOrWinner,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Procurement engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcurementConfig {
    /// Caller restriction on payment release
    pub payout_policy: PayoutPolicy,
    /// Upper bound on milestones per tender
    pub max_milestones: usize,
}

impl Default for ProcurementConfig {
    fn default() -> Self {
        Self {
            payout_policy: PayoutPolicy::Anyone,
            max_milestones: 64,
        }
    }
}

impl ProcurementConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_milestones == 0 {
            return Err(ConfigError::Invalid(
                "max_milestones must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
