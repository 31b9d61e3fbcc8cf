//! Agent configuration.
//!
//! Written by the installer after pairing; the device token itself is held
//! separately by the host's credential store.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Seconds between poll cycles unless configured otherwise.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const MIN_POLL_INTERVAL_SECS: u64 = 10;
pub const MAX_POLL_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub device_id: String,
    pub poll_interval_secs: u64,
    pub service_name: String,
    pub webhook_fallback_url: Option<String>,
    /// Shared with the backend; commands are rejected without it.
    pub command_signing_secret: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            service_name: "AnyDesk".to_string(),
            webhook_fallback_url: None,
            command_signing_secret: String::new(),
        }
    }
}

impl AgentConfig {
    /// Read a JSON config file and validate it.
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            AgentError::Config(format!("Failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.device_id.trim().is_empty() {
            return Err(AgentError::Config("device_id is required".to_string()));
        }
        if self.command_signing_secret.is_empty() {
            return Err(AgentError::Config(
                "command_signing_secret is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Poll interval clamped to the range the backend accepts.
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(
            self.poll_interval_secs
                .clamp(MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS),
        )
    }
}
