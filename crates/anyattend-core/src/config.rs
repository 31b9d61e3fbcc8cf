//! Configuration resolution for the Anyattend backend.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Settings file (~/.config/anyattend/settings.json or an explicit path)
//! 3. Environment variables (`ANYATTEND_*`)
//! 4. CLI arguments (highest priority, applied by the binary)
//!
//! The resolved [`BackendConfig`] is immutable and is handed to each service
//! constructor; nothing reads configuration from global state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Minimum byte length for the JWT and command signing secrets.
pub const MIN_SECRET_LEN: usize = 16;

/// Complete backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// HMAC secret for access tokens.
    pub jwt_secret: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_days: i64,

    pub challenge_ttl_mins: i64,
    /// Return the raw verification code from `start_challenge`.
    /// Must stay off in production.
    pub challenge_debug: bool,

    pub pairing_ttl_mins: i64,
    /// How long an incoming connection request stays decidable.
    pub connection_request_ttl_mins: i64,
    /// Random bytes per device token before base64url encoding.
    pub device_token_bytes: usize,

    /// HMAC secret for command envelopes. Agents hold a copy.
    pub command_signing_secret: String,
    pub command_default_ttl_secs: i64,
    pub command_min_ttl_secs: i64,
    pub command_max_ttl_secs: i64,
    /// A dispatched but unacknowledged command is handed out again after
    /// this many seconds.
    pub command_redelivery_secs: i64,
    pub command_poll_limit: i64,

    pub default_poll_interval_secs: i64,
    pub min_poll_interval_secs: i64,
    pub max_poll_interval_secs: i64,
    pub default_service_name: String,

    pub ack_message_max_len: usize,
    pub fingerprint_max_len: usize,

    pub database_path: Option<PathBuf>,
    pub log_level: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            access_token_ttl_secs: 15 * 60,
            refresh_token_ttl_days: 30,
            challenge_ttl_mins: 10,
            challenge_debug: false,
            pairing_ttl_mins: 10,
            connection_request_ttl_mins: 30,
            device_token_bytes: 48,
            command_signing_secret: String::new(),
            command_default_ttl_secs: 300,
            command_min_ttl_secs: 30,
            command_max_ttl_secs: 3600,
            command_redelivery_secs: 60,
            command_poll_limit: 100,
            default_poll_interval_secs: 60,
            min_poll_interval_secs: 10,
            max_poll_interval_secs: 300,
            default_service_name: "AnyDesk".to_string(),
            ack_message_max_len: 400,
            fingerprint_max_len: 160,
            database_path: None,
            log_level: "info".to_string(),
        }
    }
}

impl BackendConfig {
    /// Build a config with both secrets set and everything else defaulted.
    pub fn with_secrets(jwt_secret: impl Into<String>, signing_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            command_signing_secret: signing_secret.into(),
            ..Self::default()
        }
    }

    pub const fn challenge_ttl_secs(&self) -> i64 {
        self.challenge_ttl_mins * 60
    }

    pub const fn pairing_ttl_secs(&self) -> i64 {
        self.pairing_ttl_mins * 60
    }

    pub const fn connection_request_ttl_secs(&self) -> i64 {
        self.connection_request_ttl_mins * 60
    }

    pub const fn refresh_token_ttl_secs(&self) -> i64 {
        self.refresh_token_ttl_days * 24 * 60 * 60
    }

    /// Reject configurations the services cannot run safely with.
    pub fn validate(&self) -> Result<()> {
        if self.jwt_secret.len() < MIN_SECRET_LEN {
            return Err(Error::Config(format!(
                "jwt_secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        if self.command_signing_secret.len() < MIN_SECRET_LEN {
            return Err(Error::Config(format!(
                "command_signing_secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        let positive = [
            ("access_token_ttl_secs", self.access_token_ttl_secs),
            ("refresh_token_ttl_days", self.refresh_token_ttl_days),
            ("challenge_ttl_mins", self.challenge_ttl_mins),
            ("pairing_ttl_mins", self.pairing_ttl_mins),
            ("connection_request_ttl_mins", self.connection_request_ttl_mins),
            ("command_poll_limit", self.command_poll_limit),
        ];
        for (name, value) in positive {
            if value <= 0 {
                return Err(Error::Config(format!("{name} must be positive")));
            }
        }
        if self.command_redelivery_secs < 0 {
            return Err(Error::Config(
                "command_redelivery_secs must not be negative".to_string(),
            ));
        }
        if !(self.command_min_ttl_secs..=self.command_max_ttl_secs)
            .contains(&self.command_default_ttl_secs)
        {
            return Err(Error::Config(
                "command_default_ttl_secs is outside the allowed command TTL range".to_string(),
            ));
        }
        if !(self.min_poll_interval_secs..=self.max_poll_interval_secs)
            .contains(&self.default_poll_interval_secs)
        {
            return Err(Error::Config(
                "default_poll_interval_secs is outside the allowed poll interval range"
                    .to_string(),
            ));
        }
        if self.device_token_bytes < 16 {
            return Err(Error::Config(
                "device_token_bytes must be at least 16".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
///
/// `explicit_path` replaces the global settings file when given; a missing
/// explicit file is an error, a missing global file is not.
pub fn load_config(explicit_path: Option<&Path>) -> Result<BackendConfig> {
    let mut config = match explicit_path {
        Some(path) => load_config_file(path)?,
        None => match global_config_path() {
            Some(global_path) if global_path.exists() => load_config_file(&global_path)?,
            _ => BackendConfig::default(),
        },
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Get the global settings file path.
pub fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("settings.json"))
}

/// Get the default database path for the backend.
pub fn database_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("backend.db"))
}

fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".anyattend"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/anyattend"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("anyattend"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<BackendConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Interpret the usual truthy/falsy spellings of an environment flag.
fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn apply_env_overrides(config: &mut BackendConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(val) = env("ANYATTEND_JWT_SECRET") {
        config.jwt_secret = val;
    }
    if let Some(val) = env("ANYATTEND_COMMAND_SIGNING_SECRET") {
        config.command_signing_secret = val;
    }
    if let Some(val) = env("ANYATTEND_CHALLENGE_DEBUG") {
        if let Some(flag) = parse_flag(&val) {
            config.challenge_debug = flag;
        }
    }
    if let Some(val) = env("ANYATTEND_CHALLENGE_TTL_MIN") {
        if let Ok(n) = val.parse() {
            config.challenge_ttl_mins = n;
        }
    }
    if let Some(val) = env("ANYATTEND_PAIRING_TTL_MIN") {
        if let Ok(n) = val.parse() {
            config.pairing_ttl_mins = n;
        }
    }
    if let Some(val) = env("ANYATTEND_CONNECTION_REQUEST_TTL_MIN") {
        if let Ok(n) = val.parse() {
            config.connection_request_ttl_mins = n;
        }
    }
    if let Some(val) = env("ANYATTEND_REFRESH_TOKEN_TTL_DAYS") {
        if let Ok(n) = val.parse() {
            config.refresh_token_ttl_days = n;
        }
    }
    if let Some(val) = env("ANYATTEND_DEVICE_TOKEN_BYTES") {
        if let Ok(n) = val.parse() {
            config.device_token_bytes = n;
        }
    }
    if let Some(val) = env("ANYATTEND_DATABASE_PATH") {
        config.database_path = Some(PathBuf::from(val));
    }
    if let Some(val) = env("ANYATTEND_LOG_LEVEL") {
        config.log_level = val;
    }
}
