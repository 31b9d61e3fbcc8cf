//! Command envelope wire shape shared by the backend and the agent.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::payload::Payload;

/// The closed set of remote actions an agent understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    RunValidation,
    RestartAnydeskService,
    LockRemote,
    UnlockRemote,
    RefreshStatus,
}

impl CommandType {
    pub const ALL: [Self; 5] = [
        Self::RunValidation,
        Self::RestartAnydeskService,
        Self::LockRemote,
        Self::UnlockRemote,
        Self::RefreshStatus,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RunValidation => "RUN_VALIDATION",
            Self::RestartAnydeskService => "RESTART_ANYDESK_SERVICE",
            Self::LockRemote => "LOCK_REMOTE",
            Self::UnlockRemote => "UNLOCK_REMOTE",
            Self::RefreshStatus => "REFRESH_STATUS",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::UnknownCommandType(s.to_string()))
    }
}

/// Outcome an agent reports for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Success,
    Failed,
}

impl AckStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for AckStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(Error::UnknownAckStatus(other.to_string())),
        }
    }
}

/// A signed, time-bounded instruction as delivered to an agent.
///
/// `device_id` is not carried on the wire: the agent supplies its own id when
/// verifying, so an envelope lifted from another device never verifies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    pub payload: Payload,
    pub nonce: String,
    /// RFC 3339 UTC instant.
    pub expires_at: String,
    /// Lowercase hex HMAC-SHA256.
    pub signature: String,
}
