//! Data models for Anyattend backend storage.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Role an identity can act in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Connectee,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Connectee => "connectee",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "connectee" => Ok(Self::Connectee),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Operational status reported by (or inferred for) a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Degraded,
    Critical,
}

impl DeviceStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Degraded => "degraded",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for DeviceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            "degraded" => Ok(Self::Degraded),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown device status: {other}")),
        }
    }
}

/// Command lifecycle state.
///
/// `Pending -> Dispatched -> {AckedSuccess | AckedFailed}`, with `Expired`
/// reachable from either non-terminal state once `expires_at` has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Dispatched,
    AckedSuccess,
    AckedFailed,
    Expired,
}

impl CommandStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatched => "dispatched",
            Self::AckedSuccess => "acked_success",
            Self::AckedFailed => "acked_failed",
            Self::Expired => "expired",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::AckedSuccess | Self::AckedFailed | Self::Expired)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "dispatched" => Ok(Self::Dispatched),
            "acked_success" => Ok(Self::AckedSuccess),
            "acked_failed" => Ok(Self::AckedFailed),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown command status: {other}")),
        }
    }
}

/// State of an incoming connection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Declined,
    Expired,
}

impl RequestStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Declined => "declined",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "declined" => Ok(Self::Declined),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown request status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Identity {
    pub id: String,
    pub canonical_id: String,
    pub display_id: String,
    pub verified_at: Option<i64>,
    pub verification_method: Option<String>,
    pub active_role: String,
    pub legacy_admin_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LegacyAdmin {
    pub id: String,
    pub email: String,
    pub is_active: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OwnershipChallenge {
    pub id: String,
    pub identity_id: String,
    pub device_id: Option<String>,
    pub code_hash: String,
    pub expires_at: i64,
    pub consumed_at: Option<i64>,
    pub attempts: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PairingSession {
    pub id: String,
    pub identity_id: String,
    pub device_label: String,
    pub code_hash: String,
    pub expires_at: i64,
    pub used_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub id: String,
    pub owner_identity_id: String,
    pub owner_admin_id: Option<String>,
    pub label: String,
    pub host: Option<String>,
    pub status: String,
    pub last_seen: Option<i64>,
    pub poll_interval_secs: i64,
    pub service_name: String,
    pub webhook_fallback_url: Option<String>,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub paired_at: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Command {
    pub id: String,
    pub seq: i64,
    pub device_id: String,
    pub command_type: String,
    /// JSON-encoded payload.
    pub payload: String,
    pub nonce: String,
    pub signature: String,
    pub status: String,
    pub issued_by: String,
    pub issued_at: i64,
    pub expires_at: i64,
    pub dispatched_at: Option<i64>,
    pub acked_at: Option<i64>,
    pub ack_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AdminSession {
    pub id: String,
    pub identity_id: String,
    pub token_hash: String,
    pub expires_at: i64,
    pub fingerprint: Option<String>,
    pub revoked_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeviceEvent {
    pub id: i64,
    pub device_id: String,
    pub event_type: String,
    /// JSON-encoded event body.
    pub payload: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WhitelistEntry {
    pub id: String,
    pub owner_identity_id: String,
    pub requester_canonical_id: String,
    pub requester_display_id: String,
    pub label: Option<String>,
    pub status: String,
    pub created_by_identity_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConnectionRequest {
    pub id: String,
    pub owner_identity_id: String,
    pub requester_canonical_id: String,
    pub requester_display_id: String,
    pub requester_label: Option<String>,
    pub note: Option<String>,
    pub status: String,
    pub requested_at: i64,
    pub expires_at: i64,
    pub decided_at: Option<i64>,
    pub decided_by_identity_id: Option<String>,
    pub decision_note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AclSyncEvent {
    pub id: String,
    pub owner_identity_id: String,
    pub requested_by_identity_id: String,
    /// JSON snapshot of the active whitelist.
    pub request_payload: String,
    pub result_status: String,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}
