//! Signed command issuance, dispatch, and acknowledgement.
//!
//! `pending -> dispatched -> {acked_success | acked_failed}`, with `expired`
//! reachable from either non-terminal state. Expiry is applied lazily: an
//! expired command is never dispatched, and a late acknowledgement stores
//! `expired` instead of the reported outcome.

use std::sync::Arc;

use anyattend_core::db::unix_timestamp;
use anyattend_core::payload::parse_payload;
use anyattend_core::time::{format_timestamp, parse_timestamp};
use anyattend_core::{AckStatus, BackendConfig, CommandEnvelope, CommandType, Payload};
use anyattend_crypto::{CommandSigner, SignedFields, create_nonce};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::auth::AdminPrincipal;
use crate::devices::directory::owned_device;
use crate::error::{Result, ServiceError};
use crate::events::{DeviceEventType, EventLog, OwnerNotification};
use crate::storage::{BackendDatabase, Command, CommandStatus, Device, NewCommand};
use crate::telemetry::{ProtocolCounter, record};

/// A freshly issued command as returned to the admin.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedCommand {
    pub device_id: String,
    #[serde(flatten)]
    pub envelope: CommandEnvelope,
}

/// Status as observed at `now`: a non-terminal command past its expiry is
/// reported as `Expired` even if the row has not been updated yet.
pub fn effective_status(command: &Command, now: i64) -> Result<CommandStatus> {
    let stored: CommandStatus = command.status.parse().map_err(ServiceError::Internal)?;
    if !stored.is_terminal() && now >= command.expires_at {
        return Ok(CommandStatus::Expired);
    }
    Ok(stored)
}

/// Rebuild the wire envelope for a stored command.
pub fn envelope_for(command: &Command) -> Result<CommandEnvelope> {
    Ok(CommandEnvelope {
        id: command.id.clone(),
        command_type: command.command_type.parse()?,
        payload: parse_payload(&command.payload)?,
        nonce: command.nonce.clone(),
        expires_at: format_timestamp(command.expires_at),
        signature: command.signature.clone(),
    })
}

#[derive(Clone)]
pub struct CommandLifecycle {
    db: BackendDatabase,
    signer: CommandSigner,
    events: EventLog,
    config: Arc<BackendConfig>,
}

impl CommandLifecycle {
    pub fn new(db: BackendDatabase, events: EventLog, config: Arc<BackendConfig>) -> Result<Self> {
        let signer = CommandSigner::new(config.command_signing_secret.as_bytes())?;
        Ok(Self {
            db,
            signer,
            events,
            config,
        })
    }

    fn resolve_ttl(&self, ttl_secs: Option<i64>) -> Result<i64> {
        let ttl = ttl_secs.unwrap_or(self.config.command_default_ttl_secs);
        let (min, max) = (
            self.config.command_min_ttl_secs,
            self.config.command_max_ttl_secs,
        );
        if !(min..=max).contains(&ttl) {
            return Err(ServiceError::Validation(format!(
                "ttl_seconds must be between {min} and {max}"
            )));
        }
        Ok(ttl)
    }

    /// Sign and store a command for a device the principal owns.
    #[instrument(skip(self, principal, payload), fields(identity_id = %principal.identity_id))]
    pub async fn create(
        &self,
        principal: &AdminPrincipal,
        device_id: &str,
        command_type: CommandType,
        payload: Payload,
        ttl_secs: Option<i64>,
    ) -> Result<IssuedCommand> {
        let ttl = self.resolve_ttl(ttl_secs)?;
        let device = owned_device(&self.db, &principal.identity_id, device_id).await?;

        let id = uuid::Uuid::new_v4().to_string();
        let nonce = create_nonce();
        let issued_at = unix_timestamp();
        let expires_at = issued_at + ttl;
        let expires_at_text = format_timestamp(expires_at);

        let signature = self.signer.sign(&SignedFields {
            id: &id,
            device_id: &device.id,
            command_type,
            payload: &payload,
            nonce: &nonce,
            expires_at: &expires_at_text,
        })?;

        let payload_json = serde_json::to_string(&payload)?;
        self.db
            .insert_command(&NewCommand {
                id: &id,
                device_id: &device.id,
                command_type: command_type.as_str(),
                payload: &payload_json,
                nonce: &nonce,
                signature: &signature,
                issued_by: &principal.identity_id,
                issued_at,
                expires_at,
            })
            .await?;

        self.events
            .record(
                &device.id,
                DeviceEventType::AdminAction,
                &serde_json::json!({
                    "action": command_type.as_str(),
                    "command_id": id,
                    "issued_by": principal.display_anydesk_id,
                }),
            )
            .await;

        record(ProtocolCounter::CommandsCreated, 1, command_type.as_str());
        info!(command_id = %id, device_id = %device.id, %command_type, ttl, "Command issued");

        Ok(IssuedCommand {
            device_id: device.id,
            envelope: CommandEnvelope {
                id,
                command_type,
                payload,
                nonce,
                expires_at: expires_at_text,
                signature,
            },
        })
    }

    /// Hand the device its deliverable commands, oldest first, and mark them
    /// dispatched.
    ///
    /// `since` (RFC 3339) restricts the batch to commands issued after it;
    /// a value that does not parse is ignored. A command dispatched less than
    /// `command_redelivery_secs` ago is not handed out again.
    #[instrument(skip_all, fields(device_id = %device.id))]
    pub async fn poll(&self, device: &Device, since: Option<&str>) -> Result<Vec<CommandEnvelope>> {
        let since = since
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|raw| {
                let parsed = parse_timestamp(raw);
                if parsed.is_none() {
                    debug!(since = raw, "Ignoring unparsable since filter");
                }
                parsed
            });

        let now = unix_timestamp();
        let commands = self
            .db
            .dispatch_commands(
                &device.id,
                now,
                now - self.config.command_redelivery_secs,
                since,
                self.config.command_poll_limit,
            )
            .await?;

        let envelopes = commands
            .iter()
            .map(envelope_for)
            .collect::<Result<Vec<_>>>()?;

        if !envelopes.is_empty() {
            record(
                ProtocolCounter::CommandsDispatched,
                envelopes.len() as u64,
                "dispatched",
            );
            info!(count = envelopes.len(), "Commands dispatched");
        }
        Ok(envelopes)
    }

    /// Record the device's outcome for a command.
    ///
    /// Fails with `NotFound` if the command does not belong to `device` or
    /// has already reached a terminal state.
    #[instrument(skip(self, device, message), fields(device_id = %device.id))]
    pub async fn acknowledge(
        &self,
        device: &Device,
        command_id: &str,
        status: AckStatus,
        message: Option<&str>,
    ) -> Result<Command> {
        if let Some(msg) = message {
            if msg.chars().count() > self.config.ack_message_max_len {
                return Err(ServiceError::Validation(format!(
                    "ack_message must be at most {} characters",
                    self.config.ack_message_max_len
                )));
            }
        }

        let target = match status {
            AckStatus::Success => CommandStatus::AckedSuccess,
            AckStatus::Failed => CommandStatus::AckedFailed,
        };

        let command = self
            .db
            .ack_command(command_id, &device.id, target, message, unix_timestamp())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Command {command_id}")))?;

        if command.status == CommandStatus::Expired.as_str() {
            warn!(command_id, reported = status.as_str(), "Acknowledgement after expiry");
        }

        self.events
            .record(
                &device.id,
                DeviceEventType::CommandAck,
                &serde_json::json!({
                    "command_id": command.id,
                    "ack_status": status.as_str(),
                    "ack_message": message,
                    "stored_status": command.status,
                }),
            )
            .await;
        self.events
            .notify_owner(OwnerNotification {
                owner_identity_id: device.owner_identity_id.clone(),
                device_id: Some(device.id.clone()),
                event_type: DeviceEventType::CommandAck.as_str().to_string(),
                title: "Command Acknowledged".to_string(),
                body: format!(
                    "{}: {} {}",
                    device.label,
                    command.command_type,
                    status.as_str()
                ),
            })
            .await;

        record(ProtocolCounter::CommandsAcked, 1, status.as_str());
        info!(command_id, status = %command.status, "Command acknowledged");
        Ok(command)
    }

    /// Look up a command on a device the principal owns.
    pub async fn get(&self, principal: &AdminPrincipal, command_id: &str) -> Result<Command> {
        let command = self.db.get_command(command_id).await?;
        owned_device(&self.db, &principal.identity_id, &command.device_id).await?;
        Ok(command)
    }

    /// Check an envelope's signature as addressed to `device_id`.
    pub fn verify(&self, envelope: &CommandEnvelope, device_id: &str) -> bool {
        self.signer.verify_envelope(envelope, device_id)
    }
}
