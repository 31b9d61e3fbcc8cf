//! Device pairing (code flow) and enrollment (challenge flow).

use std::sync::Arc;

use anyattend_core::BackendConfig;
use anyattend_core::db::unix_timestamp;
use anyattend_core::time::format_timestamp;
use anyattend_crypto::{constant_time_str_eq, hash_secret, random_numeric_code};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::token::DeviceTokenService;
use crate::auth::AdminPrincipal;
use crate::auth::challenge::{check_challenge_usable, check_code_format};
use crate::error::{Result, ServiceError};
use crate::events::{DeviceEventType, EventLog, OwnerNotification};
use crate::identity::IdentityRegistry;
use crate::storage::{
    BackendDatabase, Device, DeviceStatus, NewDevice, NewPairingSession, PairingSession,
};
use crate::telemetry::{ProtocolCounter, record};

pub const MIN_LABEL_LEN: usize = 3;
pub const MAX_LABEL_LEN: usize = 64;
pub const MAX_HOST_LEN: usize = 128;
pub const MAX_SERVICE_NAME_LEN: usize = 128;

/// Options an agent supplies when pairing or enrolling.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HostInfo {
    pub host: Option<String>,
    pub poll_interval_secs: Option<i64>,
    pub service_name: Option<String>,
    pub webhook_fallback_url: Option<String>,
}

/// Credential returned to the agent exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceCredential {
    pub device_id: String,
    pub device_token: String,
    pub poll_interval_secs: i64,
    pub service_name: String,
    pub webhook_fallback_url: Option<String>,
}

/// Returned to the admin when a pairing session starts.
#[derive(Debug, Clone, Serialize)]
pub struct PairingTicket {
    pub pairing_session_id: String,
    pub pairing_code: String,
    pub expires_at: String,
    /// JSON `{pairing_session_id, pairing_code}` for rendering as a QR code.
    pub qr_payload: String,
}

/// Result of a pairing or enrollment attempt that reached code comparison.
#[derive(Debug, Clone)]
pub enum PairingOutcome {
    Paired(DeviceCredential),
    /// Wrong code. Deliberately carries no detail.
    Declined,
}

/// Validated device settings.
struct DeviceSettings {
    host: Option<String>,
    poll_interval_secs: i64,
    service_name: String,
    webhook_fallback_url: Option<String>,
}

fn validate_label(label: &str) -> Result<String> {
    let label = label.trim();
    let len = label.chars().count();
    if !(MIN_LABEL_LEN..=MAX_LABEL_LEN).contains(&len) {
        return Err(ServiceError::Validation(format!(
            "Device label must be {MIN_LABEL_LEN} to {MAX_LABEL_LEN} characters"
        )));
    }
    Ok(label.to_string())
}

fn check_pairing_usable(session: &PairingSession, now: i64) -> Result<()> {
    if session.used_at.is_some() {
        return Err(ServiceError::Conflict("Pairing session already used".to_string()));
    }
    if now >= session.expires_at {
        return Err(ServiceError::Expired("Pairing session expired".to_string()));
    }
    Ok(())
}

/// Creates devices through either pairing flow.
#[derive(Clone)]
pub struct PairingService {
    db: BackendDatabase,
    identities: IdentityRegistry,
    tokens: DeviceTokenService,
    events: EventLog,
    config: Arc<BackendConfig>,
}

impl PairingService {
    pub const fn new(
        db: BackendDatabase,
        identities: IdentityRegistry,
        tokens: DeviceTokenService,
        events: EventLog,
        config: Arc<BackendConfig>,
    ) -> Self {
        Self {
            db,
            identities,
            tokens,
            events,
            config,
        }
    }

    fn settings(&self, info: &HostInfo) -> Result<DeviceSettings> {
        let host = match info.host.as_deref().map(str::trim) {
            None => None,
            Some(h) if (1..=MAX_HOST_LEN).contains(&h.chars().count()) => Some(h.to_string()),
            Some(_) => {
                return Err(ServiceError::Validation(format!(
                    "host must be 1 to {MAX_HOST_LEN} characters"
                )));
            }
        };

        let poll_interval_secs = info
            .poll_interval_secs
            .unwrap_or(self.config.default_poll_interval_secs);
        let (min, max) = (
            self.config.min_poll_interval_secs,
            self.config.max_poll_interval_secs,
        );
        if !(min..=max).contains(&poll_interval_secs) {
            return Err(ServiceError::Validation(format!(
                "poll_interval_secs must be between {min} and {max}"
            )));
        }

        let service_name = info
            .service_name
            .as_deref()
            .map_or(self.config.default_service_name.as_str(), str::trim)
            .to_string();
        if !(1..=MAX_SERVICE_NAME_LEN).contains(&service_name.chars().count()) {
            return Err(ServiceError::Validation(format!(
                "service_name must be 1 to {MAX_SERVICE_NAME_LEN} characters"
            )));
        }

        let webhook_fallback_url = info.webhook_fallback_url.clone();
        if let Some(url) = &webhook_fallback_url {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(ServiceError::Validation(
                    "webhook_fallback_url must be an http(s) URL".to_string(),
                ));
            }
        }

        Ok(DeviceSettings {
            host,
            poll_interval_secs,
            service_name,
            webhook_fallback_url,
        })
    }

    fn credential(device: &Device, token: String) -> DeviceCredential {
        DeviceCredential {
            device_id: device.id.clone(),
            device_token: token,
            poll_interval_secs: device.poll_interval_secs,
            service_name: device.service_name.clone(),
            webhook_fallback_url: device.webhook_fallback_url.clone(),
        }
    }

    /// Open a pairing session for a new device owned by `principal`.
    #[instrument(skip(self, principal), fields(identity_id = %principal.identity_id))]
    pub async fn start_pairing(&self, principal: &AdminPrincipal, label: &str) -> Result<PairingTicket> {
        let label = validate_label(label)?;
        let code = random_numeric_code();
        let session_id = uuid::Uuid::new_v4().to_string();
        let expires_at = unix_timestamp() + self.config.pairing_ttl_secs();

        self.db
            .create_pairing_session(&NewPairingSession {
                id: &session_id,
                identity_id: &principal.identity_id,
                device_label: &label,
                code_hash: &hash_secret(&code),
                expires_at,
            })
            .await?;

        let qr_payload = serde_json::json!({
            "pairing_session_id": session_id,
            "pairing_code": code,
        })
        .to_string();

        info!(pairing_session_id = %session_id, "Pairing session started");
        Ok(PairingTicket {
            pairing_session_id: session_id,
            pairing_code: code,
            expires_at: format_timestamp(expires_at),
            qr_payload,
        })
    }

    /// Redeem a pairing code and register the device.
    #[instrument(skip(self, code, info))]
    pub async fn complete_pairing(
        &self,
        session_id: &str,
        code: &str,
        info: &HostInfo,
    ) -> Result<PairingOutcome> {
        check_code_format(code)?;
        let settings = self.settings(info)?;

        let session = self
            .db
            .get_pairing_session(session_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Pairing session {session_id}")))?;

        let now = unix_timestamp();
        check_pairing_usable(&session, now)?;

        if !constant_time_str_eq(&hash_secret(code), &session.code_hash) {
            info!(session_id, "Pairing code declined");
            return Ok(PairingOutcome::Declined);
        }

        let identity = self.identities.get(&session.identity_id).await?;
        let issued = self.tokens.issue();
        let device_id = uuid::Uuid::new_v4().to_string();

        let new_device = NewDevice {
            id: &device_id,
            owner_identity_id: &identity.id,
            owner_admin_id: identity.legacy_admin_id.as_deref(),
            label: &session.device_label,
            host: settings.host.as_deref(),
            status: DeviceStatus::Online,
            poll_interval_secs: settings.poll_interval_secs,
            service_name: &settings.service_name,
            webhook_fallback_url: settings.webhook_fallback_url.as_deref(),
            token_hash: &issued.token_hash,
        };

        let Some(device) = self.db.complete_pairing(session_id, &new_device, now).await? else {
            let current = self
                .db
                .get_pairing_session(session_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Pairing session {session_id}")))?;
            check_pairing_usable(&current, now)?;
            return Err(ServiceError::Conflict("Pairing session already used".to_string()));
        };

        self.after_registration(&device, serde_json::json!({ "host": settings.host }))
            .await;
        info!(device_id = %device.id, session_id, "Device paired");
        Ok(PairingOutcome::Paired(Self::credential(&device, issued.token)))
    }

    /// Register a device by presenting an open ownership challenge code for
    /// the owner's numeric ID.
    #[instrument(skip(self, code, info))]
    pub async fn enroll(
        &self,
        raw_id: &str,
        code: &str,
        label: Option<&str>,
        info: &HostInfo,
    ) -> Result<PairingOutcome> {
        check_code_format(code)?;
        let label = label.map(validate_label).transpose()?;
        let settings = self.settings(info)?;

        let identity = self
            .identities
            .find(raw_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Identity {raw_id}")))?;

        let now = unix_timestamp();
        let code_hash = hash_secret(code);
        let open = self.db.list_open_challenges(&identity.id, now).await?;
        let Some(challenge) = open
            .into_iter()
            .find(|c| constant_time_str_eq(&c.code_hash, &code_hash))
        else {
            info!(identity_id = %identity.id, "Enrollment code declined");
            return Ok(PairingOutcome::Declined);
        };

        let label = label.unwrap_or_else(|| format!("{} Device", identity.display_id));
        let issued = self.tokens.issue();
        let device_id = uuid::Uuid::new_v4().to_string();

        let new_device = NewDevice {
            id: &device_id,
            owner_identity_id: &identity.id,
            owner_admin_id: identity.legacy_admin_id.as_deref(),
            label: &label,
            host: settings.host.as_deref(),
            status: DeviceStatus::Online,
            poll_interval_secs: settings.poll_interval_secs,
            service_name: &settings.service_name,
            webhook_fallback_url: settings.webhook_fallback_url.as_deref(),
            token_hash: &issued.token_hash,
        };

        let Some(device) = self.db.enroll_device(&challenge.id, &new_device, now).await? else {
            let current = self
                .db
                .get_challenge(&challenge.id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Challenge {}", challenge.id)))?;
            check_challenge_usable(&current, now)?;
            return Err(ServiceError::Conflict("Challenge already used".to_string()));
        };

        self.after_registration(
            &device,
            serde_json::json!({
                "host": settings.host,
                "anydesk_id": identity.display_id,
                "source": "enroll",
            }),
        )
        .await;
        info!(device_id = %device.id, identity_id = %identity.id, "Device enrolled");
        Ok(PairingOutcome::Paired(Self::credential(&device, issued.token)))
    }

    async fn after_registration(&self, device: &Device, payload: serde_json::Value) {
        record(ProtocolCounter::DevicesPaired, 1, "paired");
        self.events
            .record(&device.id, DeviceEventType::PairingComplete, &payload)
            .await;
        self.events
            .notify_owner(OwnerNotification {
                owner_identity_id: device.owner_identity_id.clone(),
                device_id: Some(device.id.clone()),
                event_type: DeviceEventType::PairingComplete.as_str().to_string(),
                title: "Device Paired".to_string(),
                body: format!("{} is now connected", device.label),
            })
            .await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_helpers::{admin_grant, test_backend};

    fn other_code(code: &str) -> String {
        if code == "000000" { "000001" } else { "000000" }.to_string()
    }

    #[tokio::test]
    async fn pairing_code_is_single_use() {
        let backend = test_backend().await;
        let (_, principal) = admin_grant(&backend, "806716144").await;
        let ticket = backend
            .pairing
            .start_pairing(&principal, "Reception PC")
            .await
            .unwrap();
        assert!(ticket.qr_payload.contains(&ticket.pairing_session_id));

        let outcome = backend
            .pairing
            .complete_pairing(&ticket.pairing_session_id, &ticket.pairing_code, &HostInfo::default())
            .await
            .unwrap();
        let PairingOutcome::Paired(credential) = outcome else {
            panic!("expected paired");
        };
        assert_eq!(credential.poll_interval_secs, 60);
        assert_eq!(credential.service_name, "AnyDesk");

        let device = backend.db.get_device(&credential.device_id).await.unwrap();
        assert_eq!(device.label, "Reception PC");
        assert_eq!(device.owner_identity_id, principal.identity_id);
        assert_eq!(device.status, "online");
        assert_eq!(device.token_hash, hash_secret(&credential.device_token));

        let err = backend
            .pairing
            .complete_pairing(&ticket.pairing_session_id, &ticket.pairing_code, &HostInfo::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let events = backend.events.list(&device.id, 10).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "pairing_complete"));
    }

    #[tokio::test]
    async fn wrong_pairing_code_is_declined() {
        let backend = test_backend().await;
        let (_, principal) = admin_grant(&backend, "806716144").await;
        let ticket = backend
            .pairing
            .start_pairing(&principal, "Reception PC")
            .await
            .unwrap();

        let outcome = backend
            .pairing
            .complete_pairing(
                &ticket.pairing_session_id,
                &other_code(&ticket.pairing_code),
                &HostInfo::default(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, PairingOutcome::Declined));

        let session = backend
            .db
            .get_pairing_session(&ticket.pairing_session_id)
            .await
            .unwrap()
            .unwrap();
        assert!(session.used_at.is_none());
    }

    #[tokio::test]
    async fn expired_pairing_session_is_rejected() {
        let backend = test_backend().await;
        let (_, principal) = admin_grant(&backend, "806716144").await;
        let ticket = backend
            .pairing
            .start_pairing(&principal, "Reception PC")
            .await
            .unwrap();

        sqlx::query("UPDATE pairing_sessions SET expires_at = ? WHERE id = ?")
            .bind(unix_timestamp() - 1)
            .bind(&ticket.pairing_session_id)
            .execute(backend.db.pool())
            .await
            .unwrap();

        let err = backend
            .pairing
            .complete_pairing(&ticket.pairing_session_id, &ticket.pairing_code, &HostInfo::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Expired);
    }

    #[tokio::test]
    async fn input_is_validated_before_lookup() {
        let backend = test_backend().await;
        let (_, principal) = admin_grant(&backend, "806716144").await;

        let err = backend.pairing.start_pairing(&principal, "PC").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = backend
            .pairing
            .complete_pairing("no-such-session", "12ab56", &HostInfo::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = backend
            .pairing
            .complete_pairing(
                "no-such-session",
                "123456",
                &HostInfo {
                    poll_interval_secs: Some(5),
                    ..HostInfo::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = backend
            .pairing
            .complete_pairing(
                "no-such-session",
                "123456",
                &HostInfo {
                    webhook_fallback_url: Some("ftp://example.com".into()),
                    ..HostInfo::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = backend
            .pairing
            .complete_pairing("no-such-session", "123456", &HostInfo::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn enroll_with_open_challenge_code() {
        let backend = test_backend().await;
        let ticket = backend.challenges.start_challenge("806716144").await.unwrap();
        let code = ticket.development_verification_code.unwrap();

        let outcome = backend
            .pairing
            .enroll(
                "806 716 144",
                &code,
                None,
                &HostInfo {
                    host: Some("kiosk-7".into()),
                    poll_interval_secs: Some(30),
                    ..HostInfo::default()
                },
            )
            .await
            .unwrap();
        let PairingOutcome::Paired(credential) = outcome else {
            panic!("expected paired");
        };
        assert_eq!(credential.poll_interval_secs, 30);

        let device = backend.db.get_device(&credential.device_id).await.unwrap();
        assert_eq!(device.label, "806 716 144 Device");
        assert_eq!(device.host.as_deref(), Some("kiosk-7"));

        let identity = backend.identities.find("806716144").await.unwrap().unwrap();
        assert!(identity.verified_at.is_some());
        assert_eq!(identity.active_role, "connectee");

        let err = backend
            .challenges
            .verify_challenge(&ticket.challenge_id, &code, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn enroll_with_unknown_code_or_identity() {
        let backend = test_backend().await;
        let ticket = backend.challenges.start_challenge("806716144").await.unwrap();
        let code = ticket.development_verification_code.unwrap();

        let outcome = backend
            .pairing
            .enroll("806716144", &other_code(&code), Some("Kiosk"), &HostInfo::default())
            .await
            .unwrap();
        assert!(matches!(outcome, PairingOutcome::Declined));

        let err = backend
            .pairing
            .enroll("123456789", &code, None, &HostInfo::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
