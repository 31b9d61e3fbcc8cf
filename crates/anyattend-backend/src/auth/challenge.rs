//! Ownership challenges: prove control of a numeric ID with a one-time code.

use std::sync::Arc;

use anyattend_core::BackendConfig;
use anyattend_core::db::unix_timestamp;
use anyattend_core::time::format_timestamp;
use anyattend_crypto::{constant_time_str_eq, hash_secret, is_numeric_code, random_numeric_code};
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::session::{AdminSessionService, SessionGrant};
use crate::error::{Result, ServiceError};
use crate::events::{DeviceEventType, EventLog};
use crate::identity::IdentityRegistry;
use crate::storage::{BackendDatabase, NewChallenge, OwnershipChallenge};
use crate::telemetry::{ProtocolCounter, record};

const DELIVERY_METHOD: &str = "paired_device_event";
const DELIVERY_NOTE: &str = "Verification code is issued to the paired connectee context. \
     Use the challenge code shown by your paired setup flow.";

/// How the verification code reaches the owner.
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub method: String,
    pub note: String,
}

/// Result of starting a challenge.
#[derive(Debug, Clone, Serialize)]
pub struct ChallengeTicket {
    pub challenge_id: String,
    /// RFC 3339 UTC.
    pub expires_at: String,
    pub linked_device_id: Option<String>,
    pub delivery: Delivery,
    /// Raw code; only present when challenge debug mode is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub development_verification_code: Option<String>,
}

/// Result of a verification attempt that reached the code comparison.
#[derive(Debug, Clone)]
pub enum ChallengeOutcome {
    Verified(Box<SessionGrant>),
    /// Wrong code. Deliberately carries no detail.
    Declined,
}

/// Fail with the distinct error for a challenge that can no longer be used.
pub(crate) fn check_challenge_usable(challenge: &OwnershipChallenge, now: i64) -> Result<()> {
    if challenge.consumed_at.is_some() {
        return Err(ServiceError::Conflict("Challenge already used".to_string()));
    }
    if now >= challenge.expires_at {
        return Err(ServiceError::Expired("Challenge expired".to_string()));
    }
    Ok(())
}

pub(crate) fn check_code_format(code: &str) -> Result<()> {
    if is_numeric_code(code) {
        Ok(())
    } else {
        Err(ServiceError::Validation(
            "Verification code must be a 6-digit value".to_string(),
        ))
    }
}

/// Issues and verifies ownership challenges.
#[derive(Clone)]
pub struct OwnershipChallengeService {
    db: BackendDatabase,
    identities: IdentityRegistry,
    sessions: AdminSessionService,
    events: EventLog,
    config: Arc<BackendConfig>,
}

impl OwnershipChallengeService {
    pub const fn new(
        db: BackendDatabase,
        identities: IdentityRegistry,
        sessions: AdminSessionService,
        events: EventLog,
        config: Arc<BackendConfig>,
    ) -> Self {
        Self {
            db,
            identities,
            sessions,
            events,
            config,
        }
    }

    /// Issue a challenge for a raw numeric ID.
    ///
    /// The identity is created if needed. The owner's most recently active
    /// device, if any, receives an `ownership_challenge_issued` event.
    #[instrument(skip(self))]
    pub async fn start_challenge(&self, raw_id: &str) -> Result<ChallengeTicket> {
        let identity = self.identities.register(raw_id).await?;
        let linked_device = self.db.latest_device_for_identity(&identity.id).await?;
        let linked_device_id = linked_device.map(|d| d.id);

        let code = random_numeric_code();
        let challenge_id = uuid::Uuid::new_v4().to_string();
        let expires_at = unix_timestamp() + self.config.challenge_ttl_secs();

        self.db
            .create_challenge(&NewChallenge {
                id: &challenge_id,
                identity_id: &identity.id,
                device_id: linked_device_id.as_deref(),
                code_hash: &hash_secret(&code),
                expires_at,
            })
            .await?;

        let expires_at = format_timestamp(expires_at);
        if let Some(device_id) = &linked_device_id {
            self.events
                .record(
                    device_id,
                    DeviceEventType::OwnershipChallengeIssued,
                    &serde_json::json!({
                        "challenge_id": challenge_id,
                        "expires_at": expires_at,
                        "anydesk_id": identity.display_id,
                    }),
                )
                .await;
        }

        record(ProtocolCounter::ChallengesIssued, 1, "issued");
        info!(
            identity_id = %identity.id,
            challenge_id = %challenge_id,
            linked = linked_device_id.is_some(),
            "Ownership challenge issued"
        );

        let development_verification_code = if self.config.challenge_debug {
            warn!(challenge_id = %challenge_id, "Challenge debug mode is active; returning raw code");
            Some(code)
        } else {
            None
        };

        Ok(ChallengeTicket {
            challenge_id,
            expires_at,
            linked_device_id,
            delivery: Delivery {
                method: DELIVERY_METHOD.to_string(),
                note: DELIVERY_NOTE.to_string(),
            },
            development_verification_code,
        })
    }

    /// Verify a code against a challenge.
    ///
    /// On a match the challenge is consumed, the identity is marked verified
    /// and switched to the admin role, and a session is granted. A wrong code
    /// bumps the attempt counter and yields [`ChallengeOutcome::Declined`].
    #[instrument(skip(self, code, fingerprint))]
    pub async fn verify_challenge(
        &self,
        challenge_id: &str,
        code: &str,
        fingerprint: Option<&str>,
    ) -> Result<ChallengeOutcome> {
        check_code_format(code)?;

        let challenge = self
            .db
            .get_challenge(challenge_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Challenge {challenge_id}")))?;

        let now = unix_timestamp();
        check_challenge_usable(&challenge, now)?;

        if !constant_time_str_eq(&hash_secret(code), &challenge.code_hash) {
            self.db.increment_challenge_attempts(challenge_id).await?;
            record(ProtocolCounter::ChallengeVerifications, 1, "declined");
            info!(challenge_id, "Challenge code declined");
            return Ok(ChallengeOutcome::Declined);
        }

        if !self
            .db
            .consume_challenge_for_admin(challenge_id, &challenge.identity_id, now)
            .await?
        {
            // Lost a race, or expired between the read and the write.
            let current = self
                .db
                .get_challenge(challenge_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Challenge {challenge_id}")))?;
            check_challenge_usable(&current, now)?;
            return Err(ServiceError::Conflict("Challenge already used".to_string()));
        }

        let identity = self.identities.get(&challenge.identity_id).await?;
        let grant = self.sessions.grant(&identity, fingerprint).await?;

        record(ProtocolCounter::ChallengeVerifications, 1, "verified");
        info!(challenge_id, identity_id = %identity.id, "Ownership verified");
        Ok(ChallengeOutcome::Verified(Box::new(grant)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::events::LogSink;

    struct Harness {
        db: BackendDatabase,
        svc: OwnershipChallengeService,
    }

    async fn harness(debug: bool) -> Harness {
        let db = BackendDatabase::open_in_memory().await.unwrap();
        let mut config = BackendConfig::with_secrets(
            "jwt-secret-for-challenge-tests",
            "signing-secret-for-challenge-tests",
        );
        config.challenge_debug = debug;
        let config = Arc::new(config);
        let identities = IdentityRegistry::new(db.clone());
        let sessions = AdminSessionService::new(db.clone(), identities.clone(), config.clone());
        let events = EventLog::new(db.clone(), Arc::new(LogSink));
        let svc = OwnershipChallengeService::new(db.clone(), identities, sessions, events, config);
        Harness { db, svc }
    }

    fn wrong_code(code: &str) -> String {
        if code == "000000" { "000001" } else { "000000" }.to_string()
    }

    #[tokio::test]
    async fn start_normalizes_and_hides_code_by_default() {
        let h = harness(false).await;
        let ticket = h.svc.start_challenge("806-716-144").await.unwrap();

        assert!(ticket.development_verification_code.is_none());
        assert!(ticket.linked_device_id.is_none());
        assert_eq!(ticket.delivery.method, "paired_device_event");
        assert!(ticket.expires_at.ends_with('Z'));

        let identity = h.db.get_identity_by_canonical("806716144").await.unwrap();
        assert!(identity.is_some());

        let json = serde_json::to_value(&ticket).unwrap();
        assert!(json.get("development_verification_code").is_none());
    }

    #[tokio::test]
    async fn verify_with_correct_code_grants_session_once() {
        let h = harness(true).await;
        let ticket = h.svc.start_challenge("806-716-144").await.unwrap();
        let code = ticket.development_verification_code.clone().unwrap();

        let outcome = h
            .svc
            .verify_challenge(&ticket.challenge_id, &code, Some("test-client"))
            .await
            .unwrap();
        let ChallengeOutcome::Verified(grant) = outcome else {
            panic!("expected verified outcome");
        };
        assert_eq!(grant.admin.active_role, "admin");
        assert_eq!(grant.admin.anydesk_id, "806 716 144");

        let identity = h
            .db
            .get_identity_by_canonical("806716144")
            .await
            .unwrap()
            .unwrap();
        assert!(identity.verified_at.is_some());

        let err = h
            .svc
            .verify_challenge(&ticket.challenge_id, &code, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn wrong_code_is_declined_and_counted() {
        let h = harness(true).await;
        let ticket = h.svc.start_challenge("806716144").await.unwrap();
        let code = ticket.development_verification_code.clone().unwrap();

        let outcome = h
            .svc
            .verify_challenge(&ticket.challenge_id, &wrong_code(&code), None)
            .await
            .unwrap();
        assert!(matches!(outcome, ChallengeOutcome::Declined));

        let stored = h.db.get_challenge(&ticket.challenge_id).await.unwrap().unwrap();
        assert_eq!(stored.attempts, 1);
        assert!(stored.consumed_at.is_none());

        let outcome = h
            .svc
            .verify_challenge(&ticket.challenge_id, &code, None)
            .await
            .unwrap();
        assert!(matches!(outcome, ChallengeOutcome::Verified(_)));
    }

    #[tokio::test]
    async fn expired_challenge_never_verifies() {
        let h = harness(true).await;
        let ticket = h.svc.start_challenge("806716144").await.unwrap();
        let code = ticket.development_verification_code.clone().unwrap();

        sqlx::query("UPDATE ownership_challenges SET expires_at = ? WHERE id = ?")
            .bind(unix_timestamp() - 1)
            .bind(&ticket.challenge_id)
            .execute(h.db.pool())
            .await
            .unwrap();

        let err = h
            .svc
            .verify_challenge(&ticket.challenge_id, &code, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Expired);
    }

    #[tokio::test]
    async fn unknown_challenge_and_bad_format() {
        let h = harness(false).await;

        let err = h
            .svc
            .verify_challenge("no-such-challenge", "123456", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.public_message(), "invalid or expired");

        let err = h
            .svc
            .verify_challenge("no-such-challenge", "12345", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn duplicate_correct_codes_succeed_once() {
        let h = harness(true).await;
        let ticket = h.svc.start_challenge("806716144").await.unwrap();
        let code = ticket.development_verification_code.clone().unwrap();

        let (a, b) = tokio::join!(
            h.svc.verify_challenge(&ticket.challenge_id, &code, None),
            h.svc.verify_challenge(&ticket.challenge_id, &code, None),
        );
        let successes = [a, b]
            .into_iter()
            .filter(|r| matches!(r, Ok(ChallengeOutcome::Verified(_))))
            .count();
        assert_eq!(successes, 1);
    }
}
