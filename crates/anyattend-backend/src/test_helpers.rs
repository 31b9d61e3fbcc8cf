//! Shared test helpers for backend service tests.
#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;

use anyattend_core::BackendConfig;

use crate::app::Backend;
use crate::auth::{AdminPrincipal, ChallengeOutcome, SessionGrant};
use crate::devices::{DeviceCredential, HostInfo, PairingOutcome};
use crate::events::LogSink;
use crate::storage::{BackendDatabase, Device};

pub const TEST_JWT_SECRET: &str = "jwt-secret-for-backend-tests";
pub const TEST_SIGNING_SECRET: &str = "signing-secret-for-backend-tests";

/// Config with test secrets and the raw challenge code exposed.
pub fn test_config() -> BackendConfig {
    let mut config = BackendConfig::with_secrets(TEST_JWT_SECRET, TEST_SIGNING_SECRET);
    config.challenge_debug = true;
    config
}

pub async fn test_backend() -> Backend {
    test_backend_with(test_config()).await
}

pub async fn test_backend_with(config: BackendConfig) -> Backend {
    let db = BackendDatabase::open_in_memory().await.unwrap();
    Backend::build(db, Arc::new(config), Arc::new(LogSink)).unwrap()
}

/// Run the ownership challenge for `raw_id` and return the grant and the
/// principal its access token resolves to.
pub async fn admin_grant(backend: &Backend, raw_id: &str) -> (SessionGrant, AdminPrincipal) {
    let ticket = backend.challenges.start_challenge(raw_id).await.unwrap();
    let code = ticket.development_verification_code.unwrap();
    let outcome = backend
        .challenges
        .verify_challenge(&ticket.challenge_id, &code, None)
        .await
        .unwrap();
    let ChallengeOutcome::Verified(grant) = outcome else {
        panic!("challenge declined");
    };
    let principal = backend
        .sessions
        .authenticate(&grant.access_token)
        .await
        .unwrap();
    (*grant, principal)
}

/// Pair a device for `principal` through the code flow.
pub async fn paired_device(backend: &Backend, principal: &AdminPrincipal) -> (Device, DeviceCredential) {
    let ticket = backend
        .pairing
        .start_pairing(principal, "Front desk")
        .await
        .unwrap();
    let outcome = backend
        .pairing
        .complete_pairing(
            &ticket.pairing_session_id,
            &ticket.pairing_code,
            &HostInfo {
                host: Some("desk-01".into()),
                ..HostInfo::default()
            },
        )
        .await
        .unwrap();
    let PairingOutcome::Paired(credential) = outcome else {
        panic!("pairing declined");
    };
    let device = backend
        .tokens
        .authenticate(&credential.device_token)
        .await
        .unwrap();
    (device, credential)
}
