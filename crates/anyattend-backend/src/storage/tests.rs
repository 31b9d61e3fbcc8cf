//! Storage layer tests for the Anyattend backend.

#![allow(clippy::unwrap_used)]

use anyattend_core::db::unix_timestamp;

use super::db::BackendDatabase;
use super::models::{
    AdminSession, CommandStatus, Device, DeviceStatus, Identity, RequestStatus, Role,
};
use super::queries_commands::NewCommand;
use super::queries_devices::NewDevice;
use super::queries_secrets::{NewChallenge, NewPairingSession};
use super::queries_whitelist::{NewConnectionRequest, NewWhitelistEntry};

async fn test_db() -> BackendDatabase {
    BackendDatabase::open_in_memory().await.unwrap()
}

async fn seed_identity(db: &BackendDatabase) -> Identity {
    let identity = db
        .upsert_identity("i1", "806716144", "806 716 144")
        .await
        .unwrap();
    db.ensure_identity_roles(&identity.id).await.unwrap();
    identity
}

fn new_device<'a>(id: &'a str, owner: &'a str, token_hash: &'a str) -> NewDevice<'a> {
    NewDevice {
        id,
        owner_identity_id: owner,
        owner_admin_id: None,
        label: "Front desk",
        host: Some("desk-01"),
        status: DeviceStatus::Online,
        poll_interval_secs: 60,
        service_name: "AnyDesk",
        webhook_fallback_url: None,
        token_hash,
    }
}

async fn seed_device(db: &BackendDatabase) -> (Identity, Device) {
    let identity = seed_identity(db).await;
    let now = unix_timestamp();
    db.create_pairing_session(&NewPairingSession {
        id: "p1",
        identity_id: &identity.id,
        device_label: "Front desk",
        code_hash: "codehash",
        expires_at: now + 600,
    })
    .await
    .unwrap();
    let device = db
        .complete_pairing("p1", &new_device("d1", &identity.id, "tokhash"), now)
        .await
        .unwrap()
        .unwrap();
    (identity, device)
}

async fn seed_command(
    db: &BackendDatabase,
    id: &str,
    device_id: &str,
    issued_by: &str,
    issued_at: i64,
    expires_at: i64,
) {
    let nonce = format!("nonce-{id}");
    db.insert_command(&NewCommand {
        id,
        device_id,
        command_type: "REFRESH_STATUS",
        payload: "{}",
        nonce: &nonce,
        signature: "sig",
        issued_by,
        issued_at,
        expires_at,
    })
    .await
    .unwrap();
}

// === Identity tests ===

#[tokio::test]
async fn upsert_identity_is_idempotent() {
    let db = test_db().await;
    let first = db
        .upsert_identity("i1", "806716144", "806 716 144")
        .await
        .unwrap();
    let second = db
        .upsert_identity("i2", "806716144", "806 716 144")
        .await
        .unwrap();

    assert_eq!(first.id, "i1");
    assert_eq!(second.id, "i1");
    assert_eq!(first.updated_at, second.updated_at);
    assert_eq!(second.active_role, "connectee");
    assert!(second.verified_at.is_none());
}

#[tokio::test]
async fn upsert_identity_refreshes_display() {
    let db = test_db().await;
    db.upsert_identity("i1", "806716144", "806716144")
        .await
        .unwrap();
    let updated = db
        .upsert_identity("i1", "806716144", "806 716 144")
        .await
        .unwrap();
    assert_eq!(updated.display_id, "806 716 144");
}

#[tokio::test]
async fn roles_and_active_role() {
    let db = test_db().await;
    let identity = db
        .upsert_identity("i1", "806716144", "806 716 144")
        .await
        .unwrap();

    assert!(!db.set_active_role(&identity.id, Role::Admin).await.unwrap());

    db.ensure_identity_roles(&identity.id).await.unwrap();
    db.ensure_identity_roles(&identity.id).await.unwrap();
    assert_eq!(
        db.list_identity_roles(&identity.id).await.unwrap(),
        vec!["admin", "connectee"]
    );

    assert!(db.set_active_role(&identity.id, Role::Admin).await.unwrap());
    let reloaded = db.get_identity(&identity.id).await.unwrap();
    assert_eq!(reloaded.active_role, "admin");
}

#[tokio::test]
async fn link_legacy_admin_reuses_principal() {
    let db = test_db().await;
    let identity = seed_identity(&db).await;

    let a = db
        .link_legacy_admin(&identity.id, "a1", "id-806716144@anyattend.local")
        .await
        .unwrap();
    let b = db
        .link_legacy_admin(&identity.id, "a2", "id-806716144@anyattend.local")
        .await
        .unwrap();

    assert_eq!(a.id, "a1");
    assert_eq!(b.id, "a1");
    assert_eq!(a.is_active, 0);
    let reloaded = db.get_identity(&identity.id).await.unwrap();
    assert_eq!(reloaded.legacy_admin_id.as_deref(), Some("a1"));
}

// === Challenge tests ===

#[tokio::test]
async fn challenge_consumed_once() {
    let db = test_db().await;
    let identity = seed_identity(&db).await;
    let now = unix_timestamp();

    db.create_challenge(&NewChallenge {
        id: "c1",
        identity_id: &identity.id,
        device_id: None,
        code_hash: "h",
        expires_at: now + 600,
    })
    .await
    .unwrap();

    assert!(
        db.consume_challenge_for_admin("c1", &identity.id, now)
            .await
            .unwrap()
    );
    assert!(
        !db.consume_challenge_for_admin("c1", &identity.id, now)
            .await
            .unwrap()
    );

    let reloaded = db.get_identity(&identity.id).await.unwrap();
    assert_eq!(reloaded.verified_at, Some(now));
    assert_eq!(
        reloaded.verification_method.as_deref(),
        Some("ownership_challenge")
    );
    assert_eq!(reloaded.active_role, "admin");
}

#[tokio::test]
async fn consuming_challenge_grants_roles_in_same_transaction() {
    let db = test_db().await;
    let identity = db
        .upsert_identity("i1", "806716144", "806 716 144")
        .await
        .unwrap();
    assert!(db.list_identity_roles(&identity.id).await.unwrap().is_empty());
    let now = unix_timestamp();

    db.create_challenge(&NewChallenge {
        id: "c1",
        identity_id: &identity.id,
        device_id: None,
        code_hash: "h",
        expires_at: now + 600,
    })
    .await
    .unwrap();

    assert!(
        db.consume_challenge_for_admin("c1", &identity.id, now)
            .await
            .unwrap()
    );
    assert_eq!(
        db.list_identity_roles(&identity.id).await.unwrap(),
        vec!["admin".to_string(), "connectee".to_string()]
    );
}

#[tokio::test]
async fn expired_challenge_not_consumed() {
    let db = test_db().await;
    let identity = seed_identity(&db).await;
    let now = unix_timestamp();

    db.create_challenge(&NewChallenge {
        id: "c1",
        identity_id: &identity.id,
        device_id: None,
        code_hash: "h",
        expires_at: now,
    })
    .await
    .unwrap();

    assert!(
        !db.consume_challenge_for_admin("c1", &identity.id, now)
            .await
            .unwrap()
    );
    let challenge = db.get_challenge("c1").await.unwrap().unwrap();
    assert!(challenge.consumed_at.is_none());
    assert!(
        db.get_identity(&identity.id)
            .await
            .unwrap()
            .verified_at
            .is_none()
    );
}

#[tokio::test]
async fn first_verification_time_is_kept() {
    let db = test_db().await;
    let identity = seed_identity(&db).await;
    let now = unix_timestamp();

    for (id, at) in [("c1", now), ("c2", now + 5)] {
        db.create_challenge(&NewChallenge {
            id,
            identity_id: &identity.id,
            device_id: None,
            code_hash: "h",
            expires_at: now + 600,
        })
        .await
        .unwrap();
        assert!(
            db.consume_challenge_for_admin(id, &identity.id, at)
                .await
                .unwrap()
        );
    }

    let reloaded = db.get_identity(&identity.id).await.unwrap();
    assert_eq!(reloaded.verified_at, Some(now));
}

#[tokio::test]
async fn open_challenges_and_attempts() {
    let db = test_db().await;
    let identity = seed_identity(&db).await;
    let now = unix_timestamp();

    for (id, expires_at) in [("open", now + 600), ("stale", now - 1)] {
        db.create_challenge(&NewChallenge {
            id,
            identity_id: &identity.id,
            device_id: None,
            code_hash: "h",
            expires_at,
        })
        .await
        .unwrap();
    }

    let open = db.list_open_challenges(&identity.id, now).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, "open");

    db.increment_challenge_attempts("open").await.unwrap();
    db.increment_challenge_attempts("open").await.unwrap();
    assert_eq!(db.get_challenge("open").await.unwrap().unwrap().attempts, 2);
}

// === Pairing and device tests ===

#[tokio::test]
async fn pairing_completes_once() {
    let db = test_db().await;
    let (identity, device) = seed_device(&db).await;

    assert_eq!(device.owner_identity_id, identity.id);
    assert_eq!(device.status, "online");
    assert!(device.last_seen.is_some());

    let session = db.get_pairing_session("p1").await.unwrap().unwrap();
    assert!(session.used_at.is_some());

    let again = db
        .complete_pairing(
            "p1",
            &new_device("d2", &identity.id, "tokhash2"),
            unix_timestamp(),
        )
        .await
        .unwrap();
    assert!(again.is_none());
    assert!(db.get_device("d2").await.is_err());
}

#[tokio::test]
async fn enrollment_verifies_without_promotion() {
    let db = test_db().await;
    let identity = seed_identity(&db).await;
    let now = unix_timestamp();

    db.create_challenge(&NewChallenge {
        id: "c1",
        identity_id: &identity.id,
        device_id: None,
        code_hash: "h",
        expires_at: now + 600,
    })
    .await
    .unwrap();

    let device = db
        .enroll_device("c1", &new_device("d1", &identity.id, "tokhash"), now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(device.id, "d1");

    let reloaded = db.get_identity(&identity.id).await.unwrap();
    assert!(reloaded.verified_at.is_some());
    assert_eq!(reloaded.active_role, "connectee");

    let replay = db
        .enroll_device("c1", &new_device("d2", &identity.id, "tokhash2"), now)
        .await
        .unwrap();
    assert!(replay.is_none());
}

#[tokio::test]
async fn device_lookup_by_token_hash() {
    let db = test_db().await;
    let (_, device) = seed_device(&db).await;

    let found = db.get_device_by_token_hash("tokhash").await.unwrap();
    assert_eq!(found.unwrap().id, device.id);
    assert!(db.get_device_by_token_hash("other").await.unwrap().is_none());
}

#[tokio::test]
async fn record_status_updates_last_seen() {
    let db = test_db().await;
    let (identity, device) = seed_device(&db).await;
    let later = unix_timestamp() + 100;

    db.record_device_status(&device.id, None, DeviceStatus::Degraded, later)
        .await
        .unwrap();
    let reloaded = db.get_device(&device.id).await.unwrap();
    assert_eq!(reloaded.status, "degraded");
    assert_eq!(reloaded.host.as_deref(), Some("desk-01"));
    assert_eq!(reloaded.last_seen, Some(later));

    let latest = db.latest_device_for_identity(&identity.id).await.unwrap();
    assert_eq!(latest.unwrap().id, device.id);

    assert!(
        db.record_device_status("missing", None, DeviceStatus::Online, later)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn device_events_newest_first() {
    let db = test_db().await;
    let (_, device) = seed_device(&db).await;

    for event in ["pairing_complete", "heartbeat", "alert"] {
        db.insert_device_event(&device.id, event, "{}").await.unwrap();
    }

    let events = db.list_device_events(&device.id, 2).await.unwrap();
    let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(types, vec!["alert", "heartbeat"]);
}

// === Admin session tests ===

#[tokio::test]
async fn rotate_admin_session_is_single_use() {
    let db = test_db().await;
    let identity = seed_identity(&db).await;
    let now = unix_timestamp();

    db.create_admin_session("s1", &identity.id, "old", now + 3600, Some("cli"))
        .await
        .unwrap();

    let replacement = AdminSession {
        id: "s2".into(),
        identity_id: String::new(),
        token_hash: "new".into(),
        expires_at: now + 3600,
        fingerprint: None,
        revoked_at: None,
        created_at: now,
    };

    let rotated = db
        .rotate_admin_session("old", now, &replacement)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rotated.identity_id, identity.id);

    let replay = AdminSession {
        id: "s3".into(),
        token_hash: "newer".into(),
        ..replacement
    };
    assert!(
        db.rotate_admin_session("old", now, &replay)
            .await
            .unwrap()
            .is_none()
    );
    assert!(db.get_admin_session_by_hash("newer").await.unwrap().is_none());

    let old = db.get_admin_session_by_hash("old").await.unwrap().unwrap();
    assert_eq!(old.revoked_at, Some(now));
}

#[tokio::test]
async fn revoke_admin_session_is_idempotent() {
    let db = test_db().await;
    let identity = seed_identity(&db).await;
    let now = unix_timestamp();

    db.create_admin_session("s1", &identity.id, "h", now + 3600, None)
        .await
        .unwrap();

    assert!(db.revoke_admin_session("h", now).await.unwrap());
    assert!(db.revoke_admin_session("h", now + 10).await.unwrap());
    let session = db.get_admin_session_by_hash("h").await.unwrap().unwrap();
    assert_eq!(session.revoked_at, Some(now));

    assert!(!db.revoke_admin_session("unknown", now).await.unwrap());
}

// === Command tests ===

#[tokio::test]
async fn insert_assigns_increasing_seq() {
    let db = test_db().await;
    let (identity, device) = seed_device(&db).await;
    let now = unix_timestamp();

    seed_command(&db, "c1", &device.id, &identity.id, now, now + 300).await;
    seed_command(&db, "c2", &device.id, &identity.id, now, now + 300).await;

    let c1 = db.get_command("c1").await.unwrap();
    let c2 = db.get_command("c2").await.unwrap();
    assert_eq!(c1.status, "pending");
    assert!(c2.seq > c1.seq);
}

#[tokio::test]
async fn dispatch_orders_oldest_first_and_skips_expired() {
    let db = test_db().await;
    let (identity, device) = seed_device(&db).await;
    let now = unix_timestamp();

    seed_command(&db, "newer", &device.id, &identity.id, now - 10, now + 300).await;
    seed_command(&db, "older", &device.id, &identity.id, now - 20, now + 300).await;
    seed_command(&db, "stale", &device.id, &identity.id, now - 30, now).await;

    let batch = db
        .dispatch_commands(&device.id, now, now - 60, None, 100)
        .await
        .unwrap();
    let ids: Vec<_> = batch.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["older", "newer"]);
    assert!(batch.iter().all(|c| c.status == "dispatched"));
    assert!(batch.iter().all(|c| c.dispatched_at == Some(now)));

    let again = db
        .dispatch_commands(&device.id, now, now - 60, None, 100)
        .await
        .unwrap();
    assert!(again.is_empty());

    let redelivered = db
        .dispatch_commands(&device.id, now + 60, now, None, 100)
        .await
        .unwrap();
    assert_eq!(redelivered.len(), 2);
}

#[tokio::test]
async fn dispatch_filters_by_since() {
    let db = test_db().await;
    let (identity, device) = seed_device(&db).await;
    let now = unix_timestamp();

    seed_command(&db, "old", &device.id, &identity.id, now - 20, now + 300).await;
    seed_command(&db, "new", &device.id, &identity.id, now - 5, now + 300).await;

    let batch = db
        .dispatch_commands(&device.id, now, now - 60, Some(now - 10), 100)
        .await
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, "new");
}

#[tokio::test]
async fn ack_is_terminal_and_device_scoped() {
    let db = test_db().await;
    let (identity, device) = seed_device(&db).await;
    let now = unix_timestamp();
    seed_command(&db, "c1", &device.id, &identity.id, now, now + 300).await;

    assert!(
        db.ack_command("c1", "other-device", CommandStatus::AckedSuccess, None, now)
            .await
            .unwrap()
            .is_none()
    );

    let acked = db
        .ack_command(
            "c1",
            &device.id,
            CommandStatus::AckedFailed,
            Some("script missing"),
            now,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(acked.status, "acked_failed");
    assert_eq!(acked.ack_message.as_deref(), Some("script missing"));

    assert!(
        db.ack_command("c1", &device.id, CommandStatus::AckedSuccess, None, now)
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(db.get_command("c1").await.unwrap().status, "acked_failed");
}

#[tokio::test]
async fn late_ack_stores_expired() {
    let db = test_db().await;
    let (identity, device) = seed_device(&db).await;
    let now = unix_timestamp();
    seed_command(&db, "c1", &device.id, &identity.id, now - 100, now - 1).await;

    let acked = db
        .ack_command("c1", &device.id, CommandStatus::AckedSuccess, None, now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(acked.status, "expired");
}

#[tokio::test]
async fn recent_commands_newest_first() {
    let db = test_db().await;
    let (identity, device) = seed_device(&db).await;
    let now = unix_timestamp();

    for (i, id) in ["a", "b", "c"].iter().enumerate() {
        let offset = i64::try_from(i).unwrap();
        seed_command(&db, id, &device.id, &identity.id, now + offset, now + 300).await;
    }

    let recent = db.list_recent_commands(&device.id, 2).await.unwrap();
    let ids: Vec<_> = recent.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c", "b"]);
}

// === Whitelist and connection request tests ===

async fn seed_request(db: &BackendDatabase, owner: &str, id: &str, expires_at: i64) {
    db.create_connection_request(
        &NewConnectionRequest {
            id,
            owner_identity_id: owner,
            requester_canonical_id: "123456789",
            requester_display_id: "123 456 789",
            requester_label: Some("Support"),
            note: None,
            expires_at,
        },
        unix_timestamp(),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn whitelist_upsert_reactivates_existing_row() {
    let db = test_db().await;
    let identity = seed_identity(&db).await;
    let now = unix_timestamp();
    let entry = |id| NewWhitelistEntry {
        id,
        owner_identity_id: "i1",
        requester_canonical_id: "123456789",
        requester_display_id: "123 456 789",
        label: None,
        created_by_identity_id: "i1",
    };

    let first = db.upsert_whitelist_entry(&entry("w1"), now).await.unwrap();
    sqlx::query("UPDATE whitelist_entries SET status = 'revoked' WHERE id = ?")
        .bind(&first.id)
        .execute(db.pool())
        .await
        .unwrap();
    assert!(
        db.find_active_whitelist_entry(&identity.id, "123456789")
            .await
            .unwrap()
            .is_none()
    );

    let second = db.upsert_whitelist_entry(&entry("w2"), now + 5).await.unwrap();
    assert_eq!(second.id, "w1");
    assert_eq!(second.status, "active");
    assert_eq!(second.updated_at, now + 5);
    assert_eq!(db.list_whitelist_entries(&identity.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn connection_request_decided_once() {
    let db = test_db().await;
    let identity = seed_identity(&db).await;
    let now = unix_timestamp();
    seed_request(&db, &identity.id, "r1", now + 600).await;

    let (decided, entry) = db
        .decide_connection_request("r1", &identity.id, RequestStatus::Approved, None, "w1", now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(decided.status, "approved");
    assert_eq!(decided.decided_at, Some(now));
    let entry = entry.unwrap();
    assert_eq!(entry.id, "w1");
    assert_eq!(entry.label.as_deref(), Some("Support"));

    assert!(
        db.decide_connection_request("r1", &identity.id, RequestStatus::Declined, None, "w2", now)
            .await
            .unwrap()
            .is_none()
    );
    let stored = db.get_connection_request("r1").await.unwrap().unwrap();
    assert_eq!(stored.status, "approved");
}

#[tokio::test]
async fn expired_or_foreign_request_not_decided() {
    let db = test_db().await;
    let identity = seed_identity(&db).await;
    let now = unix_timestamp();
    seed_request(&db, &identity.id, "r1", now).await;
    seed_request(&db, &identity.id, "r2", now + 600).await;

    assert!(
        db.decide_connection_request("r1", &identity.id, RequestStatus::Approved, None, "w1", now)
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        db.decide_connection_request("r2", "someone-else", RequestStatus::Approved, None, "w1", now)
            .await
            .unwrap()
            .is_none()
    );
    assert!(db.list_whitelist_entries(&identity.id).await.unwrap().is_empty());

    assert!(db.expire_connection_request("r1", &identity.id, now).await.unwrap());
    assert!(!db.expire_connection_request("r2", &identity.id, now).await.unwrap());

    let pending = db
        .list_connection_requests(&identity.id, Some(RequestStatus::Pending), 10)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "r2");
    assert!(
        db.find_open_connection_request(&identity.id, "123456789", now)
            .await
            .unwrap()
            .is_some()
    );
}
