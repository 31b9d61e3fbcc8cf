//! Device, pairing consumption, and device event queries.

use anyattend_core::db::{DatabaseError, unix_timestamp};
use sqlx::SqliteConnection;

use super::db::BackendDatabase;
use super::models::{Device, DeviceEvent, DeviceStatus};
use super::queries_secrets::{consume_challenge, mark_identity_verified};

/// Parameters for registering a device.
pub struct NewDevice<'a> {
    pub id: &'a str,
    pub owner_identity_id: &'a str,
    pub owner_admin_id: Option<&'a str>,
    pub label: &'a str,
    pub host: Option<&'a str>,
    pub status: DeviceStatus,
    pub poll_interval_secs: i64,
    pub service_name: &'a str,
    pub webhook_fallback_url: Option<&'a str>,
    pub token_hash: &'a str,
}

async fn insert_device(
    conn: &mut SqliteConnection,
    params: &NewDevice<'_>,
    now: i64,
) -> Result<Device, DatabaseError> {
    let last_seen = (params.status == DeviceStatus::Online).then_some(now);

    let device = sqlx::query_as::<_, Device>(
        "INSERT INTO devices (id, owner_identity_id, owner_admin_id, label, host, status, last_seen,
                              poll_interval_secs, service_name, webhook_fallback_url, token_hash,
                              paired_at, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(params.id)
    .bind(params.owner_identity_id)
    .bind(params.owner_admin_id)
    .bind(params.label)
    .bind(params.host)
    .bind(params.status.as_str())
    .bind(last_seen)
    .bind(params.poll_interval_secs)
    .bind(params.service_name)
    .bind(params.webhook_fallback_url)
    .bind(params.token_hash)
    .bind(now)
    .bind(now)
    .fetch_one(conn)
    .await?;

    Ok(device)
}

impl BackendDatabase {
    // =========================================================================
    // Device registration
    // =========================================================================

    /// Consume a pairing session and register the device in one transaction.
    ///
    /// Returns `None` (and stores nothing) if the session was already used or
    /// has expired.
    pub async fn complete_pairing(
        &self,
        session_id: &str,
        device: &NewDevice<'_>,
        now: i64,
    ) -> Result<Option<Device>, DatabaseError> {
        let mut tx = self.pool().begin().await?;

        let consumed = sqlx::query(
            "UPDATE pairing_sessions SET used_at = ?
             WHERE id = ? AND used_at IS NULL AND expires_at > ?",
        )
        .bind(now)
        .bind(session_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if consumed.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(None);
        }

        let device = insert_device(&mut tx, device, now).await?;
        tx.commit().await?;
        Ok(Some(device))
    }

    /// Consume an ownership challenge, mark its identity verified, and
    /// register the device in one transaction.
    ///
    /// The identity's active role is left unchanged. Returns `None` (and
    /// stores nothing) if the challenge was already consumed or has expired.
    pub async fn enroll_device(
        &self,
        challenge_id: &str,
        device: &NewDevice<'_>,
        now: i64,
    ) -> Result<Option<Device>, DatabaseError> {
        let mut tx = self.pool().begin().await?;

        if !consume_challenge(&mut tx, challenge_id, now).await? {
            tx.rollback().await?;
            return Ok(None);
        }
        mark_identity_verified(&mut tx, device.owner_identity_id, now, None).await?;

        let device = insert_device(&mut tx, device, now).await?;
        tx.commit().await?;
        Ok(Some(device))
    }

    // =========================================================================
    // Device lookups
    // =========================================================================

    /// Get a device by ID.
    pub async fn get_device(&self, id: &str) -> Result<Device, DatabaseError> {
        sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Device {id}")))
    }

    /// Find the device whose stored token hash equals `token_hash`.
    pub async fn get_device_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Device>, DatabaseError> {
        let device = sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE token_hash = ?")
            .bind(token_hash)
            .fetch_optional(self.pool())
            .await?;

        Ok(device)
    }

    /// The identity's most recently active device (by last contact, falling
    /// back to registration time).
    pub async fn latest_device_for_identity(
        &self,
        identity_id: &str,
    ) -> Result<Option<Device>, DatabaseError> {
        let device = sqlx::query_as::<_, Device>(
            "SELECT * FROM devices WHERE owner_identity_id = ?
             ORDER BY COALESCE(last_seen, created_at) DESC, created_at DESC
             LIMIT 1",
        )
        .bind(identity_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(device)
    }

    /// List an identity's devices, most recently registered first.
    pub async fn list_devices_for_identity(
        &self,
        identity_id: &str,
    ) -> Result<Vec<Device>, DatabaseError> {
        let devices = sqlx::query_as::<_, Device>(
            "SELECT * FROM devices WHERE owner_identity_id = ? ORDER BY created_at DESC, id",
        )
        .bind(identity_id)
        .fetch_all(self.pool())
        .await?;

        Ok(devices)
    }

    /// Record a status report from a device, stamping `last_seen`.
    pub async fn record_device_status(
        &self,
        device_id: &str,
        host: Option<&str>,
        status: DeviceStatus,
        now: i64,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE devices SET status = ?, host = COALESCE(?, host), last_seen = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(host)
        .bind(now)
        .bind(device_id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Device {device_id}")));
        }
        Ok(())
    }

    // =========================================================================
    // Device event log
    // =========================================================================

    /// Append an event to a device's log. `payload` is JSON text.
    pub async fn insert_device_event(
        &self,
        device_id: &str,
        event_type: &str,
        payload: &str,
    ) -> Result<DeviceEvent, DatabaseError> {
        let event = sqlx::query_as::<_, DeviceEvent>(
            "INSERT INTO device_events (device_id, event_type, payload, created_at)
             VALUES (?, ?, ?, ?)
             RETURNING *",
        )
        .bind(device_id)
        .bind(event_type)
        .bind(payload)
        .bind(unix_timestamp())
        .fetch_one(self.pool())
        .await?;

        Ok(event)
    }

    /// A device's most recent events, newest first.
    pub async fn list_device_events(
        &self,
        device_id: &str,
        limit: i64,
    ) -> Result<Vec<DeviceEvent>, DatabaseError> {
        let events = sqlx::query_as::<_, DeviceEvent>(
            "SELECT * FROM device_events WHERE device_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(events)
    }
}
