//! Whitelist, connection request, and ACL sync queries.

use anyattend_core::db::DatabaseError;
use sqlx::SqliteConnection;

use super::db::BackendDatabase;
use super::models::{AclSyncEvent, ConnectionRequest, RequestStatus, WhitelistEntry};

/// Parameters for adding (or reactivating) a whitelist entry.
pub struct NewWhitelistEntry<'a> {
    pub id: &'a str,
    pub owner_identity_id: &'a str,
    pub requester_canonical_id: &'a str,
    pub requester_display_id: &'a str,
    pub label: Option<&'a str>,
    pub created_by_identity_id: &'a str,
}

/// Parameters for storing an incoming connection request.
pub struct NewConnectionRequest<'a> {
    pub id: &'a str,
    pub owner_identity_id: &'a str,
    pub requester_canonical_id: &'a str,
    pub requester_display_id: &'a str,
    pub requester_label: Option<&'a str>,
    pub note: Option<&'a str>,
    pub expires_at: i64,
}

/// Insert an active entry, or refresh and reactivate the existing entry for
/// the same owner and requester. `params.id` is only used on insert.
async fn upsert_entry(
    conn: &mut SqliteConnection,
    params: &NewWhitelistEntry<'_>,
    now: i64,
) -> Result<WhitelistEntry, DatabaseError> {
    let entry = sqlx::query_as::<_, WhitelistEntry>(
        "INSERT INTO whitelist_entries (id, owner_identity_id, requester_canonical_id,
                                        requester_display_id, label, status,
                                        created_by_identity_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, 'active', ?, ?, ?)
         ON CONFLICT (owner_identity_id, requester_canonical_id) DO UPDATE
         SET requester_display_id = excluded.requester_display_id,
             label = excluded.label,
             status = 'active',
             updated_at = excluded.updated_at
         RETURNING *",
    )
    .bind(params.id)
    .bind(params.owner_identity_id)
    .bind(params.requester_canonical_id)
    .bind(params.requester_display_id)
    .bind(params.label)
    .bind(params.created_by_identity_id)
    .bind(now)
    .bind(now)
    .fetch_one(conn)
    .await?;

    Ok(entry)
}

impl BackendDatabase {
    // =========================================================================
    // Whitelist queries
    // =========================================================================

    /// Add or reactivate a whitelist entry.
    pub async fn upsert_whitelist_entry(
        &self,
        params: &NewWhitelistEntry<'_>,
        now: i64,
    ) -> Result<WhitelistEntry, DatabaseError> {
        let mut conn = self.pool().acquire().await?;
        upsert_entry(&mut *conn, params, now).await
    }

    /// An owner's entries, most recently updated first.
    pub async fn list_whitelist_entries(
        &self,
        owner_identity_id: &str,
    ) -> Result<Vec<WhitelistEntry>, DatabaseError> {
        let entries = sqlx::query_as::<_, WhitelistEntry>(
            "SELECT * FROM whitelist_entries WHERE owner_identity_id = ?
             ORDER BY updated_at DESC, rowid DESC",
        )
        .bind(owner_identity_id)
        .fetch_all(self.pool())
        .await?;

        Ok(entries)
    }

    /// An owner's active entries, most recently updated first.
    pub async fn list_active_whitelist_entries(
        &self,
        owner_identity_id: &str,
    ) -> Result<Vec<WhitelistEntry>, DatabaseError> {
        let entries = sqlx::query_as::<_, WhitelistEntry>(
            "SELECT * FROM whitelist_entries WHERE owner_identity_id = ? AND status = 'active'
             ORDER BY updated_at DESC, rowid DESC",
        )
        .bind(owner_identity_id)
        .fetch_all(self.pool())
        .await?;

        Ok(entries)
    }

    /// The active entry allowing `requester_canonical_id`, if any.
    pub async fn find_active_whitelist_entry(
        &self,
        owner_identity_id: &str,
        requester_canonical_id: &str,
    ) -> Result<Option<WhitelistEntry>, DatabaseError> {
        let entry = sqlx::query_as::<_, WhitelistEntry>(
            "SELECT * FROM whitelist_entries
             WHERE owner_identity_id = ? AND requester_canonical_id = ? AND status = 'active'",
        )
        .bind(owner_identity_id)
        .bind(requester_canonical_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(entry)
    }

    /// Delete an entry owned by `owner_identity_id`. Returns `false` when no
    /// such entry exists for that owner.
    pub async fn delete_whitelist_entry(
        &self,
        id: &str,
        owner_identity_id: &str,
    ) -> Result<bool, DatabaseError> {
        let result =
            sqlx::query("DELETE FROM whitelist_entries WHERE id = ? AND owner_identity_id = ?")
                .bind(id)
                .bind(owner_identity_id)
                .execute(self.pool())
                .await?;

        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Connection request queries
    // =========================================================================

    /// Store a pending connection request.
    pub async fn create_connection_request(
        &self,
        params: &NewConnectionRequest<'_>,
        now: i64,
    ) -> Result<ConnectionRequest, DatabaseError> {
        let request = sqlx::query_as::<_, ConnectionRequest>(
            "INSERT INTO connection_requests (id, owner_identity_id, requester_canonical_id,
                                              requester_display_id, requester_label, note,
                                              status, requested_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?)
             RETURNING *",
        )
        .bind(params.id)
        .bind(params.owner_identity_id)
        .bind(params.requester_canonical_id)
        .bind(params.requester_display_id)
        .bind(params.requester_label)
        .bind(params.note)
        .bind(now)
        .bind(params.expires_at)
        .fetch_one(self.pool())
        .await?;

        Ok(request)
    }

    /// Get a connection request by ID.
    pub async fn get_connection_request(
        &self,
        id: &str,
    ) -> Result<Option<ConnectionRequest>, DatabaseError> {
        let request =
            sqlx::query_as::<_, ConnectionRequest>("SELECT * FROM connection_requests WHERE id = ?")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;

        Ok(request)
    }

    /// The newest still-decidable request from `requester_canonical_id`.
    pub async fn find_open_connection_request(
        &self,
        owner_identity_id: &str,
        requester_canonical_id: &str,
        now: i64,
    ) -> Result<Option<ConnectionRequest>, DatabaseError> {
        let request = sqlx::query_as::<_, ConnectionRequest>(
            "SELECT * FROM connection_requests
             WHERE owner_identity_id = ? AND requester_canonical_id = ?
               AND status = 'pending' AND expires_at > ?
             ORDER BY requested_at DESC, rowid DESC
             LIMIT 1",
        )
        .bind(owner_identity_id)
        .bind(requester_canonical_id)
        .bind(now)
        .fetch_optional(self.pool())
        .await?;

        Ok(request)
    }

    /// An owner's requests, newest first, optionally restricted to one
    /// stored status.
    pub async fn list_connection_requests(
        &self,
        owner_identity_id: &str,
        status: Option<RequestStatus>,
        limit: i64,
    ) -> Result<Vec<ConnectionRequest>, DatabaseError> {
        let requests = sqlx::query_as::<_, ConnectionRequest>(
            "SELECT * FROM connection_requests
             WHERE owner_identity_id = ? AND (? IS NULL OR status = ?)
             ORDER BY requested_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(owner_identity_id)
        .bind(status.map(RequestStatus::as_str))
        .bind(status.map(RequestStatus::as_str))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(requests)
    }

    /// Decide a pending, unexpired request in one transaction.
    ///
    /// An approval also adds (or reactivates) the requester's whitelist
    /// entry, whose `id` is taken from `entry` on insert. Returns `None` (and
    /// changes nothing) if the request is not pending, has expired, or is
    /// not owned by `owner_identity_id`.
    pub async fn decide_connection_request(
        &self,
        id: &str,
        owner_identity_id: &str,
        outcome: RequestStatus,
        decision_note: Option<&str>,
        entry_id: &str,
        now: i64,
    ) -> Result<Option<(ConnectionRequest, Option<WhitelistEntry>)>, DatabaseError> {
        let mut tx = self.pool().begin().await?;

        let decided = sqlx::query_as::<_, ConnectionRequest>(
            "UPDATE connection_requests
             SET status = ?, decided_at = ?, decision_note = ?, decided_by_identity_id = ?
             WHERE id = ? AND owner_identity_id = ? AND status = 'pending' AND expires_at > ?
             RETURNING *",
        )
        .bind(outcome.as_str())
        .bind(now)
        .bind(decision_note)
        .bind(owner_identity_id)
        .bind(id)
        .bind(owner_identity_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(decided) = decided else {
            tx.rollback().await?;
            return Ok(None);
        };

        let entry = if outcome == RequestStatus::Approved {
            let entry = upsert_entry(
                &mut tx,
                &NewWhitelistEntry {
                    id: entry_id,
                    owner_identity_id,
                    requester_canonical_id: &decided.requester_canonical_id,
                    requester_display_id: &decided.requester_display_id,
                    label: decided.requester_label.as_deref(),
                    created_by_identity_id: owner_identity_id,
                },
                now,
            )
            .await?;
            Some(entry)
        } else {
            None
        };

        tx.commit().await?;
        Ok(Some((decided, entry)))
    }

    /// Mark a pending request whose expiry has passed as `expired`.
    pub async fn expire_connection_request(
        &self,
        id: &str,
        decided_by_identity_id: &str,
        now: i64,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE connection_requests
             SET status = 'expired', decided_at = ?, decided_by_identity_id = ?
             WHERE id = ? AND status = 'pending' AND expires_at <= ?",
        )
        .bind(now)
        .bind(decided_by_identity_id)
        .bind(id)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // ACL sync queries
    // =========================================================================

    /// Record a completed ACL sync. `payload` is JSON text.
    pub async fn insert_acl_sync_event(
        &self,
        id: &str,
        owner_identity_id: &str,
        requested_by_identity_id: &str,
        payload: &str,
        now: i64,
    ) -> Result<AclSyncEvent, DatabaseError> {
        let event = sqlx::query_as::<_, AclSyncEvent>(
            "INSERT INTO acl_sync_events (id, owner_identity_id, requested_by_identity_id,
                                          request_payload, result_status, created_at, completed_at)
             VALUES (?, ?, ?, ?, 'completed', ?, ?)
             RETURNING *",
        )
        .bind(id)
        .bind(owner_identity_id)
        .bind(requested_by_identity_id)
        .bind(payload)
        .bind(now)
        .bind(now)
        .fetch_one(self.pool())
        .await?;

        Ok(event)
    }

    /// An owner's sync history, newest first.
    pub async fn list_acl_sync_events(
        &self,
        owner_identity_id: &str,
        limit: i64,
    ) -> Result<Vec<AclSyncEvent>, DatabaseError> {
        let events = sqlx::query_as::<_, AclSyncEvent>(
            "SELECT * FROM acl_sync_events WHERE owner_identity_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(owner_identity_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(events)
    }
}
