//! One-time secret queries: ownership challenges, pairing sessions, and
//! admin refresh sessions.

use anyattend_core::db::{DatabaseError, unix_timestamp};
use sqlx::SqliteConnection;

use super::db::BackendDatabase;
use super::models::{AdminSession, OwnershipChallenge, PairingSession, Role};
use super::queries_identity::grant_identity_roles;

/// Parameters for storing an ownership challenge.
pub struct NewChallenge<'a> {
    pub id: &'a str,
    pub identity_id: &'a str,
    pub device_id: Option<&'a str>,
    pub code_hash: &'a str,
    pub expires_at: i64,
}

/// Parameters for storing a pairing session.
pub struct NewPairingSession<'a> {
    pub id: &'a str,
    pub identity_id: &'a str,
    pub device_label: &'a str,
    pub code_hash: &'a str,
    pub expires_at: i64,
}

/// Mark an identity verified. The first verification timestamp and method
/// are kept; `promote` (if any) becomes the active role.
pub(super) async fn mark_identity_verified(
    conn: &mut SqliteConnection,
    identity_id: &str,
    now: i64,
    promote: Option<Role>,
) -> Result<(), DatabaseError> {
    sqlx::query(
        "UPDATE identities
         SET verified_at = COALESCE(verified_at, ?),
             verification_method = COALESCE(verification_method, 'ownership_challenge'),
             active_role = COALESCE(?, active_role),
             updated_at = ?
         WHERE id = ?",
    )
    .bind(now)
    .bind(promote.map(Role::as_str))
    .bind(now)
    .bind(identity_id)
    .execute(conn)
    .await?;

    Ok(())
}

/// Consume a challenge if it is still unconsumed and unexpired.
pub(super) async fn consume_challenge(
    conn: &mut SqliteConnection,
    challenge_id: &str,
    now: i64,
) -> Result<bool, DatabaseError> {
    let result = sqlx::query(
        "UPDATE ownership_challenges SET consumed_at = ?
         WHERE id = ? AND consumed_at IS NULL AND expires_at > ?",
    )
    .bind(now)
    .bind(challenge_id)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

impl BackendDatabase {
    // =========================================================================
    // Ownership challenge queries
    // =========================================================================

    /// Store a new ownership challenge.
    pub async fn create_challenge(
        &self,
        params: &NewChallenge<'_>,
    ) -> Result<OwnershipChallenge, DatabaseError> {
        sqlx::query(
            "INSERT INTO ownership_challenges (id, identity_id, device_id, code_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(params.id)
        .bind(params.identity_id)
        .bind(params.device_id)
        .bind(params.code_hash)
        .bind(params.expires_at)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        self.get_challenge(params.id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Challenge {}", params.id)))
    }

    /// Get a challenge by ID.
    pub async fn get_challenge(&self, id: &str) -> Result<Option<OwnershipChallenge>, DatabaseError> {
        let challenge = sqlx::query_as::<_, OwnershipChallenge>(
            "SELECT * FROM ownership_challenges WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(challenge)
    }

    /// Record a failed verification attempt.
    pub async fn increment_challenge_attempts(&self, id: &str) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE ownership_challenges SET attempts = attempts + 1 WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Unconsumed, unexpired challenges for an identity, newest first.
    pub async fn list_open_challenges(
        &self,
        identity_id: &str,
        now: i64,
    ) -> Result<Vec<OwnershipChallenge>, DatabaseError> {
        let challenges = sqlx::query_as::<_, OwnershipChallenge>(
            "SELECT * FROM ownership_challenges
             WHERE identity_id = ? AND consumed_at IS NULL AND expires_at > ?
             ORDER BY created_at DESC",
        )
        .bind(identity_id)
        .bind(now)
        .fetch_all(self.pool())
        .await?;

        Ok(challenges)
    }

    /// Atomically consume a challenge, grant the identity both roles, and
    /// mark it verified with the active role promoted to admin.
    ///
    /// Returns `false` (and changes nothing) if the challenge was already
    /// consumed or has expired.
    pub async fn consume_challenge_for_admin(
        &self,
        challenge_id: &str,
        identity_id: &str,
        now: i64,
    ) -> Result<bool, DatabaseError> {
        let mut tx = self.pool().begin().await?;

        if !consume_challenge(&mut tx, challenge_id, now).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        grant_identity_roles(&mut tx, identity_id).await?;
        mark_identity_verified(&mut tx, identity_id, now, Some(Role::Admin)).await?;

        tx.commit().await?;
        Ok(true)
    }

    // =========================================================================
    // Pairing session queries
    // =========================================================================

    /// Store a new pairing session.
    pub async fn create_pairing_session(
        &self,
        params: &NewPairingSession<'_>,
    ) -> Result<PairingSession, DatabaseError> {
        sqlx::query(
            "INSERT INTO pairing_sessions (id, identity_id, device_label, code_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(params.id)
        .bind(params.identity_id)
        .bind(params.device_label)
        .bind(params.code_hash)
        .bind(params.expires_at)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        self.get_pairing_session(params.id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Pairing session {}", params.id)))
    }

    /// Get a pairing session by ID.
    pub async fn get_pairing_session(
        &self,
        id: &str,
    ) -> Result<Option<PairingSession>, DatabaseError> {
        let session =
            sqlx::query_as::<_, PairingSession>("SELECT * FROM pairing_sessions WHERE id = ?")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;

        Ok(session)
    }

    // =========================================================================
    // Admin session queries
    // =========================================================================

    /// Store a refresh session.
    pub async fn create_admin_session(
        &self,
        id: &str,
        identity_id: &str,
        token_hash: &str,
        expires_at: i64,
        fingerprint: Option<&str>,
    ) -> Result<AdminSession, DatabaseError> {
        sqlx::query(
            "INSERT INTO admin_sessions (id, identity_id, token_hash, expires_at, fingerprint, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(identity_id)
        .bind(token_hash)
        .bind(expires_at)
        .bind(fingerprint)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        self.get_admin_session_by_hash(token_hash)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Admin session {id}")))
    }

    /// Get a refresh session by token hash, whatever its state.
    pub async fn get_admin_session_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<AdminSession>, DatabaseError> {
        let session = sqlx::query_as::<_, AdminSession>(
            "SELECT * FROM admin_sessions WHERE token_hash = ?",
        )
        .bind(token_hash)
        .fetch_optional(self.pool())
        .await?;

        Ok(session)
    }

    /// Revoke the live session with `old_hash` and store its replacement in
    /// one transaction.
    ///
    /// Returns `None` if no unrevoked, unexpired session had that hash; the
    /// replacement is not stored in that case.
    pub async fn rotate_admin_session(
        &self,
        old_hash: &str,
        now: i64,
        replacement: &AdminSession,
    ) -> Result<Option<AdminSession>, DatabaseError> {
        let mut tx = self.pool().begin().await?;

        let revoked = sqlx::query_as::<_, AdminSession>(
            "UPDATE admin_sessions SET revoked_at = ?
             WHERE token_hash = ? AND revoked_at IS NULL AND expires_at > ?
             RETURNING *",
        )
        .bind(now)
        .bind(old_hash)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(revoked) = revoked else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            "INSERT INTO admin_sessions (id, identity_id, token_hash, expires_at, fingerprint, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&replacement.id)
        .bind(&revoked.identity_id)
        .bind(&replacement.token_hash)
        .bind(replacement.expires_at)
        .bind(&replacement.fingerprint)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(AdminSession {
            identity_id: revoked.identity_id,
            created_at: now,
            revoked_at: None,
            ..replacement.clone()
        }))
    }

    /// Revoke a session by token hash. Idempotent; the first revocation
    /// time is kept.
    pub async fn revoke_admin_session(&self, token_hash: &str, now: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE admin_sessions SET revoked_at = COALESCE(revoked_at, ?) WHERE token_hash = ?",
        )
        .bind(now)
        .bind(token_hash)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
