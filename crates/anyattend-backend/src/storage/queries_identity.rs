//! Identity, role, and legacy principal queries.

use anyattend_core::db::{DatabaseError, unix_timestamp};

use sqlx::SqliteConnection;

use super::db::BackendDatabase;
use super::models::{Identity, LegacyAdmin, Role};

/// Grant both roles to an identity. Idempotent.
pub(super) async fn grant_identity_roles(
    conn: &mut SqliteConnection,
    identity_id: &str,
) -> Result<(), DatabaseError> {
    for role in [Role::Connectee, Role::Admin] {
        sqlx::query("INSERT OR IGNORE INTO identity_roles (identity_id, role) VALUES (?, ?)")
            .bind(identity_id)
            .bind(role.as_str())
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

impl BackendDatabase {
    // =========================================================================
    // Identity queries
    // =========================================================================

    /// Create the identity for `canonical_id` if absent, else refresh its
    /// display form.
    ///
    /// `new_id` is only used when a row is inserted. Repeating the call with
    /// identical input leaves the row untouched (including `updated_at`).
    pub async fn upsert_identity(
        &self,
        new_id: &str,
        canonical_id: &str,
        display_id: &str,
    ) -> Result<Identity, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO identities (id, canonical_id, display_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (canonical_id) DO UPDATE
             SET display_id = excluded.display_id, updated_at = excluded.updated_at
             WHERE identities.display_id <> excluded.display_id",
        )
        .bind(new_id)
        .bind(canonical_id)
        .bind(display_id)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_identity_by_canonical(canonical_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Identity {canonical_id}")))
    }

    /// Get an identity by ID.
    pub async fn get_identity(&self, id: &str) -> Result<Identity, DatabaseError> {
        sqlx::query_as::<_, Identity>("SELECT * FROM identities WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Identity {id}")))
    }

    /// Find an identity by its canonical numeric ID.
    pub async fn get_identity_by_canonical(
        &self,
        canonical_id: &str,
    ) -> Result<Option<Identity>, DatabaseError> {
        let identity =
            sqlx::query_as::<_, Identity>("SELECT * FROM identities WHERE canonical_id = ?")
                .bind(canonical_id)
                .fetch_optional(self.pool())
                .await?;

        Ok(identity)
    }

    /// Grant both roles to an identity. Idempotent.
    pub async fn ensure_identity_roles(&self, identity_id: &str) -> Result<(), DatabaseError> {
        let mut conn = self.pool().acquire().await?;
        grant_identity_roles(&mut *conn, identity_id).await
    }

    /// List the roles held by an identity, alphabetically.
    pub async fn list_identity_roles(&self, identity_id: &str) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT role FROM identity_roles WHERE identity_id = ? ORDER BY role")
                .bind(identity_id)
                .fetch_all(self.pool())
                .await?;

        Ok(rows.into_iter().map(|(role,)| role).collect())
    }

    /// Switch the active role, only if the identity holds it.
    pub async fn set_active_role(&self, identity_id: &str, role: Role) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE identities SET active_role = ?, updated_at = ?
             WHERE id = ? AND EXISTS (SELECT 1 FROM identity_roles WHERE identity_id = ? AND role = ?)",
        )
        .bind(role.as_str())
        .bind(unix_timestamp())
        .bind(identity_id)
        .bind(identity_id)
        .bind(role.as_str())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Legacy principal queries
    // =========================================================================

    /// Get a legacy admin principal by ID.
    pub async fn get_legacy_admin(&self, id: &str) -> Result<Option<LegacyAdmin>, DatabaseError> {
        let admin = sqlx::query_as::<_, LegacyAdmin>("SELECT * FROM admins WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(admin)
    }

    /// Find or create the (inactive) legacy principal with `email`, and link
    /// it to the identity.
    pub async fn link_legacy_admin(
        &self,
        identity_id: &str,
        new_admin_id: &str,
        email: &str,
    ) -> Result<LegacyAdmin, DatabaseError> {
        let now = unix_timestamp();
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "INSERT OR IGNORE INTO admins (id, email, is_active, created_at) VALUES (?, ?, 0, ?)",
        )
        .bind(new_admin_id)
        .bind(email)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let admin = sqlx::query_as::<_, LegacyAdmin>("SELECT * FROM admins WHERE email = ?")
            .bind(email)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("UPDATE identities SET legacy_admin_id = ?, updated_at = ? WHERE id = ?")
            .bind(&admin.id)
            .bind(now)
            .bind(identity_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(admin)
    }
}
