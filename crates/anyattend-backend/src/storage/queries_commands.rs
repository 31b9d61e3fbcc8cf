//! Command queries.

use anyattend_core::db::DatabaseError;

use super::db::BackendDatabase;
use super::models::{Command, CommandStatus};

/// Parameters for storing a signed command.
pub struct NewCommand<'a> {
    pub id: &'a str,
    pub device_id: &'a str,
    pub command_type: &'a str,
    /// JSON-encoded payload.
    pub payload: &'a str,
    pub nonce: &'a str,
    pub signature: &'a str,
    pub issued_by: &'a str,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl BackendDatabase {
    /// Store a command as `pending`, assigning the next issuance sequence
    /// number.
    pub async fn insert_command(&self, params: &NewCommand<'_>) -> Result<Command, DatabaseError> {
        let command = sqlx::query_as::<_, Command>(
            "INSERT INTO commands (id, seq, device_id, command_type, payload, nonce, signature,
                                   status, issued_by, issued_at, expires_at)
             VALUES (?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM commands), ?, ?, ?, ?, ?,
                     'pending', ?, ?, ?)
             RETURNING *",
        )
        .bind(params.id)
        .bind(params.device_id)
        .bind(params.command_type)
        .bind(params.payload)
        .bind(params.nonce)
        .bind(params.signature)
        .bind(params.issued_by)
        .bind(params.issued_at)
        .bind(params.expires_at)
        .fetch_one(self.pool())
        .await?;

        Ok(command)
    }

    /// Get a command by ID.
    pub async fn get_command(&self, id: &str) -> Result<Command, DatabaseError> {
        sqlx::query_as::<_, Command>("SELECT * FROM commands WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Command {id}")))
    }

    /// Select and mark deliverable commands as `dispatched` in one statement.
    ///
    /// Deliverable means unexpired and either `pending`, or `dispatched` at or
    /// before `redelivery_cutoff`. When `since` is given only commands issued
    /// after it are considered. Results are ordered oldest first.
    pub async fn dispatch_commands(
        &self,
        device_id: &str,
        now: i64,
        redelivery_cutoff: i64,
        since: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Command>, DatabaseError> {
        let mut commands = sqlx::query_as::<_, Command>(
            "UPDATE commands SET status = 'dispatched', dispatched_at = ?
             WHERE id IN (
                 SELECT id FROM commands
                 WHERE device_id = ?
                   AND expires_at > ?
                   AND (status = 'pending' OR (status = 'dispatched' AND dispatched_at <= ?))
                   AND (? IS NULL OR issued_at > ?)
                 ORDER BY issued_at, seq
                 LIMIT ?
             )
             RETURNING *",
        )
        .bind(now)
        .bind(device_id)
        .bind(now)
        .bind(redelivery_cutoff)
        .bind(since)
        .bind(since)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        // RETURNING row order is unspecified.
        commands.sort_by_key(|c| (c.issued_at, c.seq));
        Ok(commands)
    }

    /// Record an acknowledgement from the owning device.
    ///
    /// Only a non-terminal command belonging to `device_id` is updated. A
    /// command whose expiry has passed is stored as `expired` regardless of
    /// the reported outcome. Returns `None` when nothing matched.
    pub async fn ack_command(
        &self,
        id: &str,
        device_id: &str,
        status: CommandStatus,
        message: Option<&str>,
        now: i64,
    ) -> Result<Option<Command>, DatabaseError> {
        let command = sqlx::query_as::<_, Command>(
            "UPDATE commands
             SET status = CASE WHEN expires_at <= ? THEN 'expired' ELSE ? END,
                 acked_at = ?,
                 ack_message = ?
             WHERE id = ? AND device_id = ? AND status IN ('pending', 'dispatched')
             RETURNING *",
        )
        .bind(now)
        .bind(status.as_str())
        .bind(now)
        .bind(message)
        .bind(id)
        .bind(device_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(command)
    }

    /// A device's most recent commands, newest first.
    pub async fn list_recent_commands(
        &self,
        device_id: &str,
        limit: i64,
    ) -> Result<Vec<Command>, DatabaseError> {
        let commands = sqlx::query_as::<_, Command>(
            "SELECT * FROM commands WHERE device_id = ? ORDER BY issued_at DESC, seq DESC LIMIT ?",
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(commands)
    }
}
