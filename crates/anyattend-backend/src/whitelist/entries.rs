//! Owner-managed whitelist of requester IDs.

use anyattend_core::db::unix_timestamp;
use tracing::{info, instrument};

use super::acl_sync::{AclSync, AclSyncReport};
use crate::auth::AdminPrincipal;
use crate::error::{Result, ServiceError};
use crate::identity::normalize;
use crate::storage::{BackendDatabase, NewWhitelistEntry, WhitelistEntry};

pub const MAX_LABEL_LEN: usize = 80;

/// Trim a free-text field and enforce its length; blank becomes `None`.
pub(crate) fn optional_text<'a>(
    field: &str,
    value: Option<&'a str>,
    max: usize,
) -> Result<Option<&'a str>> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if value.chars().count() > max {
        return Err(ServiceError::Validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(Some(value))
}

#[derive(Clone)]
pub struct WhitelistService {
    db: BackendDatabase,
    acl: AclSync,
}

impl WhitelistService {
    pub const fn new(db: BackendDatabase, acl: AclSync) -> Self {
        Self { db, acl }
    }

    pub async fn list(&self, principal: &AdminPrincipal) -> Result<Vec<WhitelistEntry>> {
        Ok(self
            .db
            .list_whitelist_entries(&principal.identity_id)
            .await?)
    }

    /// Allow `raw_id` to connect. Adding an ID that is already listed
    /// refreshes its label and reactivates it.
    #[instrument(skip(self, principal, label), fields(owner = %principal.identity_id))]
    pub async fn upsert(
        &self,
        principal: &AdminPrincipal,
        raw_id: &str,
        label: Option<&str>,
    ) -> Result<WhitelistEntry> {
        let label = optional_text("label", label, MAX_LABEL_LEN)?;
        let requester = normalize(raw_id)?;

        let entry = self
            .db
            .upsert_whitelist_entry(
                &NewWhitelistEntry {
                    id: &uuid::Uuid::new_v4().to_string(),
                    owner_identity_id: &principal.identity_id,
                    requester_canonical_id: &requester.canonical,
                    requester_display_id: &requester.display,
                    label,
                    created_by_identity_id: &principal.identity_id,
                },
                unix_timestamp(),
            )
            .await?;

        info!(entry_id = %entry.id, requester = %entry.requester_canonical_id, "Whitelist entry saved");
        Ok(entry)
    }

    /// Remove one of the principal's entries. Someone else's entry is
    /// reported as absent.
    #[instrument(skip(self, principal), fields(owner = %principal.identity_id))]
    pub async fn remove(&self, principal: &AdminPrincipal, entry_id: &str) -> Result<()> {
        if !self
            .db
            .delete_whitelist_entry(entry_id, &principal.identity_id)
            .await?
        {
            return Err(ServiceError::NotFound(format!("Whitelist entry {entry_id}")));
        }
        info!(entry_id, "Whitelist entry removed");
        Ok(())
    }

    /// Push the current whitelist to the owner's devices.
    pub async fn sync(&self, principal: &AdminPrincipal) -> Result<AclSyncReport> {
        self.acl
            .emit(&principal.identity_id, &principal.identity_id)
            .await
    }
}
