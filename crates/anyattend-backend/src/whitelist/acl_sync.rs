//! ACL sync: snapshot an owner's active whitelist and fan it out.

use anyattend_core::db::unix_timestamp;
use anyattend_core::time::format_timestamp;
use serde::Serialize;
use tracing::{info, instrument};

use crate::error::Result;
use crate::events::{DeviceEventType, EventLog, OwnerNotification};
use crate::storage::BackendDatabase;
use crate::telemetry::{ProtocolCounter, record};

/// One allowed requester as carried in a sync snapshot.
#[derive(Debug, Clone, Serialize)]
struct SnapshotEntry<'a> {
    anydesk_id: &'a str,
    normalized_anydesk_id: &'a str,
    label: Option<&'a str>,
}

/// Summary of a recorded sync.
#[derive(Debug, Clone, Serialize)]
pub struct AclSyncReport {
    pub sync_event_id: String,
    pub result_status: String,
    /// RFC 3339 UTC.
    pub created_at: String,
    pub completed_at: Option<String>,
    pub entries_synced: usize,
    pub devices_notified: usize,
}

/// Records ACL sync events and notifies the owner's devices.
#[derive(Clone)]
pub struct AclSync {
    db: BackendDatabase,
    events: EventLog,
}

impl AclSync {
    pub const fn new(db: BackendDatabase, events: EventLog) -> Self {
        Self { db, events }
    }

    /// Snapshot the owner's active whitelist into `acl_sync_events`, append
    /// an `acl_sync_requested` event to each of the owner's devices, and hand
    /// the owner a notification.
    ///
    /// Only the snapshot write can fail; device events and the notification
    /// are best-effort.
    #[instrument(skip(self))]
    pub async fn emit(&self, owner_identity_id: &str, requested_by: &str) -> Result<AclSyncReport> {
        let entries = self.db.list_active_whitelist_entries(owner_identity_id).await?;
        let snapshot: Vec<SnapshotEntry<'_>> = entries
            .iter()
            .map(|e| SnapshotEntry {
                anydesk_id: &e.requester_display_id,
                normalized_anydesk_id: &e.requester_canonical_id,
                label: e.label.as_deref(),
            })
            .collect();
        let payload = serde_json::json!({ "entries": snapshot }).to_string();

        let event = self
            .db
            .insert_acl_sync_event(
                &uuid::Uuid::new_v4().to_string(),
                owner_identity_id,
                requested_by,
                &payload,
                unix_timestamp(),
            )
            .await?;

        let devices = self.db.list_devices_for_identity(owner_identity_id).await?;
        for device in &devices {
            self.events
                .record(
                    &device.id,
                    DeviceEventType::AclSyncRequested,
                    &serde_json::json!({
                        "sync_event_id": event.id,
                        "whitelist_size": entries.len(),
                    }),
                )
                .await;
        }

        self.events
            .notify_owner(OwnerNotification {
                owner_identity_id: owner_identity_id.to_string(),
                device_id: None,
                event_type: DeviceEventType::AclSyncRequested.as_str().to_string(),
                title: "Whitelist sync".to_string(),
                body: format!("{} whitelist entries queued for sync", entries.len()),
            })
            .await;

        record(ProtocolCounter::AclSyncs, 1, "completed");
        info!(
            sync_event_id = %event.id,
            entries = entries.len(),
            devices = devices.len(),
            "ACL sync recorded"
        );

        Ok(AclSyncReport {
            sync_event_id: event.id,
            result_status: event.result_status,
            created_at: format_timestamp(event.created_at),
            completed_at: event.completed_at.map(format_timestamp),
            entries_synced: entries.len(),
            devices_notified: devices.len(),
        })
    }
}
