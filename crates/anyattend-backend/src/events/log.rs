//! Append-only device event log.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::sink::{EventSink, OwnerNotification};
use crate::error::Result;
use crate::storage::{BackendDatabase, DeviceEvent};

/// Largest page `list` will return.
pub const MAX_EVENT_PAGE: i64 = 200;

/// Kinds of entries in a device's event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEventType {
    OwnershipChallengeIssued,
    PairingComplete,
    Heartbeat,
    Alert,
    AdminAction,
    CommandAck,
    AclSyncRequested,
}

impl DeviceEventType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OwnershipChallengeIssued => "ownership_challenge_issued",
            Self::PairingComplete => "pairing_complete",
            Self::Heartbeat => "heartbeat",
            Self::Alert => "alert",
            Self::AdminAction => "admin_action",
            Self::CommandAck => "command_ack",
            Self::AclSyncRequested => "acl_sync_requested",
        }
    }
}

impl fmt::Display for DeviceEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Writes device events and forwards owner notifications.
///
/// Both writes happen after the primary operation has committed, so failures
/// are logged and swallowed.
#[derive(Clone)]
pub struct EventLog {
    db: BackendDatabase,
    sink: Arc<dyn EventSink>,
}

impl EventLog {
    pub fn new(db: BackendDatabase, sink: Arc<dyn EventSink>) -> Self {
        Self { db, sink }
    }

    /// Append an event. Never fails the caller.
    pub async fn record(
        &self,
        device_id: &str,
        event_type: DeviceEventType,
        payload: &serde_json::Value,
    ) {
        let body = payload.to_string();
        match self
            .db
            .insert_device_event(device_id, event_type.as_str(), &body)
            .await
        {
            Ok(event) => debug!(device_id, event_id = event.id, %event_type, "Device event recorded"),
            Err(e) => warn!(device_id, %event_type, error = %e, "Failed to record device event"),
        }
    }

    /// Deliver a notification to the device owner. Never fails the caller.
    pub async fn notify_owner(&self, notification: OwnerNotification) {
        if let Err(e) = self.sink.deliver(&notification).await {
            warn!(
                device_id = ?notification.device_id,
                event_type = %notification.event_type,
                error = %e,
                "Owner notification failed"
            );
        }
    }

    /// A device's most recent events, newest first. `limit` is clamped to
    /// `1..=MAX_EVENT_PAGE`.
    pub async fn list(&self, device_id: &str, limit: i64) -> Result<Vec<DeviceEvent>> {
        let limit = limit.clamp(1, MAX_EVENT_PAGE);
        Ok(self.db.list_device_events(device_id, limit).await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::events::sink::NotificationError;

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<OwnerNotification>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn deliver(&self, n: &OwnerNotification) -> std::result::Result<(), NotificationError> {
            self.seen.lock().unwrap().push(n.clone());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl EventSink for FailingSink {
        async fn deliver(&self, _: &OwnerNotification) -> std::result::Result<(), NotificationError> {
            Err(NotificationError::Unavailable("offline".into()))
        }
    }

    fn notification() -> OwnerNotification {
        OwnerNotification {
            owner_identity_id: "i1".into(),
            device_id: Some("d1".into()),
            event_type: "alert".into(),
            title: "Device alert".into(),
            body: "AnyDesk service stopped".into(),
        }
    }

    #[tokio::test]
    async fn record_to_unknown_device_is_swallowed() {
        let db = BackendDatabase::open_in_memory().await.unwrap();
        let log = EventLog::new(db, Arc::new(RecordingSink::default()));

        log.record("missing", DeviceEventType::Heartbeat, &serde_json::json!({}))
            .await;
        assert!(log.list("missing", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn notifications_reach_the_sink() {
        let db = BackendDatabase::open_in_memory().await.unwrap();
        let sink = Arc::new(RecordingSink::default());
        let log = EventLog::new(db, sink.clone());

        log.notify_owner(notification()).await;
        assert_eq!(sink.seen.lock().unwrap().as_slice(), &[notification()]);
    }

    #[tokio::test]
    async fn failing_sink_does_not_propagate() {
        let db = BackendDatabase::open_in_memory().await.unwrap();
        let log = EventLog::new(db, Arc::new(FailingSink));
        log.notify_owner(notification()).await;
    }
}
