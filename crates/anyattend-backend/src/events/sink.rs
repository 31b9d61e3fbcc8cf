//! Owner notification delivery.
//!
//! Notifications are fire-and-forget from the caller's point of view: a
//! failed delivery is logged by [`EventLog`](super::EventLog) and never fails
//! the operation that raised it.

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

/// Errors a sink may report.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// The downstream channel rejected or dropped the message.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

/// A message for the owner of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerNotification {
    pub owner_identity_id: String,
    /// Absent for owner-level events such as connection requests.
    pub device_id: Option<String>,
    pub event_type: String,
    pub title: String,
    pub body: String,
}

/// Destination for owner notifications (push, webhook, ...).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, notification: &OwnerNotification) -> Result<(), NotificationError>;
}

/// Sink that only writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn deliver(&self, notification: &OwnerNotification) -> Result<(), NotificationError> {
        info!(
            owner_identity_id = %notification.owner_identity_id,
            device_id = ?notification.device_id,
            event_type = %notification.event_type,
            title = %notification.title,
            "Owner notification"
        );
        Ok(())
    }
}
