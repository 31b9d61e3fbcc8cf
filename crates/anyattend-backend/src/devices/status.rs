//! Device heartbeats and alerts.

use anyattend_core::db::unix_timestamp;
use anyattend_core::time::parse_timestamp;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::pairing::MAX_HOST_LEN;
use crate::error::{Result, ServiceError};
use crate::events::{DeviceEventType, EventLog, OwnerNotification};
use crate::storage::{BackendDatabase, Device, DeviceStatus};

/// Periodic status report from an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub host: String,
    pub status: DeviceStatus,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Out-of-band alert from an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub host: String,
    /// RFC 3339 instant the agent observed the condition.
    pub timestamp: String,
    /// `healthy` maps the device to online; anything else to critical.
    pub status: String,
    pub action_taken: String,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

fn check_host(host: &str) -> Result<()> {
    if (1..=MAX_HOST_LEN).contains(&host.chars().count()) {
        Ok(())
    } else {
        Err(ServiceError::Validation(format!(
            "host must be 1 to {MAX_HOST_LEN} characters"
        )))
    }
}

/// Records device-originated status reports.
#[derive(Clone)]
pub struct DeviceStatusService {
    db: BackendDatabase,
    events: EventLog,
}

impl DeviceStatusService {
    pub const fn new(db: BackendDatabase, events: EventLog) -> Self {
        Self { db, events }
    }

    #[instrument(skip_all, fields(device_id = %device.id))]
    pub async fn heartbeat(&self, device: &Device, report: &Heartbeat) -> Result<()> {
        check_host(&report.host)?;

        self.db
            .record_device_status(&device.id, Some(&report.host), report.status, unix_timestamp())
            .await?;
        self.events
            .record(
                &device.id,
                DeviceEventType::Heartbeat,
                &serde_json::to_value(report)?,
            )
            .await;

        debug!(status = report.status.as_str(), "Heartbeat recorded");
        Ok(())
    }

    #[instrument(skip_all, fields(device_id = %device.id))]
    pub async fn alert(&self, device: &Device, report: &Alert) -> Result<()> {
        check_host(&report.host)?;
        if report.status.trim().is_empty() || report.action_taken.trim().is_empty() {
            return Err(ServiceError::Validation(
                "status and action_taken are required".to_string(),
            ));
        }
        if parse_timestamp(&report.timestamp).is_none() {
            return Err(ServiceError::Validation(
                "timestamp must be an RFC 3339 instant".to_string(),
            ));
        }

        let status = if report.status == "healthy" {
            DeviceStatus::Online
        } else {
            DeviceStatus::Critical
        };
        self.db
            .record_device_status(&device.id, Some(&report.host), status, unix_timestamp())
            .await?;
        self.events
            .record(&device.id, DeviceEventType::Alert, &serde_json::to_value(report)?)
            .await;
        self.events
            .notify_owner(OwnerNotification {
                owner_identity_id: device.owner_identity_id.clone(),
                device_id: Some(device.id.clone()),
                event_type: DeviceEventType::Alert.as_str().to_string(),
                title: "Anyattend Alert".to_string(),
                body: format!("{}: {}", device.label, report.action_taken),
            })
            .await;

        info!(reported = %report.status, status = status.as_str(), "Alert recorded");
        Ok(())
    }
}
