//! Owner-scoped device views for admins.

use serde::Serialize;

use crate::auth::AdminPrincipal;
use crate::error::{Result, ServiceError};
use crate::events::EventLog;
use crate::storage::{BackendDatabase, Command, Device, DeviceEvent};

const RECENT_COMMANDS: i64 = 20;

/// A device with its most recent commands.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceDetail {
    pub device: Device,
    pub recent_commands: Vec<Command>,
}

/// Load a device, treating one owned by someone else as absent.
pub(crate) async fn owned_device(
    db: &BackendDatabase,
    identity_id: &str,
    device_id: &str,
) -> Result<Device> {
    let device = db.get_device(device_id).await?;
    if device.owner_identity_id != identity_id {
        return Err(ServiceError::NotFound(format!("Device {device_id}")));
    }
    Ok(device)
}

#[derive(Clone)]
pub struct DeviceDirectory {
    db: BackendDatabase,
    events: EventLog,
}

impl DeviceDirectory {
    pub const fn new(db: BackendDatabase, events: EventLog) -> Self {
        Self { db, events }
    }

    pub async fn list_devices(&self, principal: &AdminPrincipal) -> Result<Vec<Device>> {
        Ok(self
            .db
            .list_devices_for_identity(&principal.identity_id)
            .await?)
    }

    pub async fn device_detail(
        &self,
        principal: &AdminPrincipal,
        device_id: &str,
    ) -> Result<DeviceDetail> {
        let device = owned_device(&self.db, &principal.identity_id, device_id).await?;
        let recent_commands = self
            .db
            .list_recent_commands(&device.id, RECENT_COMMANDS)
            .await?;
        Ok(DeviceDetail {
            device,
            recent_commands,
        })
    }

    /// Newest events first, at most `MAX_EVENT_PAGE`.
    pub async fn events(
        &self,
        principal: &AdminPrincipal,
        device_id: &str,
        limit: i64,
    ) -> Result<Vec<DeviceEvent>> {
        let device = owned_device(&self.db, &principal.identity_id, device_id).await?;
        self.events.list(&device.id, limit).await
    }
}
