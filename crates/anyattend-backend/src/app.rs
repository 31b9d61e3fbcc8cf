//! Service wiring.

use std::sync::Arc;

use anyattend_core::BackendConfig;

use crate::auth::{AdminSessionService, OwnershipChallengeService};
use crate::commands::CommandLifecycle;
use crate::devices::{DeviceDirectory, DeviceStatusService, DeviceTokenService, PairingService};
use crate::error::{Result, ServiceError};
use crate::events::{EventLog, EventSink};
use crate::identity::IdentityRegistry;
use crate::storage::BackendDatabase;
use crate::whitelist::{AclSync, ConnectionRequestService, WhitelistService};

/// Every backend service, built over one database and one configuration.
#[derive(Clone)]
pub struct Backend {
    pub config: Arc<BackendConfig>,
    pub db: BackendDatabase,
    pub identities: IdentityRegistry,
    pub sessions: AdminSessionService,
    pub challenges: OwnershipChallengeService,
    pub tokens: DeviceTokenService,
    pub pairing: PairingService,
    pub status: DeviceStatusService,
    pub directory: DeviceDirectory,
    pub commands: CommandLifecycle,
    pub whitelist: WhitelistService,
    pub requests: ConnectionRequestService,
    pub events: EventLog,
}

impl Backend {
    /// Validate the configuration and build the services.
    pub fn new(db: BackendDatabase, config: BackendConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;
        Self::build(db, Arc::new(config), sink)
    }

    pub(crate) fn build(
        db: BackendDatabase,
        config: Arc<BackendConfig>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let events = EventLog::new(db.clone(), sink);
        let identities = IdentityRegistry::new(db.clone());
        let sessions = AdminSessionService::new(db.clone(), identities.clone(), config.clone());
        let challenges = OwnershipChallengeService::new(
            db.clone(),
            identities.clone(),
            sessions.clone(),
            events.clone(),
            config.clone(),
        );
        let tokens = DeviceTokenService::new(db.clone(), config.device_token_bytes);
        let pairing = PairingService::new(
            db.clone(),
            identities.clone(),
            tokens.clone(),
            events.clone(),
            config.clone(),
        );
        let status = DeviceStatusService::new(db.clone(), events.clone());
        let directory = DeviceDirectory::new(db.clone(), events.clone());
        let commands = CommandLifecycle::new(db.clone(), events.clone(), config.clone())?;
        let acl = AclSync::new(db.clone(), events.clone());
        let whitelist = WhitelistService::new(db.clone(), acl.clone());
        let requests =
            ConnectionRequestService::new(db.clone(), events.clone(), acl, config.clone());

        Ok(Self {
            config,
            db,
            identities,
            sessions,
            challenges,
            tokens,
            pairing,
            status,
            directory,
            commands,
            whitelist,
            requests,
            events,
        })
    }
}
