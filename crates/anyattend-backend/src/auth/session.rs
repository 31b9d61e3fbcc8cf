//! Admin sessions: refresh token rotation and access token issuance.

use std::sync::Arc;

use anyattend_core::BackendConfig;
use anyattend_core::db::unix_timestamp;
use anyattend_crypto::{hash_secret, random_token};
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::jwt::{AccessSubject, JwtManager};
use crate::error::{Result, ServiceError};
use crate::identity::IdentityRegistry;
use crate::storage::{AdminSession, BackendDatabase, Identity};
use crate::telemetry::{ProtocolCounter, record};

const REFRESH_TOKEN_BYTES: usize = 48;

/// Admin profile returned with every session grant.
#[derive(Debug, Clone, Serialize)]
pub struct AdminProfile {
    /// Legacy principal ID.
    pub id: String,
    pub identity_id: String,
    /// Display form of the numeric ID.
    pub anydesk_id: String,
    pub role: String,
    pub active_role: String,
}

/// Tokens handed to an admin client after verification or rotation.
#[derive(Debug, Clone, Serialize)]
pub struct SessionGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub admin: AdminProfile,
}

/// An authenticated admin, resolved from an access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminPrincipal {
    pub legacy_admin_id: String,
    pub identity_id: String,
    pub anydesk_id: String,
    pub display_anydesk_id: String,
    pub active_role: String,
}

/// Issues, rotates, and revokes admin refresh sessions.
#[derive(Clone)]
pub struct AdminSessionService {
    db: BackendDatabase,
    identities: IdentityRegistry,
    jwt: JwtManager,
    config: Arc<BackendConfig>,
}

impl AdminSessionService {
    pub fn new(db: BackendDatabase, identities: IdentityRegistry, config: Arc<BackendConfig>) -> Self {
        let jwt = JwtManager::new(config.jwt_secret.as_bytes(), config.access_token_ttl_secs);
        Self {
            db,
            identities,
            jwt,
            config,
        }
    }

    /// Trim and bound a client fingerprint; blank becomes `None`.
    pub fn normalize_fingerprint(&self, fingerprint: Option<&str>) -> Option<String> {
        let trimmed = fingerprint?.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(trimmed.chars().take(self.config.fingerprint_max_len).collect())
    }

    fn new_session_row(&self, fingerprint: Option<String>) -> (String, AdminSession) {
        let token = random_token(REFRESH_TOKEN_BYTES);
        let now = unix_timestamp();
        let row = AdminSession {
            id: uuid::Uuid::new_v4().to_string(),
            identity_id: String::new(),
            token_hash: hash_secret(&token),
            expires_at: now + self.config.refresh_token_ttl_secs(),
            fingerprint,
            revoked_at: None,
            created_at: now,
        };
        (token, row)
    }

    /// Store a new refresh session and return the raw token.
    pub async fn create_session(&self, identity_id: &str, fingerprint: Option<&str>) -> Result<String> {
        let (token, row) = self.new_session_row(self.normalize_fingerprint(fingerprint));
        self.db
            .create_admin_session(
                &row.id,
                identity_id,
                &row.token_hash,
                row.expires_at,
                row.fingerprint.as_deref(),
            )
            .await?;
        info!(identity_id, session_id = %row.id, "Admin session created");
        Ok(token)
    }

    fn access_token(&self, identity: &Identity, legacy_admin_id: &str) -> Result<String> {
        let (token, _ttl) = self.jwt.issue_access_token(&AccessSubject {
            legacy_admin_id,
            identity_id: &identity.id,
            anydesk_id: &identity.canonical_id,
            display_anydesk_id: &identity.display_id,
        })?;
        Ok(token)
    }

    fn build_grant(
        identity: &Identity,
        legacy_admin_id: String,
        access_token: String,
        refresh_token: String,
    ) -> SessionGrant {
        SessionGrant {
            access_token,
            refresh_token,
            admin: AdminProfile {
                id: legacy_admin_id,
                identity_id: identity.id.clone(),
                anydesk_id: identity.display_id.clone(),
                role: "admin".to_string(),
                active_role: identity.active_role.clone(),
            },
        }
    }

    /// Open a session for a verified identity.
    #[instrument(skip(self, identity, fingerprint), fields(identity_id = %identity.id))]
    pub async fn grant(&self, identity: &Identity, fingerprint: Option<&str>) -> Result<SessionGrant> {
        let legacy = self.identities.legacy_principal(identity).await?;
        let refresh_token = self.create_session(&identity.id, fingerprint).await?;
        let access_token = self.access_token(identity, &legacy.id)?;
        Ok(Self::build_grant(identity, legacy.id, access_token, refresh_token))
    }

    /// Exchange a refresh token for a new grant.
    ///
    /// The presented token is revoked in the same transaction that stores its
    /// replacement. Returns `None` if it is unknown, revoked, or expired.
    #[instrument(skip_all)]
    pub async fn rotate(
        &self,
        refresh_token: &str,
        fingerprint: Option<&str>,
    ) -> Result<Option<SessionGrant>> {
        let now = unix_timestamp();
        let (token, replacement) = self.new_session_row(self.normalize_fingerprint(fingerprint));

        let Some(session) = self
            .db
            .rotate_admin_session(&hash_secret(refresh_token), now, &replacement)
            .await?
        else {
            record(ProtocolCounter::SessionRotations, 1, "rejected");
            warn!("Refresh token rejected");
            return Ok(None);
        };

        let identity = self.identities.get(&session.identity_id).await?;
        let legacy = self.identities.legacy_principal(&identity).await?;
        let access_token = self.access_token(&identity, &legacy.id)?;

        record(ProtocolCounter::SessionRotations, 1, "rotated");
        info!(identity_id = %identity.id, session_id = %session.id, "Admin session rotated");
        Ok(Some(Self::build_grant(&identity, legacy.id, access_token, token)))
    }

    /// Like [`rotate`](Self::rotate), failing with `Auth` instead of `None`.
    pub async fn refresh(&self, refresh_token: &str, fingerprint: Option<&str>) -> Result<SessionGrant> {
        self.rotate(refresh_token, fingerprint)
            .await?
            .ok_or_else(|| ServiceError::Auth("invalid refresh token".to_string()))
    }

    /// Revoke a refresh token. Unknown or already revoked tokens are ignored.
    pub async fn revoke(&self, refresh_token: &str) -> Result<()> {
        if self
            .db
            .revoke_admin_session(&hash_secret(refresh_token), unix_timestamp())
            .await?
        {
            info!("Admin session revoked");
        }
        Ok(())
    }

    /// Resolve the admin behind an access token.
    pub async fn authenticate(&self, access_token: &str) -> Result<AdminPrincipal> {
        let claims = self.jwt.validate(access_token)?;
        if !claims.is_access() {
            return Err(ServiceError::Auth("not an access token".to_string()));
        }

        let identity = self
            .identities
            .get(&claims.identity_id)
            .await
            .map_err(|e| match e {
                ServiceError::NotFound(_) => ServiceError::Auth("unknown identity".to_string()),
                other => other,
            })?;

        Ok(AdminPrincipal {
            legacy_admin_id: claims.sub,
            identity_id: identity.id,
            anydesk_id: identity.canonical_id,
            display_anydesk_id: identity.display_id,
            active_role: identity.active_role,
        })
    }
}
