//! Identity records, roles, and legacy principals.

use tracing::{debug, info};

use crate::error::{Result, ServiceError};
use crate::identity::normalize::{NormalizedId, normalize};
use crate::storage::{BackendDatabase, Identity, LegacyAdmin, Role};

/// Domain of the synthetic email given to legacy principals.
const LEGACY_EMAIL_DOMAIN: &str = "anyattend.local";

/// Creates and looks up identities by their numeric ID.
#[derive(Clone)]
pub struct IdentityRegistry {
    db: BackendDatabase,
}

impl IdentityRegistry {
    pub const fn new(db: BackendDatabase) -> Self {
        Self { db }
    }

    /// Create the identity if absent, else refresh its display form.
    pub async fn upsert(&self, id: &NormalizedId) -> Result<Identity> {
        let new_id = uuid::Uuid::new_v4().to_string();
        let identity = self
            .db
            .upsert_identity(&new_id, &id.canonical, &id.display)
            .await?;
        if identity.id == new_id {
            info!(identity_id = %identity.id, "Identity created");
        }
        Ok(identity)
    }

    /// Normalise a raw ID, upsert it, and make sure it holds both roles.
    pub async fn register(&self, raw: &str) -> Result<Identity> {
        let id = normalize(raw)?;
        let identity = self.upsert(&id).await?;
        self.db.ensure_identity_roles(&identity.id).await?;
        Ok(identity)
    }

    pub async fn get(&self, identity_id: &str) -> Result<Identity> {
        Ok(self.db.get_identity(identity_id).await?)
    }

    /// Look up an existing identity from a raw ID without creating one.
    pub async fn find(&self, raw: &str) -> Result<Option<Identity>> {
        let id = normalize(raw)?;
        Ok(self.db.get_identity_by_canonical(&id.canonical).await?)
    }

    pub async fn roles(&self, identity_id: &str) -> Result<Vec<Role>> {
        let names = self.db.list_identity_roles(identity_id).await?;
        names
            .iter()
            .map(|name| name.parse().map_err(ServiceError::Internal))
            .collect()
    }

    /// Make `role` the identity's active role. Fails with `NotFound` if the
    /// identity does not hold it.
    pub async fn activate_role(&self, identity_id: &str, role: Role) -> Result<Identity> {
        if !self.db.set_active_role(identity_id, role).await? {
            return Err(ServiceError::NotFound(format!(
                "Role {} for identity {identity_id}",
                role.as_str()
            )));
        }
        debug!(identity_id, role = role.as_str(), "Active role switched");
        self.get(identity_id).await
    }

    /// The legacy admin principal linked to this identity, created on first
    /// use.
    pub async fn legacy_principal(&self, identity: &Identity) -> Result<LegacyAdmin> {
        if let Some(admin_id) = &identity.legacy_admin_id {
            if let Some(admin) = self.db.get_legacy_admin(admin_id).await? {
                return Ok(admin);
            }
        }

        let email = format!("id-{}@{LEGACY_EMAIL_DOMAIN}", identity.canonical_id);
        let admin = self
            .db
            .link_legacy_admin(&identity.id, &uuid::Uuid::new_v4().to_string(), &email)
            .await?;
        debug!(identity_id = %identity.id, admin_id = %admin.id, "Legacy principal linked");
        Ok(admin)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    async fn registry() -> IdentityRegistry {
        IdentityRegistry::new(BackendDatabase::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn register_is_idempotent_across_formats() {
        let reg = registry().await;
        let a = reg.register("806-716-144").await.unwrap();
        let b = reg.register(" 806 716 144").await.unwrap();

        assert_eq!(a.id, b.id);
        assert_eq!(a.canonical_id, "806716144");
        assert_eq!(b.display_id, "806 716 144");
        assert_eq!(reg.roles(&a.id).await.unwrap(), vec![Role::Admin, Role::Connectee]);
    }

    #[tokio::test]
    async fn register_rejects_bad_input() {
        let reg = registry().await;
        let err = reg.register("12-34").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn find_does_not_create() {
        let reg = registry().await;
        assert!(reg.find("806716144").await.unwrap().is_none());
        reg.register("806716144").await.unwrap();
        assert!(reg.find("806-716-144").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn activate_role_requires_holding_it() {
        let reg = registry().await;
        let id = reg.upsert(&normalize("806716144").unwrap()).await.unwrap();

        let err = reg.activate_role(&id.id, Role::Admin).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let registered = reg.register("806716144").await.unwrap();
        let switched = reg.activate_role(&registered.id, Role::Admin).await.unwrap();
        assert_eq!(switched.active_role, "admin");
    }

    #[tokio::test]
    async fn legacy_principal_is_created_once() {
        let reg = registry().await;
        let identity = reg.register("806716144").await.unwrap();

        let first = reg.legacy_principal(&identity).await.unwrap();
        assert_eq!(first.email, "id-806716144@anyattend.local");

        let reloaded = reg.get(&identity.id).await.unwrap();
        let second = reg.legacy_principal(&reloaded).await.unwrap();
        assert_eq!(first.id, second.id);
    }
}
