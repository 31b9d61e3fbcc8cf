//! Device bearer credentials.

use anyattend_crypto::{constant_time_str_eq, hash_secret, random_token};
use tracing::debug;

use crate::error::{Result, ServiceError};
use crate::storage::{BackendDatabase, Device};

/// A freshly generated device token. `token` is shown to the agent once;
/// only `token_hash` is stored.
#[derive(Clone)]
pub struct IssuedToken {
    pub token: String,
    pub token_hash: String,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token_hash", &self.token_hash)
            .finish_non_exhaustive()
    }
}

/// Issues device tokens and resolves presented tokens to devices.
#[derive(Clone)]
pub struct DeviceTokenService {
    db: BackendDatabase,
    token_bytes: usize,
}

impl DeviceTokenService {
    pub const fn new(db: BackendDatabase, token_bytes: usize) -> Self {
        Self { db, token_bytes }
    }

    /// Generate a token of `byte_len` random bytes.
    pub fn issue_token(byte_len: usize) -> IssuedToken {
        let token = random_token(byte_len);
        let token_hash = hash_secret(&token);
        IssuedToken { token, token_hash }
    }

    /// Generate a token of the configured length.
    pub fn issue(&self) -> IssuedToken {
        Self::issue_token(self.token_bytes)
    }

    /// Find the device a token belongs to, or `None`.
    pub async fn resolve(&self, token: &str) -> Result<Option<Device>> {
        let token_hash = hash_secret(token);
        let device = self.db.get_device_by_token_hash(&token_hash).await?;
        Ok(device.filter(|d| constant_time_str_eq(&d.token_hash, &token_hash)))
    }

    /// Like [`resolve`](Self::resolve), failing with `Auth` on no match.
    pub async fn authenticate(&self, token: &str) -> Result<Device> {
        let device = self
            .resolve(token)
            .await?
            .ok_or_else(|| ServiceError::Auth("invalid device token".to_string()))?;
        debug!(device_id = %device.id, "Device authenticated");
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_hash_matches() {
        let issued = DeviceTokenService::issue_token(48);
        assert_eq!(issued.token_hash, hash_secret(&issued.token));
        assert_eq!(issued.token.len(), 64);
        assert!(!format!("{issued:?}").contains(&issued.token));
    }

    #[test]
    fn tokens_are_unique() {
        let a = DeviceTokenService::issue_token(32);
        let b = DeviceTokenService::issue_token(32);
        assert_ne!(a.token, b.token);
    }
}
