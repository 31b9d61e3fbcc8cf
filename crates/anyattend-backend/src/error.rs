//! Service error taxonomy.

use anyattend_core::db::DatabaseError;
use anyattend_crypto::CryptoError;

/// Coarse error category callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Expired,
    Auth,
    Storage,
    Internal,
}

/// Errors returned by backend services.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Malformed input, rejected before storage is touched.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Already-used code or already-decided command.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Expired: {0}")]
    Expired(String),

    /// Bad device token, refresh token, access token, or signature.
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Storage error: {0}")]
    Storage(DatabaseError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Expired(_) => ErrorKind::Expired,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Text safe to show to an unauthenticated caller.
    ///
    /// Lookups never reveal whether the resource exists.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(msg) | Self::Conflict(msg) | Self::Expired(msg) => msg.clone(),
            Self::NotFound(_) => "invalid or expired".to_string(),
            Self::Auth(_) => "unauthorized".to_string(),
            Self::Storage(_) | Self::Internal(_) => "internal error".to_string(),
        }
    }
}

impl From<DatabaseError> for ServiceError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound(what) => Self::NotFound(what),
            other => Self::Storage(other),
        }
    }
}

impl From<CryptoError> for ServiceError {
    fn from(e: CryptoError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<anyattend_core::Error> for ServiceError {
    fn from(e: anyattend_core::Error) -> Self {
        match e {
            anyattend_core::Error::Payload(msg) => Self::Validation(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("JSON encoding failed: {e}"))
    }
}

impl From<jsonwebtoken::errors::Error> for ServiceError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        Self::Auth(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
