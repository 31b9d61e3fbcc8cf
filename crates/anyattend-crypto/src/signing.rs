//! Command envelope signing.
//!
//! The signed message is the compact JSON encoding of
//! `{id, device_id, type, payload, nonce, expires_at}` in exactly that key
//! order, with payload keys sorted at every depth. The signature is
//! HMAC-SHA256 over those bytes with a secret shared between the backend and
//! its agents, rendered as lowercase hex.

use anyattend_core::{CommandEnvelope, CommandType, Payload};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// The fields covered by a command signature.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SignedFields<'a> {
    pub id: &'a str,
    pub device_id: &'a str,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    pub payload: &'a Payload,
    pub nonce: &'a str,
    pub expires_at: &'a str,
}

impl<'a> SignedFields<'a> {
    /// View a received envelope as signed fields for `device_id`.
    pub fn from_envelope(envelope: &'a CommandEnvelope, device_id: &'a str) -> Self {
        Self {
            id: &envelope.id,
            device_id,
            command_type: envelope.command_type,
            payload: &envelope.payload,
            nonce: &envelope.nonce,
            expires_at: &envelope.expires_at,
        }
    }
}

/// Deterministic byte encoding of the signed fields.
pub fn canonical_encoding(fields: &SignedFields<'_>) -> Result<Vec<u8>, CryptoError> {
    serde_json::to_vec(fields).map_err(|e| CryptoError::SerializationError(e.to_string()))
}

/// Signs and verifies command envelopes with a shared secret.
#[derive(Clone)]
pub struct CommandSigner {
    key: Vec<u8>,
}

impl std::fmt::Debug for CommandSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSigner").finish_non_exhaustive()
    }
}

impl CommandSigner {
    pub fn new(secret: &[u8]) -> Result<Self, CryptoError> {
        if secret.is_empty() {
            return Err(CryptoError::EmptyKey);
        }
        Ok(Self {
            key: secret.to_vec(),
        })
    }

    fn mac(&self, fields: &SignedFields<'_>) -> Result<HmacSha256, CryptoError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        mac.update(&canonical_encoding(fields)?);
        Ok(mac)
    }

    /// Sign the fields, returning lowercase hex.
    pub fn sign(&self, fields: &SignedFields<'_>) -> Result<String, CryptoError> {
        Ok(hex::encode(self.mac(fields)?.finalize().into_bytes()))
    }

    /// Recompute the signature and compare in constant time.
    ///
    /// Malformed hex, wrong length, or any encoding failure verify as false.
    pub fn verify(&self, fields: &SignedFields<'_>, signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        self.mac(fields)
            .is_ok_and(|mac| mac.verify_slice(&expected).is_ok())
    }

    /// Verify a received envelope as addressed to `device_id`.
    pub fn verify_envelope(&self, envelope: &CommandEnvelope, device_id: &str) -> bool {
        self.verify(
            &SignedFields::from_envelope(envelope, device_id),
            &envelope.signature,
        )
    }
}
