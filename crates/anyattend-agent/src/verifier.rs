//! Offline verification of received command envelopes.

use anyattend_core::CommandEnvelope;
use anyattend_core::time::parse_timestamp;
use anyattend_crypto::CommandSigner;

use crate::error::AgentError;

/// Whether a received command may be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    /// Past `expires_at`, or `expires_at` unparsable.
    Expired,
    BadSignature,
}

impl Verdict {
    /// Acknowledgement message for a rejected command.
    pub const fn rejection_message(self) -> Option<&'static str> {
        match self {
            Self::Accept => None,
            Self::Expired => Some("Command expired"),
            Self::BadSignature => Some("Invalid command signature"),
        }
    }
}

/// Checks envelopes addressed to one device against the shared secret.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    device_id: String,
    signer: CommandSigner,
}

impl CommandVerifier {
    pub fn new(device_id: impl Into<String>, secret: &[u8]) -> Result<Self, AgentError> {
        Ok(Self {
            device_id: device_id.into(),
            signer: CommandSigner::new(secret)?,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Expiry is checked before the signature.
    pub fn check(&self, envelope: &CommandEnvelope, now: i64) -> Verdict {
        match parse_timestamp(&envelope.expires_at) {
            Some(expires_at) if now < expires_at => {}
            _ => return Verdict::Expired,
        }
        if self.signer.verify_envelope(envelope, &self.device_id) {
            Verdict::Accept
        } else {
            Verdict::BadSignature
        }
    }
}
