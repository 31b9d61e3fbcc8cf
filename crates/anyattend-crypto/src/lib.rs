//! `Anyattend` Trust Primitives
//!
//! Everything the backend and the agent need to agree on byte-for-byte:
//!
//! - **Secrets**: CSPRNG one-time numeric codes, URL-safe bearer tokens,
//!   per-command nonces, and the SHA-256 digests that are the only form
//!   ever persisted
//! - **Signing**: canonical encoding of a command envelope and its
//!   HMAC-SHA256 signature, verified in constant time

pub mod error;
pub mod secrets;
pub mod signing;

pub use error::CryptoError;
pub use secrets::{
    CODE_DIGITS, constant_time_str_eq, create_nonce, hash_secret, is_numeric_code,
    random_numeric_code, random_token,
};
pub use signing::{CommandSigner, SignedFields, canonical_encoding};
