//! Anyattend Backend Library
//!
//! Core functionality for the Anyattend backend:
//! - SQLite storage for identities, devices, one-time secrets, and commands
//! - Ownership challenges, admin sessions, and JWT access tokens
//! - Device pairing, enrollment, bearer credentials, and status reports
//! - Signed command issuance, dispatch, and acknowledgement
//! - Device event log and owner notifications
//! - Owner whitelists, connection requests, and ACL sync events

pub mod app;
pub mod auth;
pub mod commands;
pub mod devices;
pub mod error;
pub mod events;
pub mod identity;
pub mod storage;
pub mod telemetry;
pub mod whitelist;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use app::Backend;
pub use error::{ErrorKind, Result, ServiceError};
