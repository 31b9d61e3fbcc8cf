//! SQLite storage for the Anyattend backend.
//!
//! Provides persistence for identities, ownership challenges, pairing
//! sessions, devices, commands, admin sessions, the device event log, and
//! the per-owner whitelist with its connection requests and sync history.
//!
//! Every single-use consumption (challenge codes, pairing codes, refresh
//! tokens) is a conditional `UPDATE` whose `rows_affected()` decides the
//! winner, so concurrent attempts on the same secret produce exactly one
//! success.

mod db;
mod models;
mod queries_commands;
mod queries_devices;
mod queries_identity;
mod queries_secrets;
mod queries_whitelist;

#[cfg(test)]
mod tests;

pub use anyattend_core::db::DatabaseError;
pub use db::BackendDatabase;
pub use models::*;
pub use queries_commands::NewCommand;
pub use queries_devices::NewDevice;
pub use queries_secrets::{NewChallenge, NewPairingSession};
pub use queries_whitelist::{NewConnectionRequest, NewWhitelistEntry};
