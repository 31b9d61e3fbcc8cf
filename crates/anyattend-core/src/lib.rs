//! `Anyattend` Core Library
//!
//! Shared functionality for `Anyattend` components:
//! - Backend configuration resolution
//! - `SQLite` pool helpers and timestamp utilities
//! - Command payload values and the signed envelope wire shape
//! - Tracing initialisation
//! - Common error types

pub mod config;
pub mod db;
pub mod envelope;
pub mod error;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod payload;
pub mod time;
pub mod tracing_init;

pub use config::BackendConfig;
pub use envelope::{AckStatus, CommandEnvelope, CommandType};
pub use error::{Error, Result};
pub use payload::{Payload, PayloadValue};
