//! Command lifecycle.

pub mod lifecycle;

pub use lifecycle::{CommandLifecycle, IssuedCommand, effective_status, envelope_for};
