//! Anyattend Agent Library
//!
//! Device-side half of the command protocol:
//! - Agent configuration (device id, poll interval, shared signing secret)
//! - Offline verification of signed command envelopes
//! - The poll cycle: verify, execute, acknowledge, and keep polling

pub mod channel;
pub mod config;
pub mod error;
pub mod executor;
pub mod verifier;
pub mod worker;

pub use channel::CommandChannel;
pub use config::AgentConfig;
pub use error::AgentError;
pub use executor::{CommandExecutor, ExecutionOutcome, StatusOnlyExecutor};
pub use verifier::{CommandVerifier, Verdict};
pub use worker::{AgentWorker, CycleReport};
