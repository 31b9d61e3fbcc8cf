//! Local command execution.

use anyattend_core::{CommandEnvelope, CommandType};
use async_trait::async_trait;

/// Longest message reported back with an acknowledgement.
pub const MAX_OUTCOME_MESSAGE_LEN: usize = 350;

/// What happened when a command ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub message: String,
}

impl ExecutionOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(true, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(false, message)
    }

    fn new(success: bool, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self {
            success,
            message: message.chars().take(MAX_OUTCOME_MESSAGE_LEN).collect(),
        }
    }
}

/// Runs a verified command on the host.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, envelope: &CommandEnvelope) -> ExecutionOutcome;
}

/// Executor for hosts without service control: answers `REFRESH_STATUS` and
/// reports every other command type as unsupported.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusOnlyExecutor;

#[async_trait]
impl CommandExecutor for StatusOnlyExecutor {
    async fn execute(&self, envelope: &CommandEnvelope) -> ExecutionOutcome {
        match envelope.command_type {
            CommandType::RefreshStatus => ExecutionOutcome::success("Status refresh requested"),
            other => ExecutionOutcome::failed(format!("Unsupported command type: {other}")),
        }
    }
}
