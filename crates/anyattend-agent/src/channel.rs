//! Transport seam between the agent and the backend.

use std::sync::Arc;

use anyattend_core::{AckStatus, CommandEnvelope};
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::AgentError;

/// Device-authenticated calls the agent makes to the backend.
///
/// Implementations hold the device token; the agent never sees how it is
/// presented.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Fetch deliverable commands, oldest first.
    async fn fetch(&self) -> Result<Vec<CommandEnvelope>, AgentError>;

    async fn ack(
        &self,
        command_id: &str,
        status: AckStatus,
        message: &str,
    ) -> Result<(), AgentError>;

    async fn heartbeat(&self, details: Map<String, Value>) -> Result<(), AgentError>;

    async fn alert(
        &self,
        action_taken: &str,
        details: Map<String, Value>,
    ) -> Result<(), AgentError>;
}

#[async_trait]
impl<T: CommandChannel + ?Sized> CommandChannel for Arc<T> {
    async fn fetch(&self) -> Result<Vec<CommandEnvelope>, AgentError> {
        (**self).fetch().await
    }

    async fn ack(
        &self,
        command_id: &str,
        status: AckStatus,
        message: &str,
    ) -> Result<(), AgentError> {
        (**self).ack(command_id, status, message).await
    }

    async fn heartbeat(&self, details: Map<String, Value>) -> Result<(), AgentError> {
        (**self).heartbeat(details).await
    }

    async fn alert(
        &self,
        action_taken: &str,
        details: Map<String, Value>,
    ) -> Result<(), AgentError> {
        (**self).alert(action_taken, details).await
    }
}
