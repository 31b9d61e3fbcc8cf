//! The agent poll loop.
//!
//! Each cycle sends a heartbeat, fetches deliverable commands, and handles
//! them in order: rejected commands are acknowledged as failed with the
//! rejection reason, accepted ones are executed and acknowledged with their
//! outcome. A failure on one command never aborts the rest of the batch.
//!
//! The backend may deliver a command again until its acknowledgement lands,
//! so outcomes are remembered per command id and a redelivered command is
//! re-acknowledged instead of re-executed.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use anyattend_core::db::unix_timestamp;
use anyattend_core::{AckStatus, CommandEnvelope};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::channel::CommandChannel;
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::executor::CommandExecutor;
use crate::verifier::CommandVerifier;

/// Command outcomes remembered for redelivery.
const OUTCOME_HISTORY: usize = 512;

/// Counts from one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub executed: usize,
    pub rejected: usize,
    /// Redelivered commands answered from history.
    pub replayed: usize,
    pub failed_acks: usize,
}

/// Bounded map of command id to the acknowledgement sent for it.
struct OutcomeHistory {
    order: VecDeque<String>,
    outcomes: HashMap<String, (AckStatus, String)>,
    capacity: usize,
}

impl OutcomeHistory {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            outcomes: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    fn get(&self, id: &str) -> Option<&(AckStatus, String)> {
        self.outcomes.get(id)
    }

    fn insert(&mut self, id: &str, status: AckStatus, message: String) {
        if self.outcomes.insert(id.to_string(), (status, message)).is_some() {
            return;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.outcomes.remove(&oldest);
            }
        }
    }
}

pub struct AgentWorker<C, E> {
    verifier: CommandVerifier,
    channel: C,
    executor: E,
    interval: Duration,
    history: OutcomeHistory,
}

impl<C: CommandChannel, E: CommandExecutor> AgentWorker<C, E> {
    pub fn new(config: &AgentConfig, channel: C, executor: E) -> Result<Self, AgentError> {
        config.validate()?;
        Ok(Self {
            verifier: CommandVerifier::new(
                config.device_id.clone(),
                config.command_signing_secret.as_bytes(),
            )?,
            channel,
            executor,
            interval: config.poll_interval(),
            history: OutcomeHistory::new(OUTCOME_HISTORY),
        })
    }

    /// Override the poll interval taken from the config.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub const fn channel(&self) -> &C {
        &self.channel
    }

    async fn decide(
        &self,
        envelope: &CommandEnvelope,
        report: &mut CycleReport,
    ) -> (AckStatus, String) {
        let verdict = self.verifier.check(envelope, unix_timestamp());
        if let Some(reason) = verdict.rejection_message() {
            report.rejected += 1;
            warn!(command_id = %envelope.id, ?verdict, "Command rejected");
            return (AckStatus::Failed, reason.to_string());
        }

        let outcome = self.executor.execute(envelope).await;
        report.executed += 1;
        info!(
            command_id = %envelope.id,
            command_type = %envelope.command_type,
            success = outcome.success,
            "Command executed"
        );
        let status = if outcome.success {
            AckStatus::Success
        } else {
            AckStatus::Failed
        };
        (status, outcome.message)
    }

    /// Run one heartbeat, fetch, and acknowledge pass.
    #[instrument(skip_all, fields(device_id = %self.verifier.device_id()))]
    pub async fn run_cycle(&mut self) -> Result<CycleReport, AgentError> {
        let mut details = Map::new();
        details.insert("agent".into(), Value::from("anyattend-agent"));
        details.insert("version".into(), Value::from(env!("CARGO_PKG_VERSION")));
        self.channel.heartbeat(details).await?;

        let commands = self.channel.fetch().await?;
        let mut report = CycleReport::default();

        for envelope in &commands {
            let (status, message) = match self.history.get(&envelope.id) {
                Some((status, message)) => {
                    report.replayed += 1;
                    debug!(command_id = %envelope.id, "Redelivered command, replaying acknowledgement");
                    (*status, message.clone())
                }
                None => {
                    let decided = self.decide(envelope, &mut report).await;
                    self.history.insert(&envelope.id, decided.0, decided.1.clone());
                    decided
                }
            };

            if let Err(e) = self.channel.ack(&envelope.id, status, &message).await {
                report.failed_acks += 1;
                warn!(command_id = %envelope.id, error = %e, "Acknowledgement failed");
            }
        }

        Ok(report)
    }

    /// Poll until `shutdown` flips or the backend rejects the device token.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            device_id = %self.verifier.device_id(),
            interval_secs = self.interval.as_secs(),
            "Agent starting"
        );
        let mut timer = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match self.run_cycle().await {
                        Ok(report) => {
                            if report != CycleReport::default() {
                                info!(?report, "Poll cycle complete");
                            }
                        }
                        Err(AgentError::Auth(e)) => {
                            error!(error = %e, "Device token rejected, stopping");
                            return;
                        }
                        Err(e) => {
                            warn!(error = %e, "Poll cycle failed");
                            let mut details = Map::new();
                            details.insert("error".into(), Value::from(e.to_string()));
                            if let Err(e) = self.channel.alert("agent_loop_failure", details).await {
                                debug!(error = %e, "Failure alert not delivered");
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("Agent shutting down");
                    return;
                }
            }
        }
    }
}
