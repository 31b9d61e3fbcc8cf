//! Anyattend Backend CLI
//!
//! Operator front end over the backend services: runs ownership challenges,
//! pairs devices, issues signed commands, manages whitelists and connection
//! requests, and plays the device side of the protocol for diagnostics. Every subcommand prints one JSON document.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use anyattend_backend::Backend;
use anyattend_backend::auth::{AdminPrincipal, ChallengeOutcome};
use anyattend_backend::devices::{Alert, Heartbeat, HostInfo, PairingOutcome};
use anyattend_backend::events::LogSink;
use anyattend_backend::storage::{BackendDatabase, Device, DeviceStatus, RequestStatus};
use anyattend_backend::whitelist::{Decision, RequestFilter};
use anyattend_core::config::{database_path, load_config};
use anyattend_core::payload::parse_payload;
use anyattend_core::{AckStatus, CommandType};

#[derive(Parser, Debug)]
#[command(name = "anyattend-backend")]
#[command(
    version,
    about = "Anyattend backend - identity challenges, device pairing, signed commands"
)]
struct Args {
    /// Settings file (JSON). Defaults to the global settings file.
    #[arg(long, env = "ANYATTEND_CONFIG")]
    config: Option<PathBuf>,

    /// Path to SQLite database file.
    #[arg(long, env = "ANYATTEND_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "ANYATTEND_LOG_JSON")]
    log_json: bool,

    /// OpenTelemetry OTLP endpoint for traces and metrics export
    /// (e.g. `http://localhost:4317`). Requires the `metrics` feature.
    #[cfg(feature = "metrics")]
    #[arg(long, env = "ANYATTEND_METRICS_ENDPOINT")]
    metrics_endpoint: Option<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Start an ownership challenge for a numeric ID.
    ChallengeStart {
        #[arg(long)]
        anydesk_id: String,
    },
    /// Redeem a challenge code for an admin session.
    ChallengeVerify {
        #[arg(long)]
        challenge_id: String,
        #[arg(long)]
        code: String,
        #[arg(long)]
        fingerprint: Option<String>,
    },
    /// Exchange a refresh token for a new session.
    Refresh {
        #[arg(long, env = "ANYATTEND_REFRESH_TOKEN")]
        refresh_token: String,
        #[arg(long)]
        fingerprint: Option<String>,
    },
    /// Revoke a refresh token.
    Logout {
        #[arg(long, env = "ANYATTEND_REFRESH_TOKEN")]
        refresh_token: String,
    },
    /// Open a pairing session for a new device.
    PairStart {
        #[arg(long, env = "ANYATTEND_ACCESS_TOKEN")]
        access_token: String,
        #[arg(long)]
        label: String,
    },
    /// Redeem a pairing code as the device.
    PairComplete {
        #[arg(long)]
        session_id: String,
        #[arg(long)]
        code: String,
        #[command(flatten)]
        host: HostArgs,
    },
    /// Enroll a device with an open ownership challenge code.
    Enroll {
        #[arg(long)]
        anydesk_id: String,
        #[arg(long)]
        code: String,
        #[arg(long)]
        label: Option<String>,
        #[command(flatten)]
        host: HostArgs,
    },
    /// Issue a signed command to an owned device.
    Command {
        #[arg(long, env = "ANYATTEND_ACCESS_TOKEN")]
        access_token: String,
        #[arg(long)]
        device_id: String,
        /// Command type, e.g. `RUN_VALIDATION`.
        #[arg(long = "type")]
        command_type: String,
        /// JSON object payload.
        #[arg(long, default_value = "{}")]
        payload: String,
        #[arg(long)]
        ttl_seconds: Option<i64>,
    },
    /// List owned devices, or show one with its recent commands.
    Devices {
        #[arg(long, env = "ANYATTEND_ACCESS_TOKEN")]
        access_token: String,
        #[arg(long)]
        device_id: Option<String>,
    },
    /// Show a device's event log, newest first.
    Events {
        #[arg(long, env = "ANYATTEND_ACCESS_TOKEN")]
        access_token: String,
        #[arg(long)]
        device_id: String,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// List the whitelist.
    WhitelistList {
        #[arg(long, env = "ANYATTEND_ACCESS_TOKEN")]
        access_token: String,
    },
    /// Allow a numeric ID to connect.
    WhitelistAdd {
        #[arg(long, env = "ANYATTEND_ACCESS_TOKEN")]
        access_token: String,
        #[arg(long)]
        anydesk_id: String,
        #[arg(long)]
        label: Option<String>,
    },
    /// Remove a whitelist entry.
    WhitelistRemove {
        #[arg(long, env = "ANYATTEND_ACCESS_TOKEN")]
        access_token: String,
        #[arg(long)]
        entry_id: String,
    },
    /// Push the whitelist to every owned device.
    WhitelistSync {
        #[arg(long, env = "ANYATTEND_ACCESS_TOKEN")]
        access_token: String,
    },
    /// Ask an owner for access (no session required).
    RequestSubmit {
        #[arg(long)]
        owner_anydesk_id: String,
        #[arg(long)]
        requester_anydesk_id: String,
        #[arg(long)]
        requester_label: Option<String>,
        #[arg(long)]
        note: Option<String>,
    },
    /// List incoming connection requests.
    Requests {
        #[arg(long, env = "ANYATTEND_ACCESS_TOKEN")]
        access_token: String,
        /// `pending`, `approved`, `declined`, `expired`, or `all`.
        #[arg(long, default_value = "pending")]
        status: String,
    },
    /// Approve or decline a connection request.
    RequestDecide {
        #[arg(long, env = "ANYATTEND_ACCESS_TOKEN")]
        access_token: String,
        #[arg(long)]
        request_id: String,
        /// `approve` or `decline`.
        #[arg(long)]
        decision: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Fetch deliverable commands as the device.
    Poll {
        #[arg(long, env = "ANYATTEND_DEVICE_TOKEN")]
        device_token: String,
        /// Only commands issued after this RFC 3339 instant; unparsable values are ignored.
        #[arg(long)]
        since: Option<String>,
    },
    /// Acknowledge a command as the device.
    Ack {
        #[arg(long, env = "ANYATTEND_DEVICE_TOKEN")]
        device_token: String,
        #[arg(long)]
        command_id: String,
        /// `success` or `failed`.
        #[arg(long)]
        status: String,
        #[arg(long)]
        message: Option<String>,
    },
    /// Report a heartbeat as the device.
    Heartbeat {
        #[arg(long, env = "ANYATTEND_DEVICE_TOKEN")]
        device_token: String,
        #[arg(long)]
        host: String,
        /// `online`, `offline`, `degraded`, or `critical`.
        #[arg(long, default_value = "online")]
        status: String,
    },
    /// Raise an alert as the device.
    Alert {
        #[arg(long, env = "ANYATTEND_DEVICE_TOKEN")]
        device_token: String,
        #[arg(long)]
        host: String,
        #[arg(long)]
        status: String,
        #[arg(long)]
        action_taken: String,
        /// RFC 3339 instant; defaults to now.
        #[arg(long)]
        timestamp: Option<String>,
    },
}

#[derive(ClapArgs, Debug)]
struct HostArgs {
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    poll_interval_secs: Option<i64>,
    #[arg(long)]
    service_name: Option<String>,
    #[arg(long)]
    webhook_fallback_url: Option<String>,
}

impl From<HostArgs> for HostInfo {
    fn from(args: HostArgs) -> Self {
        Self {
            host: args.host,
            poll_interval_secs: args.poll_interval_secs,
            service_name: args.service_name,
            webhook_fallback_url: args.webhook_fallback_url,
        }
    }
}

#[allow(clippy::print_stdout)]
fn emit(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn admin(backend: &Backend, access_token: &str) -> anyhow::Result<AdminPrincipal> {
    Ok(backend.sessions.authenticate(access_token).await?)
}

async fn device(backend: &Backend, device_token: &str) -> anyhow::Result<Device> {
    Ok(backend.tokens.authenticate(device_token).await?)
}

fn parse_filter(status: &str) -> anyhow::Result<RequestFilter> {
    match status.trim().to_ascii_lowercase().as_str() {
        "all" => Ok(RequestFilter::All),
        other => Ok(RequestFilter::Status(
            other.parse::<RequestStatus>().map_err(anyhow::Error::msg)?,
        )),
    }
}

fn parse_decision(decision: &str) -> anyhow::Result<Decision> {
    match decision {
        "approve" => Ok(Decision::Approve),
        "decline" => Ok(Decision::Decline),
        other => anyhow::bail!("unknown decision: {other}"),
    }
}

fn emit_pairing(outcome: PairingOutcome) -> anyhow::Result<()> {
    match outcome {
        PairingOutcome::Paired(credential) => emit(&credential),
        PairingOutcome::Declined => anyhow::bail!("pairing code declined"),
    }
}

#[allow(clippy::too_many_lines)]
async fn run(backend: &Backend, command: Cmd) -> anyhow::Result<()> {
    match command {
        Cmd::ChallengeStart { anydesk_id } => {
            emit(&backend.challenges.start_challenge(&anydesk_id).await?)
        }
        Cmd::ChallengeVerify {
            challenge_id,
            code,
            fingerprint,
        } => {
            let outcome = backend
                .challenges
                .verify_challenge(&challenge_id, &code, fingerprint.as_deref())
                .await?;
            match outcome {
                ChallengeOutcome::Verified(grant) => emit(&grant),
                ChallengeOutcome::Declined => anyhow::bail!("verification code declined"),
            }
        }
        Cmd::Refresh {
            refresh_token,
            fingerprint,
        } => emit(
            &backend
                .sessions
                .refresh(&refresh_token, fingerprint.as_deref())
                .await?,
        ),
        Cmd::Logout { refresh_token } => {
            backend.sessions.revoke(&refresh_token).await?;
            emit(&serde_json::json!({ "revoked": true }))
        }
        Cmd::PairStart {
            access_token,
            label,
        } => {
            let principal = admin(backend, &access_token).await?;
            emit(&backend.pairing.start_pairing(&principal, &label).await?)
        }
        Cmd::PairComplete {
            session_id,
            code,
            host,
        } => emit_pairing(
            backend
                .pairing
                .complete_pairing(&session_id, &code, &host.into())
                .await?,
        ),
        Cmd::Enroll {
            anydesk_id,
            code,
            label,
            host,
        } => emit_pairing(
            backend
                .pairing
                .enroll(&anydesk_id, &code, label.as_deref(), &host.into())
                .await?,
        ),
        Cmd::Command {
            access_token,
            device_id,
            command_type,
            payload,
            ttl_seconds,
        } => {
            let principal = admin(backend, &access_token).await?;
            let command_type: CommandType = command_type.parse()?;
            let payload = parse_payload(&payload)?;
            emit(
                &backend
                    .commands
                    .create(&principal, &device_id, command_type, payload, ttl_seconds)
                    .await?,
            )
        }
        Cmd::Devices {
            access_token,
            device_id,
        } => {
            let principal = admin(backend, &access_token).await?;
            match device_id {
                Some(id) => emit(&backend.directory.device_detail(&principal, &id).await?),
                None => emit(&backend.directory.list_devices(&principal).await?),
            }
        }
        Cmd::Events {
            access_token,
            device_id,
            limit,
        } => {
            let principal = admin(backend, &access_token).await?;
            emit(
                &backend
                    .directory
                    .events(&principal, &device_id, limit)
                    .await?,
            )
        }
        Cmd::WhitelistList { access_token } => {
            let principal = admin(backend, &access_token).await?;
            emit(&backend.whitelist.list(&principal).await?)
        }
        Cmd::WhitelistAdd {
            access_token,
            anydesk_id,
            label,
        } => {
            let principal = admin(backend, &access_token).await?;
            emit(
                &backend
                    .whitelist
                    .upsert(&principal, &anydesk_id, label.as_deref())
                    .await?,
            )
        }
        Cmd::WhitelistRemove {
            access_token,
            entry_id,
        } => {
            let principal = admin(backend, &access_token).await?;
            backend.whitelist.remove(&principal, &entry_id).await?;
            emit(&serde_json::json!({ "removed": entry_id }))
        }
        Cmd::WhitelistSync { access_token } => {
            let principal = admin(backend, &access_token).await?;
            emit(&backend.whitelist.sync(&principal).await?)
        }
        Cmd::RequestSubmit {
            owner_anydesk_id,
            requester_anydesk_id,
            requester_label,
            note,
        } => emit(
            &backend
                .requests
                .submit(
                    &owner_anydesk_id,
                    &requester_anydesk_id,
                    requester_label.as_deref(),
                    note.as_deref(),
                )
                .await?,
        ),
        Cmd::Requests {
            access_token,
            status,
        } => {
            let principal = admin(backend, &access_token).await?;
            let filter = parse_filter(&status)?;
            emit(&backend.requests.list(&principal, filter).await?)
        }
        Cmd::RequestDecide {
            access_token,
            request_id,
            decision,
            note,
        } => {
            let principal = admin(backend, &access_token).await?;
            let decision = parse_decision(&decision)?;
            emit(
                &backend
                    .requests
                    .decide(&principal, &request_id, decision, note.as_deref())
                    .await?,
            )
        }
        Cmd::Poll {
            device_token,
            since,
        } => {
            let device = device(backend, &device_token).await?;
            let commands = backend.commands.poll(&device, since.as_deref()).await?;
            emit(&serde_json::json!({ "commands": commands }))
        }
        Cmd::Ack {
            device_token,
            command_id,
            status,
            message,
        } => {
            let device = device(backend, &device_token).await?;
            let status: AckStatus = status.parse()?;
            let command = backend
                .commands
                .acknowledge(&device, &command_id, status, message.as_deref())
                .await?;
            emit(&serde_json::json!({ "id": command.id, "status": command.status }))
        }
        Cmd::Heartbeat {
            device_token,
            host,
            status,
        } => {
            let device = device(backend, &device_token).await?;
            let status: DeviceStatus = status.parse().map_err(anyhow::Error::msg)?;
            backend
                .status
                .heartbeat(
                    &device,
                    &Heartbeat {
                        host,
                        status,
                        details: serde_json::Map::new(),
                    },
                )
                .await?;
            emit(&serde_json::json!({ "ok": true }))
        }
        Cmd::Alert {
            device_token,
            host,
            status,
            action_taken,
            timestamp,
        } => {
            let device = device(backend, &device_token).await?;
            let timestamp = timestamp.unwrap_or_else(|| {
                anyattend_core::time::format_timestamp(anyattend_core::db::unix_timestamp())
            });
            backend
                .status
                .alert(
                    &device,
                    &Alert {
                        host,
                        timestamp,
                        status,
                        action_taken,
                        details: serde_json::Map::new(),
                    },
                )
                .await?;
            emit(&serde_json::json!({ "ok": true }))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref())?;
    let log_filter = format!("anyattend_backend={}", config.log_level);

    // Hold the guard so the OTel pipeline stays alive for the process lifetime.
    #[cfg(feature = "metrics")]
    let _metrics_guard = anyattend_core::tracing_init::init_tracing_with_metrics(
        &log_filter,
        args.log_json,
        args.metrics_endpoint.as_deref(),
    )?;
    #[cfg(not(feature = "metrics"))]
    anyattend_core::tracing_init::init_tracing(&log_filter, args.log_json);

    let path = args
        .db_path
        .clone()
        .or_else(|| config.database_path.clone())
        .or_else(database_path)
        .context("Cannot determine database path")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        path = %path.display(),
        "Opening backend database"
    );
    let db = BackendDatabase::open(&path).await?;
    let backend = Backend::new(db, config, Arc::new(LogSink))?;

    run(&backend, args.command).await
}
