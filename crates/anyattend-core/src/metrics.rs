//! `OpenTelemetry` export for the backend.
//!
//! This module is only compiled when the `metrics` Cargo feature is enabled.
//! It sets up the OTLP exporter for both traces and metrics, sending
//! telemetry to a configurable endpoint (e.g. an `OpenTelemetry` Collector),
//! and exposes the protocol counters the backend services record into.

use opentelemetry::global;
use opentelemetry::metrics::Counter;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;

/// Errors that can occur during metrics / tracing pipeline initialisation.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to build an OTLP exporter.
    #[error("failed to build OTLP exporter: {0}")]
    ExporterBuild(#[from] opentelemetry_otlp::ExporterBuildError),

    /// Failed during `OTel` SDK shutdown or flush.
    #[error("OpenTelemetry SDK error: {0}")]
    Sdk(#[from] opentelemetry_sdk::error::OTelSdkError),
}

/// Opaque handle that keeps the `OpenTelemetry` providers alive.
///
/// When dropped, the providers are **not** shut down automatically -- call
/// [`MetricsGuard::shutdown`] for a graceful flush before exiting.
pub struct MetricsGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl MetricsGuard {
    pub const fn tracer_provider(&self) -> &SdkTracerProvider {
        &self.tracer_provider
    }

    /// Gracefully shut down both providers, flushing any buffered telemetry.
    pub fn shutdown(self) -> Result<(), MetricsError> {
        self.tracer_provider.shutdown()?;
        self.meter_provider.shutdown()?;
        Ok(())
    }
}

/// Initialise the `OpenTelemetry` OTLP pipeline for traces **and** metrics.
///
/// * `endpoint` -- OTLP receiver URL, e.g. `"http://localhost:4317"` (gRPC).
pub fn init_metrics(endpoint: &str) -> Result<MetricsGuard, MetricsError> {
    let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(trace_exporter)
        .build();

    global::set_tracer_provider(tracer_provider.clone());

    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(metric_exporter)
        .build();

    global::set_meter_provider(meter_provider.clone());

    Ok(MetricsGuard {
        tracer_provider,
        meter_provider,
    })
}

/// Protocol counters. Cheap to build; the global meter is a no-op until
/// [`init_metrics`] installs a provider.
pub struct ProtocolCounters {
    pub challenges_issued: Counter<u64>,
    pub challenge_verifications: Counter<u64>,
    pub devices_paired: Counter<u64>,
    pub commands_created: Counter<u64>,
    pub commands_dispatched: Counter<u64>,
    pub commands_acked: Counter<u64>,
    pub session_rotations: Counter<u64>,
    pub connection_requests: Counter<u64>,
    pub acl_syncs: Counter<u64>,
}

impl ProtocolCounters {
    pub fn new() -> Self {
        let meter = global::meter("anyattend");
        Self {
            challenges_issued: meter.u64_counter("anyattend.challenges.issued").build(),
            challenge_verifications: meter
                .u64_counter("anyattend.challenges.verifications")
                .build(),
            devices_paired: meter.u64_counter("anyattend.devices.paired").build(),
            commands_created: meter.u64_counter("anyattend.commands.created").build(),
            commands_dispatched: meter.u64_counter("anyattend.commands.dispatched").build(),
            commands_acked: meter.u64_counter("anyattend.commands.acked").build(),
            session_rotations: meter.u64_counter("anyattend.sessions.rotations").build(),
            connection_requests: meter.u64_counter("anyattend.requests.decisions").build(),
            acl_syncs: meter.u64_counter("anyattend.acl.syncs").build(),
        }
    }
}

impl Default for ProtocolCounters {
    fn default() -> Self {
        Self::new()
    }
}
