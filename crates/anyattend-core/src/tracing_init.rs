//! Shared tracing/logging initialization.
//!
//! The backend binary and any embedding agent host use the same pattern for
//! setting up `tracing_subscriber` with an env-filter and optional JSON output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"anyattend_backend=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Initialise tracing and, when an endpoint is given, the OTLP exporters.
///
/// Spans are bridged into `OpenTelemetry` through `tracing-opentelemetry`.
/// The returned guard must be kept alive until shutdown.
#[cfg(feature = "metrics")]
pub fn init_tracing_with_metrics(
    default_filter: &str,
    log_json: bool,
    endpoint: Option<&str>,
) -> Result<Option<crate::metrics::MetricsGuard>, crate::metrics::MetricsError> {
    use opentelemetry::trace::TracerProvider as _;

    let Some(endpoint) = endpoint else {
        init_tracing(default_filter, log_json);
        return Ok(None);
    };

    let guard = crate::metrics::init_metrics(endpoint)?;
    let otel_layer =
        tracing_opentelemetry::layer().with_tracer(guard.tracer_provider().tracer("anyattend"));

    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(otel_layer)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(otel_layer)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(Some(guard))
}
