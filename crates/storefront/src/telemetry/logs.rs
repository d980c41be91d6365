//! Log pipeline: `tracing` events exported as OTLP log records.
//!
//! Records emitted while a span's OpenTelemetry context is attached carry
//! that span's trace and span ids. Events from the exporters' own stack
//! (gRPC, HTTP/2, the SDK) never reach the bridge, so a failing export cannot
//! feed itself.

use anyhow::{Context, Result};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_sdk::{logs::LoggerProvider, runtime, Resource};
use tracing::{Metadata, Subscriber};
use tracing_subscriber::{filter::filter_fn, registry::LookupSpan, Layer};

use super::TelemetrySettings;

/// Target used for local diagnostics about the export path itself.
pub const EXPORT_TARGET: &str = "storefront::export";

/// Crates, and module paths, that belong to the export path.
const EXPORT_INTERNAL_PREFIXES: &[&str] = &[
    "opentelemetry",
    "opentelemetry_sdk",
    "opentelemetry_otlp",
    "tonic",
    "h2",
    "hyper",
    "hyper_util",
    "tower",
    EXPORT_TARGET,
];

/// Batching OTLP logger provider.
pub fn otlp_logger_provider(
    settings: &TelemetrySettings,
    resource: Resource,
) -> Result<LoggerProvider> {
    opentelemetry_otlp::new_pipeline()
        .logging()
        .with_log_config(opentelemetry_sdk::logs::Config::default().with_resource(resource))
        .with_exporter(
            settings
                .transport
                .exporter(&settings.endpoint, settings.export_timeout)?,
        )
        .install_batch(runtime::Tokio)
        .context("failed to install OTLP log pipeline")
}

/// Bridge layer from `tracing` events to `provider`, minus export internals.
pub fn bridge_layer<S>(provider: &LoggerProvider) -> impl Layer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    OpenTelemetryTracingBridge::new(provider)
        .with_filter(filter_fn(|meta: &Metadata<'_>| !is_export_internal(meta.target())))
}

/// Whether `target` belongs to the exporters' own stack.
pub fn is_export_internal(target: &str) -> bool {
    EXPORT_INTERNAL_PREFIXES
        .iter()
        .any(|prefix| target == *prefix || target.starts_with(&format!("{prefix}::")))
}

/// Route SDK export errors to the local log instead of stderr.
///
/// The batch that failed is already dropped by the time this runs; nothing is
/// retried.
pub fn install_export_error_handler() -> Result<()> {
    opentelemetry::global::set_error_handler(|err| {
        tracing::warn!(target: EXPORT_TARGET, error = %err, "telemetry export failed; batch dropped");
    })
    .map_err(|e| anyhow::anyhow!("failed to install telemetry error handler: {e}"))
}
