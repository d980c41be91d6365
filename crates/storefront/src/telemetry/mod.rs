//! OpenTelemetry setup: traces, structured logs, and metrics exported over OTLP/gRPC.
//!
//! The three pipelines are independent: each owns its own batch processor or
//! periodic reader and flushes on its own schedule. They share one
//! [`Resource`](opentelemetry_sdk::Resource) built once at startup.
//!
//! # Telemetry invariants
//!
//! - Emitting a span, log record or measurement never waits on the network.
//! - A failed export is logged locally and the batch is dropped; it never
//!   fails a request.
//! - Providers are owned by [`Telemetry`]; call [`Telemetry::shutdown`] once
//!   at process exit to flush what is still queued.

pub mod logs;
pub mod metrics;
pub mod resource;
pub mod runtime;
pub mod traces;
pub mod transport;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use opentelemetry::{metrics::MeterProvider as _, trace::TracerProvider as _};
use opentelemetry_sdk::{logs::LoggerProvider, metrics::SdkMeterProvider, trace::TracerProvider};
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use metrics::ShopMetrics;
pub use runtime::RuntimeObserver;
pub use transport::TransportConfig;

/// Everything the pipelines need to reach the collector.
#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub service_name: String,
    pub endpoint: String,
    pub transport: TransportConfig,
    pub export_timeout: Duration,
    pub metrics_interval: Duration,
    pub log_level: String,
}

/// Owned handle over the three signal providers.
///
/// Dropping it without calling [`Telemetry::shutdown`] loses whatever is still
/// sitting in the export queues.
pub struct Telemetry {
    tracer_provider: TracerProvider,
    logger_provider: LoggerProvider,
    meter_provider: SdkMeterProvider,
    metrics: ShopMetrics,
    _runtime: RuntimeObserver,
}

impl Telemetry {
    /// Domain and HTTP instruments, cheap to clone into application state.
    pub fn metrics(&self) -> ShopMetrics {
        self.metrics.clone()
    }

    /// Flush and stop all three pipelines.
    ///
    /// Metrics go first so the final collection still has somewhere to log
    /// failures; logs go last.
    pub fn shutdown(self) {
        if let Err(e) = self.meter_provider.shutdown() {
            warn!(target: logs::EXPORT_TARGET, error = %e, "metric pipeline shutdown failed");
        }
        for result in self.tracer_provider.force_flush() {
            if let Err(e) = result {
                warn!(target: logs::EXPORT_TARGET, error = %e, "trace pipeline flush failed");
            }
        }
        for result in self.logger_provider.force_flush() {
            if let Err(e) = result {
                eprintln!("WARN: log pipeline flush failed: {e}");
            }
        }
    }
}

/// Build the trace, log and metric pipelines and install the global
/// `tracing` subscriber.
///
/// # Errors
///
/// Returns an error if any exporter cannot be created or the subscriber is
/// already installed. Callers treat this as fatal.
pub fn init(settings: &TelemetrySettings) -> Result<Telemetry> {
    logs::install_export_error_handler()?;

    let resource = resource::build(&settings.service_name);

    // --- Traces ---
    let span_exporter = settings
        .transport
        .exporter(&settings.endpoint, settings.export_timeout)?
        .build_span_exporter()
        .context("failed to create OTLP span exporter")?;
    let tracer_provider = traces::tracer_provider(span_exporter, resource.clone());
    let tracer = tracer_provider.tracer(settings.service_name.clone());

    // --- Logs ---
    let logger_provider = logs::otlp_logger_provider(settings, resource.clone())?;

    // --- Metrics ---
    let meter_provider = metrics::otlp_meter_provider(settings, resource)?;
    let meter = meter_provider.meter(settings.service_name.clone());
    let shop_metrics = ShopMetrics::new(&meter);
    let runtime = RuntimeObserver::register(&meter, Arc::new(runtime::ProcessSampler::current()));

    // --- Subscriber ---
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .with(traces::otel_layer(tracer))
        .with(logs::bridge_layer(&logger_provider))
        .try_init()
        .context("failed to initialise tracing subscriber")?;

    Ok(Telemetry {
        tracer_provider,
        logger_provider,
        meter_provider,
        metrics: shop_metrics,
        _runtime: runtime,
    })
}
