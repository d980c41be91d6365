//! Trace pipeline and the helpers handlers use to close out a unit of work.
//!
//! Spans are created with `tracing` macros and bridged to OpenTelemetry by
//! [`otel_layer`]. A span that wants an explicit outcome must declare the
//! `otel.status_code` and `otel.status_message` fields as
//! [`tracing::field::Empty`] so the helpers below can fill them in.

use opentelemetry_sdk::{
    export::trace::SpanExporter,
    runtime,
    trace::{self, Tracer, TracerProvider},
    Resource,
};
use tracing::{Span, Subscriber};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::registry::LookupSpan;

/// Batching tracer provider over `exporter`. Ending a span only enqueues it.
pub fn tracer_provider<E>(exporter: E, resource: Resource) -> TracerProvider
where
    E: SpanExporter + 'static,
{
    TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_config(trace::Config::default().with_resource(resource))
        .build()
}

/// `tracing` layer that turns spans into OpenTelemetry spans.
pub fn otel_layer<S>(tracer: Tracer) -> OpenTelemetryLayer<S, Tracer>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    tracing_opentelemetry::layer().with_tracer(tracer)
}

/// Mark `span` as successful.
pub fn mark_ok(span: &Span) {
    span.record("otel.status_code", "OK");
}

/// Flip `span` to error status with `err` as the description, and attach the
/// error as an event inside it.
pub fn record_error(span: &Span, err: &(dyn std::error::Error + 'static)) {
    // Code before message: the message is what carries the description.
    span.record("otel.status_code", "ERROR");
    span.record("otel.status_message", err.to_string().as_str());
    tracing::error!(parent: span, error = err, "unit of work failed");
}
