//! Axum middleware layers applied to the router.
//!
//! Includes the per-request server span and HTTP metrics, timeout
//! enforcement, and response compression.

use std::time::{Duration, Instant};

use axum::{
    extract::{MatchedPath, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use opentelemetry::{
    propagation::{Extractor, TextMapPropagator},
    trace::FutureExt as _,
};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tracing::{field, Instrument};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::state::AppState;

/// Default per-request timeout applied to all routes.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Route label for requests that matched no route.
pub const UNMATCHED_ROUTE: &str = "unmatched";

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

/// Wrap each request in a server span and count it.
///
/// An incoming W3C `traceparent` becomes the span's parent. The span's
/// OpenTelemetry context stays attached while the handler runs, so log
/// records emitted underneath carry its ids. 5xx responses mark the span as
/// an error.
pub async fn instrument_request(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or(UNMATCHED_ROUTE, MatchedPath::as_str)
        .to_owned();

    let span = tracing::info_span!(
        "http_request",
        otel.name = %format!("{method} {route}"),
        otel.kind = "server",
        http.request.method = %method,
        http.route = %route,
        http.response.status_code = field::Empty,
        otel.status_code = field::Empty,
    );
    let remote = TraceContextPropagator::new().extract(&HeaderExtractor(req.headers()));
    span.set_parent(remote);
    let cx = span.context();

    let started = Instant::now();
    let response = next
        .run(req)
        .with_context(cx)
        .instrument(span.clone())
        .await;
    let status = response.status();

    span.record("http.response.status_code", status.as_u16());
    if status.is_server_error() {
        span.record("otel.status_code", "ERROR");
    }
    state
        .metrics
        .record_request(method.as_str(), &route, status.as_u16(), started.elapsed());

    response
}
