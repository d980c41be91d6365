//! Axum router construction.

use std::time::Duration;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer};

use super::{handlers, middleware, state::AppState};

/// Build the application [`Router`] with all routes and middleware attached.
pub fn build(state: AppState) -> Router {
    with_timeout(state, middleware::REQUEST_TIMEOUT)
}

/// The timeout sits inside the instrumentation, so a timed-out request still
/// gets its status and duration recorded.
fn with_timeout(state: AppState, timeout: Duration) -> Router {
    Router::new()
        .route("/products", get(handlers::list_products))
        .route("/orders", post(handlers::create_order))
        .route("/checkInventory", get(handlers::check_inventory))
        .route("/cpuTest", get(handlers::cpu_test))
        .route("/concurrencyTest", get(handlers::concurrency_test))
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
        .layer(TimeoutLayer::new(timeout))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::instrument_request,
        ))
        .layer(CompressionLayer::new())
        .with_state(state)
}
