//! `storefront`: demo shop binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Build the telemetry pipelines (traces, logs, metrics over OTLP).
//! 3. Open the SQLite store and ensure the schema exists.
//! 4. Create the Redis last-order cache (connects lazily).
//! 5. Build the Axum router and serve until Ctrl-C / SIGTERM.
//! 6. Flush and shut down telemetry.

mod cache;
mod config;
mod server;
mod store;
mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use cache::RedisCache;
use config::Config;
use server::state::AppState;
use store::SqliteStore;
use telemetry::{runtime::TrackingAllocator, Telemetry};

#[global_allocator]
static ALLOCATOR: TrackingAllocator = TrackingAllocator;

/// Pool size for the SQLite store.
const DB_MAX_CONNECTIONS: u32 = 5;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    let telemetry = telemetry::init(&cfg.telemetry_settings()).map_err(|e| {
        eprintln!("ERROR: telemetry pipeline could not be built: {e:#}");
        e
    })?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        service = %cfg.service_name,
        http_port = cfg.http_port,
        "storefront starting"
    );

    let result = run(&cfg, &telemetry).await;
    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "storefront stopped with an error");
    }

    // -----------------------------------------------------------------------
    // 6. Telemetry shutdown
    // -----------------------------------------------------------------------
    info!("flushing telemetry");
    telemetry.shutdown();
    result
}

async fn run(cfg: &Config, telemetry: &Telemetry) -> Result<()> {
    // -----------------------------------------------------------------------
    // 3. Store
    // -----------------------------------------------------------------------
    let store = SqliteStore::connect(&cfg.database_url, DB_MAX_CONNECTIONS)
        .await
        .with_context(|| format!("failed to open database {}", cfg.database_url))?;
    store.migrate().await.context("failed to prepare database schema")?;

    // -----------------------------------------------------------------------
    // 4. Cache
    // -----------------------------------------------------------------------
    let cache = RedisCache::new(&cfg.redis_addr)?;

    // -----------------------------------------------------------------------
    // 5. HTTP server
    // -----------------------------------------------------------------------
    let state = AppState::new(Arc::new(store), Arc::new(cache), telemetry.metrics());
    let router = server::router::build(state);

    let addr: std::net::SocketAddr = ([0, 0, 0, 0], cfg.http_port).into();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    info!("http server stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
