//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::cache::LastOrderCache;
use crate::store::OrderStore;
use crate::telemetry::ShopMetrics;

/// Application state shared across all request handlers.
///
/// Every field is `Arc`-backed, so Axum's per-request clone is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Catalogue and order persistence.
    pub store: Arc<dyn OrderStore>,
    /// Fire-and-forget last-order cache.
    pub cache: Arc<dyn LastOrderCache>,
    /// Order and HTTP instruments.
    pub metrics: ShopMetrics,
}

impl AppState {
    pub fn new(
        store: Arc<dyn OrderStore>,
        cache: Arc<dyn LastOrderCache>,
        metrics: ShopMetrics,
    ) -> Self {
        Self {
            store,
            cache,
            metrics,
        }
    }
}
