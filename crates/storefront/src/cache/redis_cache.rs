//! Redis-backed [`LastOrderCache`].

use std::{fmt::Display, future::Future, sync::Arc};

use anyhow::{Context, Result};
use opentelemetry::trace::FutureExt as _;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};
use tokio::sync::OnceCell;
use tracing::{warn, Instrument};

use super::{last_order_key, LastOrderCache};

/// Connects on first write, then reuses one auto-reconnecting connection.
#[derive(Clone)]
pub struct RedisCache {
    client: Client,
    connection: Arc<OnceCell<ConnectionManager>>,
}

impl RedisCache {
    /// Cache for the Redis server at `addr` (`host:port`). No connection is
    /// made here, so an unreachable server does not block startup.
    pub fn new(addr: &str) -> Result<Self> {
        let client = Context::with_context(Client::open(format!("redis://{addr}")), || {
            format!("invalid redis address {addr}")
        })?;
        Ok(Self {
            client,
            connection: Arc::new(OnceCell::new()),
        })
    }

    async fn write(&self, key: &str, quantity: u32) -> Result<(), RedisError> {
        let connection = self
            .connection
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        let mut connection = connection.clone();
        let _: () = connection.set(key, quantity).await?;
        Ok(())
    }
}

impl LastOrderCache for RedisCache {
    fn set_last_order(&self, product_id: i64, quantity: u32) {
        let cache = self.clone();
        let key = last_order_key(product_id);
        tokio::spawn(detached(key.clone(), async move {
            cache.write(&key, quantity).await
        }));
    }
}

/// `write` set up to run detached under the caller's span and OpenTelemetry
/// context. A failure is logged and dropped.
fn detached<F, E>(key: String, write: F) -> impl Future<Output = ()> + Send + 'static
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display,
{
    async move {
        if let Err(e) = write.await {
            warn!(error = %e, key = %key, "last-order cache write failed; dropped");
        }
    }
    .with_current_context()
    .in_current_span()
}
