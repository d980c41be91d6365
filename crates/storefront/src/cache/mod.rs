//! Best-effort "last order" cache.
//!
//! Writes are fire-and-forget: the caller never waits on the cache and a
//! failure only produces a warning.

pub mod redis_cache;

pub use redis_cache::RedisCache;

/// Records the most recent order quantity per product.
#[cfg_attr(test, mockall::automock)]
pub trait LastOrderCache: Send + Sync {
    /// Dispatch the write and return immediately.
    fn set_last_order(&self, product_id: i64, quantity: u32);
}

/// Cache key holding the last ordered quantity of `product_id`.
pub fn last_order_key(product_id: i64) -> String {
    format!("last_order:{product_id}")
}
