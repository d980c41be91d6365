//! Relational store for the product catalogue and orders.

pub mod sqlite;

use async_trait::async_trait;
use common::protocol::Product;
use thiserror::Error;

pub use sqlite::SqliteStore;

/// Error returned by [`OrderStore`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// An order row about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub product_id: i64,
    pub quantity: u32,
    pub user_id: Option<String>,
}

/// Catalogue and order persistence.
///
/// Each call is its own statement; callers that combine several get no
/// transaction around them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Id of the product called `name`, or `None` if there is none.
    async fn find_product_id(&self, name: &str) -> Result<Option<i64>, StoreError>;

    /// Create a product called `name` and return its id. If a concurrent
    /// writer created it first, the existing id is returned.
    async fn insert_product(&self, name: &str) -> Result<i64, StoreError>;

    /// Append an order row and return its id.
    async fn insert_order(&self, order: &NewOrder) -> Result<i64, StoreError>;

    async fn list_products(&self) -> Result<Vec<Product>, StoreError>;

    /// Cheap round trip used by the health check.
    async fn ping(&self) -> Result<(), StoreError>;
}
