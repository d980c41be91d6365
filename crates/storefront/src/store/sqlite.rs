//! SQLite-backed [`OrderStore`].

use std::str::FromStr;

use async_trait::async_trait;
use common::protocol::Product;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use super::{NewOrder, OrderStore, StoreError};

/// Products present in a freshly created catalogue.
pub const SEED_PRODUCTS: &[&str] = &["Book", "Laptop", "Phone"];

const CREATE_PRODUCTS: &str = "CREATE TABLE IF NOT EXISTS products (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
)";

const CREATE_ORDERS: &str = "CREATE TABLE IF NOT EXISTS orders (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id INTEGER NOT NULL REFERENCES products(id),
    quantity   INTEGER NOT NULL,
    user_id    TEXT
)";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Create the schema if missing and seed the catalogue. Safe to run on
    /// every start.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_PRODUCTS).execute(&self.pool).await?;
        sqlx::query(CREATE_ORDERS).execute(&self.pool).await?;

        for &name in SEED_PRODUCTS {
            sqlx::query("INSERT OR IGNORE INTO products (name) VALUES (?)")
                .bind(name)
                .execute(&self.pool)
                .await?;
        }
        info!(seeded = SEED_PRODUCTS.len(), "database schema ready");
        Ok(())
    }
}

#[async_trait]
impl OrderStore for SqliteStore {
    async fn find_product_id(&self, name: &str) -> Result<Option<i64>, StoreError> {
        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM products WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn insert_product(&self, name: &str) -> Result<i64, StoreError> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO products (name) VALUES (?)
             ON CONFLICT(name) DO UPDATE SET name = excluded.name
             RETURNING id",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn insert_order(&self, order: &NewOrder) -> Result<i64, StoreError> {
        let result =
            sqlx::query("INSERT INTO orders (product_id, quantity, user_id) VALUES (?, ?, ?)")
                .bind(order.product_id)
                .bind(i64::from(order.quantity))
                .bind(order.user_id.as_deref())
                .execute(&self.pool)
                .await?;
        Ok(result.last_insert_rowid())
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query_as::<_, (i64, String)>("SELECT id, name FROM products ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name)| Product { id, name })
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One connection, so every query sees the same in-memory database.
    async fn store() -> SqliteStore {
        let store = SqliteStore::connect("sqlite::memory:", 1).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    async fn order_count(store: &SqliteStore) -> i64 {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM orders")
            .fetch_one(&store.pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn migrate_seeds_catalogue() {
        let store = store().await;
        let names: Vec<String> = store
            .list_products()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, ["Book", "Laptop", "Phone"]);
    }

    #[tokio::test]
    async fn migrate_is_repeatable() {
        let store = store().await;
        store.migrate().await.unwrap();
        assert_eq!(store.list_products().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn find_product_id_distinguishes_known_and_unknown() {
        let store = store().await;
        assert!(store.find_product_id("Book").await.unwrap().is_some());
        assert_eq!(store.find_product_id("Tablet").await.unwrap(), None);
    }

    #[tokio::test]
    async fn insert_product_returns_existing_id_on_conflict() {
        let store = store().await;
        let first = store.insert_product("Tablet").await.unwrap();
        let second = store.insert_product("Tablet").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.find_product_id("Tablet").await.unwrap(), Some(first));
        assert_eq!(store.list_products().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn insert_order_appends_rows() {
        let store = store().await;
        let product_id = store.find_product_id("Laptop").await.unwrap().unwrap();

        let first = store
            .insert_order(&NewOrder {
                product_id,
                quantity: 2,
                user_id: Some("u-1".into()),
            })
            .await
            .unwrap();
        let second = store
            .insert_order(&NewOrder {
                product_id,
                quantity: 1,
                user_id: None,
            })
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(order_count(&store).await, 2);
    }

    #[tokio::test]
    async fn ping_succeeds_on_open_pool() {
        let store = store().await;
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn closed_pool_reports_database_error() {
        let store = store().await;
        store.pool.close().await;
        assert!(matches!(
            store.ping().await,
            Err(StoreError::Database(_))
        ));
    }
}
