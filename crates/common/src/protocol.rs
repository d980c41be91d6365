//! Request and response types exchanged over the public HTTP API.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Request body for `POST /orders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    /// Product to order. Created on the fly if the catalogue doesn't know it.
    pub product_name: String,
    /// Number of units; must be at least 1.
    pub quantity: u32,
    /// Optional opaque identifier of the ordering user.
    #[serde(default)]
    pub user_id: Option<String>,
}

impl CreateOrderRequest {
    /// Check the fields that serde cannot: a non-blank product name and a
    /// non-zero quantity.
    pub fn validate(&self) -> Result<(), String> {
        if self.product_name.trim().is_empty() {
            return Err("product_name is required".into());
        }
        if self.quantity == 0 {
            return Err("quantity must be at least 1".into());
        }
        Ok(())
    }
}

/// Successful response body for `POST /orders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedResponse {
    pub status: String,
}

// ---------------------------------------------------------------------------
// Catalogue
// ---------------------------------------------------------------------------

/// One row of the product catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
}

/// Response body for `GET /products`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductsResponse {
    pub products: Vec<Product>,
}

// ---------------------------------------------------------------------------
// Load-test endpoints
// ---------------------------------------------------------------------------

/// Response body for `GET /checkInventory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryResponse {
    pub inventory_status: String,
    pub check_time_ms: u64,
}

/// Response body for `GET /cpuTest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuTestResponse {
    pub cpu_test_ms: u64,
}

/// Response body for `GET /concurrencyTest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyTestResponse {
    /// Live runtime tasks observed while the burst was in flight. Named after
    /// the `go_goroutines` gauge for client compatibility.
    pub goroutines: usize,
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error response body returned on any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"bad_request"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&crate::ServiceError> for ErrorResponse {
    fn from(err: &crate::ServiceError) -> Self {
        Self::new(err.code(), err.message())
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"`; a failing check answers with an [`ErrorResponse`].
    pub status: String,
    /// Whether the relational store answered a ping.
    pub database_ready: bool,
}
