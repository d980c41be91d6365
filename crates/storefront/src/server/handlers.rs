//! Axum request handlers for all service endpoints.

use std::time::{Duration, Instant};

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::{
    protocol::{
        ConcurrencyTestResponse, CpuTestResponse, CreateOrderRequest, ErrorResponse,
        HealthResponse, InventoryResponse, OrderCreatedResponse, ProductsResponse,
    },
    ServiceError,
};
use opentelemetry::trace::FutureExt as _;
use rand::Rng;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{field, info, warn, Instrument, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::state::AppState;
use crate::store::{NewOrder, StoreError};
use crate::telemetry::traces;

/// Iterations of the `GET /cpuTest` busy loop.
pub const CPU_TEST_ITERATIONS: u64 = 9_000_000;
/// Tasks spawned by `GET /concurrencyTest`.
pub const CONCURRENCY_TEST_TASKS: usize = 300;
/// How long each `GET /concurrencyTest` task sleeps.
pub const CONCURRENCY_TEST_SLEEP: Duration = Duration::from_millis(200);

/// A store step of order creation failed.
#[derive(Debug, Error)]
#[error("{stage}: {source}")]
struct OrderError {
    stage: &'static str,
    source: StoreError,
}

impl OrderError {
    fn at(stage: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| Self { stage, source }
    }
}

/// `POST /orders`: record an order, creating the product if it is new.
///
/// Runs inside a `create_order` span carrying the product name and quantity.
/// On success the span ends OK, both order counters grow by the quantity and
/// the last-order cache write is dispatched. On any store failure the span
/// ends with error status, nothing is counted and the cache is not touched.
pub async fn create_order(
    State(state): State<AppState>,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => return error_response(&ServiceError::BadRequest(rejection.body_text())),
    };
    if let Err(message) = req.validate() {
        return error_response(&ServiceError::BadRequest(message));
    }

    let span = tracing::info_span!(
        "create_order",
        product.name = %req.product_name,
        quantity = req.quantity,
        product.id = field::Empty,
        otel.status_code = field::Empty,
        otel.status_message = field::Empty,
    );
    let cx = span.context();

    place_order(&state, &req, &span)
        .with_context(cx)
        .instrument(span.clone())
        .await
}

async fn place_order(state: &AppState, req: &CreateOrderRequest, span: &Span) -> Response {
    match persist_order(state, req, span).await {
        Ok(product_id) => {
            state.cache.set_last_order(product_id, req.quantity);
            state
                .metrics
                .record_order(&req.product_name, u64::from(req.quantity));
            traces::mark_ok(span);
            info!(product = %req.product_name, quantity = req.quantity, "order created");

            let body = OrderCreatedResponse {
                status: "order created".into(),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => {
            traces::record_error(span, &err);
            error_response(&ServiceError::Storage(err.stage.into()))
        }
    }
}

/// Resolve (or create) the product, then append the order row.
///
/// The two writes are independent statements: if the order insert fails, a
/// product created just before it stays in the catalogue.
async fn persist_order(
    state: &AppState,
    req: &CreateOrderRequest,
    span: &Span,
) -> Result<i64, OrderError> {
    let existing = state
        .store
        .find_product_id(&req.product_name)
        .await
        .map_err(OrderError::at("cannot look up product"))?;

    let product_id = match existing {
        Some(id) => id,
        None => {
            let id = state
                .store
                .insert_product(&req.product_name)
                .await
                .map_err(OrderError::at("cannot create product"))?;
            info!(product = %req.product_name, product_id = id, "product created");
            id
        }
    };
    span.record("product.id", product_id);

    let order = NewOrder {
        product_id,
        quantity: req.quantity,
        user_id: req.user_id.clone(),
    };
    state
        .store
        .insert_order(&order)
        .await
        .map_err(OrderError::at("cannot create order"))?;

    Ok(product_id)
}

/// `GET /products`: the full catalogue.
pub async fn list_products(State(state): State<AppState>) -> Response {
    match state.store.list_products().await {
        Ok(products) => (StatusCode::OK, Json(ProductsResponse { products })).into_response(),
        Err(e) => {
            warn!(error = %e, "failed to fetch products");
            error_response(&ServiceError::Storage("failed to fetch products".into()))
        }
    }
}

/// `GET /checkInventory`: simulated downstream call with 100–400 ms latency.
pub async fn check_inventory() -> Json<InventoryResponse> {
    let delay_ms: u64 = rand::thread_rng().gen_range(100..400);
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    info!(delay_ms, "inventory checked");

    Json(InventoryResponse {
        inventory_status: "in stock".into(),
        check_time_ms: delay_ms,
    })
}

/// `GET /cpuTest`: burn CPU on the blocking pool and report how long it took.
pub async fn cpu_test() -> Response {
    match tokio::task::spawn_blocking(burn_cpu).await {
        Ok(elapsed) => {
            let cpu_test_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
            info!(cpu_test_ms, "cpu test finished");
            (StatusCode::OK, Json(CpuTestResponse { cpu_test_ms })).into_response()
        }
        Err(e) => {
            warn!(error = %e, "cpu test task failed");
            error_response(&ServiceError::Internal("cpu test failed".into()))
        }
    }
}

fn burn_cpu() -> Duration {
    let started = Instant::now();
    let mut acc: u64 = 0;
    for i in 0..CPU_TEST_ITERATIONS {
        acc = acc.wrapping_add(std::hint::black_box(i.wrapping_mul(i)));
    }
    std::hint::black_box(acc);
    started.elapsed()
}

/// `GET /concurrencyTest`: spawn a burst of sleeping tasks and report how
/// many tasks were alive while it was in flight.
pub async fn concurrency_test() -> Json<ConcurrencyTestResponse> {
    let mut burst = JoinSet::new();
    for _ in 0..CONCURRENCY_TEST_TASKS {
        burst.spawn(tokio::time::sleep(CONCURRENCY_TEST_SLEEP));
    }
    let goroutines = tokio::runtime::Handle::current()
        .metrics()
        .num_alive_tasks();
    while burst.join_next().await.is_some() {}

    info!(goroutines, "concurrency test finished");
    Json(ConcurrencyTestResponse { goroutines })
}

/// `GET /health`: `200 OK` when the database answers, `503` otherwise.
pub async fn health(State(state): State<AppState>) -> Response {
    if let Err(e) = state.store.ping().await {
        warn!(error = %e, "database ping failed");
        return error_response(&ServiceError::Unavailable("database is not reachable".into()));
    }

    let body = HealthResponse {
        status: "ok".into(),
        database_ready: true,
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// Catch-all 404 handler.
pub async fn not_found() -> impl IntoResponse {
    let err = ErrorResponse::new("not_found", "the requested resource does not exist");
    (StatusCode::NOT_FOUND, Json(err))
}

fn error_response(err: &ServiceError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorResponse::from(err))).into_response()
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::Request,
        Router,
    };
    use mockall::predicate::eq;
    use opentelemetry::{
        logs::AnyValue,
        trace::{SpanId, Status, TraceId},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::cache::MockLastOrderCache;
    use crate::server::{router, state::test_support};
    use crate::store::MockOrderStore;
    use crate::telemetry::{
        metrics::{ORDERS_TOTAL, PRODUCT_ORDER_TOTAL},
        testing::{attribute, TestTelemetry},
    };

    fn order_request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/orders")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn app(store: MockOrderStore, cache: MockLastOrderCache, t: &TestTelemetry) -> Router {
        router::build(test_support::state(store, cache, t.shop_metrics()))
    }

    fn db_down() -> StoreError {
        StoreError::Database(sqlx::Error::PoolClosed)
    }

    /// Trace and span ids carried by each exported "order created" record.
    fn order_created_ids(t: &TestTelemetry) -> Vec<Option<(TraceId, SpanId)>> {
        t.logs
            .get_emitted_logs()
            .unwrap()
            .iter()
            .filter(|log| {
                matches!(&log.record.body, Some(AnyValue::String(body)) if body.as_str() == "order created")
            })
            .map(|log| {
                log.record
                    .trace_context
                    .as_ref()
                    .map(|cx| (cx.trace_id, cx.span_id))
            })
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn order_for_known_product_writes_only_the_order() {
        let t = TestTelemetry::new();
        let _guard = tracing::subscriber::set_default(t.subscriber());

        let mut store = MockOrderStore::new();
        store
            .expect_find_product_id()
            .with(eq("Book"))
            .times(1)
            .returning(|_| Ok(Some(1)));
        store.expect_insert_product().never();
        store
            .expect_insert_order()
            .withf(|order| order.product_id == 1 && order.quantity == 3)
            .times(1)
            .returning(|_| Ok(10));
        let mut cache = MockLastOrderCache::new();
        cache
            .expect_set_last_order()
            .with(eq(1_i64), eq(3_u32))
            .times(1)
            .return_const(());

        let resp = app(store, cache, &t)
            .oneshot(order_request(json!({"product_name": "Book", "quantity": 3})))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "order created");
        assert_eq!(t.counter_total(ORDERS_TOTAL), 3);
        assert_eq!(t.counter_total(PRODUCT_ORDER_TOTAL), 3);

        let spans = t.finished_spans();
        let orders: Vec<_> = spans.iter().filter(|s| s.name == "create_order").collect();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, Status::Ok);
        assert_eq!(attribute(orders[0], "product.name").as_deref(), Some("Book"));
        assert_eq!(attribute(orders[0], "quantity").as_deref(), Some("3"));
        assert_eq!(attribute(orders[0], "product.id").as_deref(), Some("1"));

        let ids = (
            orders[0].span_context.trace_id(),
            orders[0].span_context.span_id(),
        );
        assert_eq!(order_created_ids(&t), vec![Some(ids)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn order_for_new_product_creates_it_first() {
        let t = TestTelemetry::new();
        let _guard = tracing::subscriber::set_default(t.subscriber());

        let mut store = MockOrderStore::new();
        store
            .expect_find_product_id()
            .with(eq("Tablet"))
            .times(1)
            .returning(|_| Ok(None));
        store
            .expect_insert_product()
            .with(eq("Tablet"))
            .times(1)
            .returning(|_| Ok(4));
        store
            .expect_insert_order()
            .withf(|order| order.product_id == 4 && order.quantity == 2)
            .times(1)
            .returning(|_| Ok(11));
        let mut cache = MockLastOrderCache::new();
        cache
            .expect_set_last_order()
            .with(eq(4_i64), eq(2_u32))
            .times(1)
            .return_const(());

        let resp = app(store, cache, &t)
            .oneshot(order_request(json!({"product_name": "Tablet", "quantity": 2})))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(t.counter_total(ORDERS_TOTAL), 2);
        let spans = t.finished_spans();
        let span = spans.iter().find(|s| s.name == "create_order").unwrap();
        assert_eq!(span.status, Status::Ok);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_order_insert_marks_span_and_skips_side_effects() {
        let t = TestTelemetry::new();
        let _guard = tracing::subscriber::set_default(t.subscriber());

        let mut store = MockOrderStore::new();
        store
            .expect_find_product_id()
            .returning(|_| Ok(Some(1)));
        store
            .expect_insert_order()
            .times(1)
            .returning(|_| Err(db_down()));
        let mut cache = MockLastOrderCache::new();
        cache.expect_set_last_order().never();

        let resp = app(store, cache, &t)
            .oneshot(order_request(json!({"product_name": "Book", "quantity": 5})))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp).await;
        assert_eq!(body["code"], "storage_error");
        assert_eq!(body["message"], "cannot create order");

        assert_eq!(t.counter_total(ORDERS_TOTAL), 0);
        assert_eq!(t.counter_total(PRODUCT_ORDER_TOTAL), 0);

        let spans = t.finished_spans();
        let orders: Vec<_> = spans.iter().filter(|s| s.name == "create_order").collect();
        assert_eq!(orders.len(), 1, "span ends exactly once");
        match &orders[0].status {
            Status::Error { description } => {
                assert!(description.contains("cannot create order"), "{description}")
            }
            other => panic!("expected error status, got {other:?}"),
        }
        assert!(order_created_ids(&t).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_product_insert_stops_before_the_order() {
        let t = TestTelemetry::new();
        let _guard = tracing::subscriber::set_default(t.subscriber());

        let mut store = MockOrderStore::new();
        store.expect_find_product_id().returning(|_| Ok(None));
        store
            .expect_insert_product()
            .times(1)
            .returning(|_| Err(db_down()));
        store.expect_insert_order().never();
        let mut cache = MockLastOrderCache::new();
        cache.expect_set_last_order().never();

        let resp = app(store, cache, &t)
            .oneshot(order_request(json!({"product_name": "Tablet", "quantity": 1})))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(resp).await["message"], "cannot create product");
        assert_eq!(t.counter_total(ORDERS_TOTAL), 0);
        assert!(order_created_ids(&t).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_lookup_does_not_fall_through_to_insert() {
        let t = TestTelemetry::new();
        let _guard = tracing::subscriber::set_default(t.subscriber());

        let mut store = MockOrderStore::new();
        store
            .expect_find_product_id()
            .returning(|_| Err(db_down()));
        store.expect_insert_product().never();
        store.expect_insert_order().never();
        let mut cache = MockLastOrderCache::new();
        cache.expect_set_last_order().never();

        let resp = app(store, cache, &t)
            .oneshot(order_request(json!({"product_name": "Book", "quantity": 1})))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(resp).await["message"], "cannot look up product");
    }

    #[tokio::test]
    async fn malformed_body_is_rejected_without_touching_the_store() {
        let app = router::build(test_support::idle_state());
        let resp = app
            .oneshot(order_request(json!({"product_name": "Book", "quantity": -1})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["code"], "bad_request");
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected() {
        let app = router::build(test_support::idle_state());
        let resp = app
            .oneshot(order_request(json!({"product_name": "Book", "quantity": 0})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn products_lists_the_catalogue() {
        let mut store = MockOrderStore::new();
        store.expect_list_products().returning(|| {
            Ok(vec![common::protocol::Product {
                id: 1,
                name: "Book".into(),
            }])
        });
        let state = test_support::state(
            store,
            MockLastOrderCache::new(),
            test_support::noop_metrics(),
        );

        let resp = router::build(state)
            .oneshot(Request::builder().uri("/products").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            body_json(resp).await,
            json!({"products": [{"id": 1, "name": "Book"}]})
        );
    }

    #[tokio::test]
    async fn products_storage_failure_is_500() {
        let mut store = MockOrderStore::new();
        store.expect_list_products().returning(|| Err(db_down()));
        let state = test_support::state(
            store,
            MockLastOrderCache::new(),
            test_support::noop_metrics(),
        );

        let resp = router::build(state)
            .oneshot(Request::builder().uri("/products").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn health_reflects_database_ping() {
        let mut store = MockOrderStore::new();
        store.expect_ping().returning(|| Ok(()));
        let healthy = test_support::state(
            store,
            MockLastOrderCache::new(),
            test_support::noop_metrics(),
        );
        let resp = health(State(healthy)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["database_ready"], true);

        let mut store = MockOrderStore::new();
        store.expect_ping().returning(|| Err(db_down()));
        let degraded = test_support::state(
            store,
            MockLastOrderCache::new(),
            test_support::noop_metrics(),
        );
        let resp = health(State(degraded)).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(resp).await;
        assert_eq!(body["code"], "service_unavailable");
        assert_eq!(body["message"], "database is not reachable");
    }

    #[tokio::test]
    async fn check_inventory_delay_is_in_range() {
        let Json(body) = check_inventory().await;
        assert_eq!(body.inventory_status, "in stock");
        assert!((100..400).contains(&body.check_time_ms));
    }

    #[tokio::test]
    async fn concurrency_test_sees_the_whole_burst() {
        let Json(body) = concurrency_test().await;
        assert!(
            body.goroutines >= CONCURRENCY_TEST_TASKS,
            "saw {}",
            body.goroutines
        );
    }

    #[test]
    fn burn_cpu_reports_elapsed_time() {
        assert!(burn_cpu() > Duration::ZERO);
    }

    #[test]
    fn order_error_display_leads_with_stage() {
        let err = OrderError::at("cannot create order")(db_down());
        assert!(err.to_string().starts_with("cannot create order: "));
        assert!(std::error::Error::source(&err).is_some());
    }
}
