//! Metric pipeline and the storefront's instruments.

use std::time::Duration;

use anyhow::{Context, Result};
use opentelemetry::{
    metrics::{Counter, Histogram, Meter, Unit},
    KeyValue,
};
use opentelemetry_sdk::{metrics::SdkMeterProvider, runtime, Resource};

use super::TelemetrySettings;

pub const ORDERS_TOTAL: &str = "orders_total";
pub const PRODUCT_ORDER_TOTAL: &str = "product_order_total";
pub const HTTP_REQUEST_COUNT: &str = "http_request_count";
pub const HTTP_REQUEST_DURATION: &str = "http_request_duration";

/// Attribute key identifying the product on per-product counters.
pub const PRODUCT_KEY: &str = "product";

/// Meter provider that collects every `metrics_interval` and exports over OTLP.
pub fn otlp_meter_provider(
    settings: &TelemetrySettings,
    resource: Resource,
) -> Result<SdkMeterProvider> {
    opentelemetry_otlp::new_pipeline()
        .metrics(runtime::Tokio)
        .with_exporter(
            settings
                .transport
                .exporter(&settings.endpoint, settings.export_timeout)?,
        )
        .with_resource(resource)
        .with_period(settings.metrics_interval)
        .build()
        .context("failed to install OTLP metrics pipeline")
}

/// Instruments recorded by request handling. Counters are monotonic `u64`, so
/// a negative increment cannot be expressed.
#[derive(Clone)]
pub struct ShopMetrics {
    orders_total: Counter<u64>,
    product_order_total: Counter<u64>,
    http_request_count: Counter<u64>,
    http_request_duration: Histogram<f64>,
}

impl ShopMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            orders_total: meter
                .u64_counter(ORDERS_TOTAL)
                .with_description("Units ordered across all products")
                .init(),
            product_order_total: meter
                .u64_counter(PRODUCT_ORDER_TOTAL)
                .with_description("Units ordered, by product")
                .init(),
            http_request_count: meter
                .u64_counter(HTTP_REQUEST_COUNT)
                .with_description("HTTP requests served")
                .init(),
            http_request_duration: meter
                .f64_histogram(HTTP_REQUEST_DURATION)
                .with_description("HTTP request latency")
                .with_unit(Unit::new("s"))
                .init(),
        }
    }

    /// Count `quantity` units of `product` on both order counters.
    pub fn record_order(&self, product: &str, quantity: u64) {
        self.orders_total.add(quantity, &[]);
        self.product_order_total
            .add(quantity, &[KeyValue::new(PRODUCT_KEY, product.to_owned())]);
    }

    /// Count one served request and its latency.
    pub fn record_request(&self, method: &str, route: &str, status: u16, elapsed: Duration) {
        let attributes = [
            KeyValue::new("http.request.method", method.to_owned()),
            KeyValue::new("http.route", route.to_owned()),
            KeyValue::new("http.response.status_code", i64::from(status)),
        ];
        self.http_request_count.add(1, &attributes);
        self.http_request_duration
            .record(elapsed.as_secs_f64(), &attributes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::testing::TestTelemetry;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn order_counters_accumulate_quantities() {
        let t = TestTelemetry::new();
        let metrics = t.shop_metrics();

        metrics.record_order("Book", 3);
        metrics.record_order("Laptop", 4);

        assert_eq!(t.counter_total(ORDERS_TOTAL), 7);
        assert_eq!(t.counter_total(PRODUCT_ORDER_TOTAL), 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn nothing_recorded_means_nothing_counted() {
        let t = TestTelemetry::new();
        let _metrics = t.shop_metrics();

        assert_eq!(t.counter_total(ORDERS_TOTAL), 0);
        assert_eq!(t.counter_total(HTTP_REQUEST_COUNT), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn request_counter_counts_each_request_once() {
        let t = TestTelemetry::new();
        let metrics = t.shop_metrics();

        metrics.record_request("GET", "/products", 200, Duration::from_millis(5));
        metrics.record_request("POST", "/orders", 500, Duration::from_millis(9));

        assert_eq!(t.counter_total(HTTP_REQUEST_COUNT), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn totals_are_cumulative_across_collections() {
        let t = TestTelemetry::new();
        let metrics = t.shop_metrics();

        metrics.record_order("Book", 2);
        assert_eq!(t.counter_total(ORDERS_TOTAL), 2);

        metrics.record_order("Book", 1);
        assert_eq!(t.counter_total(ORDERS_TOTAL), 3);
    }
}
