// =============================================================================
// METRICS MODULE
// =============================================================================
// Prometheus metrics for the order engine.
//
// The recorder is installed once by the binary. Without a recorder (unit and
// API tests) every macro below is a no-op, so services can record freely.
// =============================================================================

use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// METRIC NAMES
// =============================================================================

/// Labels: method, endpoint, status
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";

/// Labels: method, endpoint
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

/// Labels: outcome (reserved / released / insufficient_stock / unavailable)
pub const STOCK_RESERVATIONS_TOTAL: &str = "stock_reservations_total";

pub const ORDERS_CREATED_TOTAL: &str = "orders_created_total";

/// Labels: reason
pub const ORDER_FAILURES_TOTAL: &str = "order_failures_total";

pub const ORDERS_CANCELLED_TOTAL: &str = "orders_cancelled_total";

pub const FLASH_SALE_VIEWS_TOTAL: &str = "flash_sale_views_total";

/// Labels: operation (select/update)
pub const DB_QUERY_DURATION_SECONDS: &str = "db_query_duration_seconds";

/// Labels: operation (get/setex)
pub const REDIS_OPERATION_DURATION_SECONDS: &str = "redis_operation_duration_seconds";

// =============================================================================
// SETUP FUNCTION
// =============================================================================
/// Install the Prometheus recorder and return the handle used by /metrics.
pub fn setup_metrics() -> Result<PrometheusHandle> {
    let latency_buckets = &[
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(HTTP_REQUEST_DURATION_SECONDS.to_string()),
            latency_buckets,
        )?
        .set_buckets_for_metric(
            Matcher::Full(DB_QUERY_DURATION_SECONDS.to_string()),
            latency_buckets,
        )?
        .install_recorder()?;

    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests received");
    describe_histogram!(HTTP_REQUEST_DURATION_SECONDS, "HTTP request latency in seconds");
    describe_counter!(
        STOCK_RESERVATIONS_TOTAL,
        "Stock ledger operations by outcome"
    );
    describe_counter!(ORDERS_CREATED_TOTAL, "Orders committed");
    describe_counter!(ORDER_FAILURES_TOTAL, "Order attempts rolled back, by reason");
    describe_counter!(ORDERS_CANCELLED_TOTAL, "Orders cancelled with stock restored");
    describe_counter!(FLASH_SALE_VIEWS_TOTAL, "Single flash sale fetches");
    describe_histogram!(DB_QUERY_DURATION_SECONDS, "Database query latency in seconds");
    describe_histogram!(
        REDIS_OPERATION_DURATION_SECONDS,
        "Flash sale cache latency in seconds"
    );

    Ok(handle)
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

pub fn record_http_request(method: &str, endpoint: &str, status: u16, duration_secs: f64) {
    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string()
    )
    .record(duration_secs);
}

pub fn record_reservation(outcome: &'static str) {
    counter!(STOCK_RESERVATIONS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_order_created() {
    counter!(ORDERS_CREATED_TOTAL).increment(1);
}

pub fn record_order_failure(reason: &'static str) {
    counter!(ORDER_FAILURES_TOTAL, "reason" => reason).increment(1);
}

pub fn record_order_cancelled() {
    counter!(ORDERS_CANCELLED_TOTAL).increment(1);
}

pub fn record_flash_sale_view() {
    counter!(FLASH_SALE_VIEWS_TOTAL).increment(1);
}

pub fn record_db_query(operation: &'static str, duration_secs: f64) {
    histogram!(DB_QUERY_DURATION_SECONDS, "operation" => operation).record(duration_secs);
}

pub fn record_redis_operation(operation: &'static str, duration_secs: f64) {
    histogram!(REDIS_OPERATION_DURATION_SECONDS, "operation" => operation).record(duration_secs);
}
