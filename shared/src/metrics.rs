//! Prometheus metrics shared by the gateway and billing processes

use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, Encoder,
    HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};

lazy_static! {
    // -- proxy path ---------------------------------------------------

    pub static ref PROXY_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "proxy_requests_total",
        "Total number of proxied requests",
        &["method", "status"]
    )
    .unwrap();

    pub static ref PROXY_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "proxy_request_duration_seconds",
        "Proxied request duration in seconds, upstream round trip included",
        &["method"],
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    pub static ref RATE_LIMIT_DECISIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "rate_limit_decisions_total",
        "Rate limiter outcomes",
        &["decision"]
    )
    .unwrap();

    pub static ref KEY_CONTEXT_CACHE_TOTAL: IntCounterVec = register_int_counter_vec!(
        "key_context_cache_total",
        "Key context cache lookups",
        &["outcome"]
    )
    .unwrap();

    pub static ref USAGE_BUFFER_DEPTH: IntGaugeVec = register_int_gauge_vec!(
        "usage_buffer_depth",
        "Number of usage records waiting in the fast-store buffer",
        &["buffer"]
    )
    .unwrap();

    pub static ref USAGE_RECORDS_DRAINED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "usage_records_drained_total",
        "Usage records persisted to the durable store by the drain task",
        &["outcome"]
    )
    .unwrap();

    // -- billing --------------------------------------------------------

    pub static ref INVOICES_GENERATED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "invoices_generated_total",
        "Invoices generated, by trigger and outcome",
        &["trigger", "outcome"]
    )
    .unwrap();

    pub static ref SCHEDULED_JOB_RUNS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "scheduled_job_runs_total",
        "Scheduled billing job runs",
        &["job", "outcome"]
    )
    .unwrap();

    pub static ref SCHEDULED_JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "scheduled_job_duration_seconds",
        "Scheduled billing job duration in seconds",
        &["job"],
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    )
    .unwrap();

    // -- database / cache -------------------------------------------------

    pub static ref DB_QUERY_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();
}

/// Handler for the `/metrics` endpoint, scraped by Prometheus.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => {
            let body = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, body).into_response()
        }
        Err(e) => {
            tracing::error!("failed to encode metrics: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}
