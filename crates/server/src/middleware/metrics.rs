/// Prometheus metrics middleware and `/metrics` exporter.
use axum::{
    body::Body,
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use lazy_static::lazy_static;
use prometheus::{register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec, TextEncoder};
use std::time::Instant;
use tracing::error;

lazy_static! {
    static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "endpoint", "status"]
    )
    .unwrap();

    static ref HTTP_REQUEST_COUNTER: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total HTTP requests",
        &["method", "endpoint", "status"]
    )
    .unwrap();

    static ref HTTP_ERROR_COUNTER: IntCounterVec = register_int_counter_vec!(
        "http_errors_total",
        "Total HTTP errors",
        &["method", "endpoint", "status"]
    )
    .unwrap();
}

pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let endpoint = normalize_endpoint(&path);

    let response = next.run(request).await;
    let status = response.status().as_u16().to_string();
    let duration = start.elapsed().as_secs_f64();

    HTTP_REQUEST_DURATION.with_label_values(&[&method, &endpoint, &status]).observe(duration);
    HTTP_REQUEST_COUNTER.with_label_values(&[&method, &endpoint, &status]).inc();

    if response.status().is_client_error() || response.status().is_server_error() {
        HTTP_ERROR_COUNTER.with_label_values(&[&method, &endpoint, &status]).inc();
    }

    response
}

/// Collapses UUIDs and hex ids in a path to `{id}` so per-client routes
/// don't each mint their own metric series.
fn normalize_endpoint(path: &str) -> String {
    path.split('/')
        .map(|part| {
            if part.len() == 36 && part.contains('-') {
                "{id}".to_string()
            } else if !part.is_empty() && part.len() >= 8 && part.chars().all(|c| c.is_ascii_hexdigit()) {
                "{id}".to_string()
            } else {
                part.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("failed to encode metrics: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics".to_string()).into_response();
    }

    let output = String::from_utf8(buffer).unwrap_or_else(|e| {
        error!("failed to convert metrics to utf-8: {}", e);
        "failed to convert metrics".to_string()
    });

    (StatusCode::OK, output).into_response()
}

pub fn create_metrics_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/metrics", get(metrics_handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_uuid_and_hex_segments() {
        assert_eq!(
            normalize_endpoint("/v1/admin/clients/550e8400-e29b-41d4-a716-446655440000"),
            "/v1/admin/clients/{id}"
        );
        assert_eq!(normalize_endpoint("/v1/client/config"), "/v1/client/config");
    }
}
