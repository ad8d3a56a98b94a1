//! Prometheus metrics for the storefront.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides a Tower-compatible middleware for
//! HTTP RED metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "storefront_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "storefront_http_request_duration_seconds";

/// Typed table operations (counter). Labels: table, operation, status.
pub const TABLE_OPERATIONS_TOTAL: &str = "storefront_table_operations_total";

/// Reads that fell back from strict decoding to field-by-field
/// reconstruction (counter). Labels: entity.
pub const ENTITY_FALLBACK_READS_TOTAL: &str = "storefront_entity_fallback_reads_total";

/// Stored values dropped during reconstruction (counter). Labels: entity, field.
pub const ENTITY_SKIPPED_FIELDS_TOTAL: &str = "storefront_entity_skipped_fields_total";

/// Queue messages by outcome (counter). Labels: queue, outcome.
pub const QUEUE_MESSAGES_TOTAL: &str = "storefront_queue_messages_total";

/// Bytes written to blob containers and file shares (counter). Labels: container.
pub const BLOB_BYTES_WRITTEN_TOTAL: &str = "storefront_blob_bytes_written_total";

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a reference to the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(TABLE_OPERATIONS_TOTAL, "Typed table operations by outcome");
    describe_counter!(
        ENTITY_FALLBACK_READS_TOTAL,
        "Reads that fell back to field-by-field reconstruction"
    );
    describe_counter!(
        ENTITY_SKIPPED_FIELDS_TOTAL,
        "Stored values dropped because they did not fit the declared field type"
    );
    describe_counter!(QUEUE_MESSAGES_TOTAL, "Queue messages by outcome");
    describe_counter!(BLOB_BYTES_WRITTEN_TOTAL, "Bytes written to blob containers");
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Excludes `/metrics` from self-instrumentation to avoid feedback loops.
/// Must be the outermost layer so it captures the full request lifecycle.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Normalize an actual request path to a route template for metric labels,
/// so user ids, row keys and file names never become label values.
///
/// Examples:
/// - `/api/products` -> `/api/products`
/// - `/api/products/abc-123` -> `/api/products/{id}`
/// - `/api/tables/Product/Product/abc` -> `/api/tables/{table}/{pk}/{rk}`
/// - `/unknown/thing` -> `/{other}`
fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let template = match segments.as_slice() {
        [""] => "/",
        ["health"] => "/health",
        ["metrics"] => "/metrics",
        ["openapi.json"] => "/openapi.json",
        ["api", "tables", _] => "/api/tables/{table}",
        ["api", "tables", _, _, _] => "/api/tables/{table}/{pk}/{rk}",
        ["api", "products"] => "/api/products",
        ["api", "products", _] => "/api/products/{id}",
        ["api", "cart", _] => "/api/cart/{user}",
        ["api", "cart", _, _] => "/api/cart/{user}/{product}",
        ["api", "orders", _, "status"] => "/api/orders/{id}/status",
        ["api", "blobs", _, _] => "/api/blobs/{container}/{name}",
        ["api", "files"] => "/api/files",
        ["api", "files", _] => "/api/files/{name}",
        ["api", "customer", "send"] => "/api/customer/send",
        [
            "api",
            name @ ("StoreProduct" | "StoreCustomer" | "customers" | "orders" | "WriteToBlob"
            | "WriteToFile" | "ReceiveQueueMessages"),
        ] => return format!("/api/{name}"),
        _ => "/{other}",
    };
    template.to_string()
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> impl IntoResponse {
    let handle = init_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        handle.render(),
    )
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_static() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("/openapi.json"), "/openapi.json");
        assert_eq!(normalize_path("/api/products"), "/api/products");
        assert_eq!(normalize_path("/api/StoreProduct"), "/api/StoreProduct");
        assert_eq!(normalize_path("/api/customer/send"), "/api/customer/send");
    }

    #[test]
    fn test_normalize_path_templates() {
        assert_eq!(normalize_path("/api/products/abc-123"), "/api/products/{id}");
        assert_eq!(normalize_path("/api/tables/Product"), "/api/tables/{table}");
        assert_eq!(
            normalize_path("/api/tables/Product/Product/abc"),
            "/api/tables/{table}/{pk}/{rk}"
        );
        assert_eq!(normalize_path("/api/cart/u1"), "/api/cart/{user}");
        assert_eq!(normalize_path("/api/cart/u1/p9"), "/api/cart/{user}/{product}");
        assert_eq!(normalize_path("/api/files/contract.pdf"), "/api/files/{name}");
        assert_eq!(
            normalize_path("/api/blobs/productimages/x.jpg"),
            "/api/blobs/{container}/{name}"
        );
        assert_eq!(normalize_path("/api/orders/o1/status"), "/api/orders/{id}/status");
    }

    #[test]
    fn test_normalize_path_unknown() {
        assert_eq!(normalize_path("/wp-admin/login.php"), "/{other}");
        assert_eq!(normalize_path("/api/StoreSomething"), "/{other}");
    }
}
