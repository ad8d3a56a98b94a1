//! Axum router construction.
//!
//! The [`app`] function wires every storefront endpoint to its handler and
//! returns a ready-to-serve [`axum::Router`].

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::errors::{generate_request_id, REQUEST_ID_HEADER};
use crate::handlers::{blobs, cart, customers, files, orders, products, queue, tables};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

// -- OpenAPI specification ----------------------------------------------------

/// OpenAPI documentation for the storefront API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "0.1.0",
        description = "Product catalogue, carts, orders and their storage"
    ),
    paths(
        health_check,
        // Ingestion and raw rows
        tables::store_product,
        tables::store_customer,
        tables::ingest_document,
        tables::list_rows,
        tables::get_row,
        tables::delete_row,
        // Typed resources
        products::list_products,
        products::get_product,
        products::create_product,
        products::update_product,
        products::delete_product,
        customers::list_customers,
        customers::send_customer,
        cart::get_cart,
        cart::add_to_cart,
        cart::clear_cart,
        cart::remove_from_cart,
        orders::place_order,
        orders::list_orders,
        orders::set_order_status,
        // Blobs, files and queues
        blobs::write_to_blob,
        blobs::get_blob,
        blobs::delete_blob,
        files::write_to_file,
        files::list_files,
        files::download_file,
        files::delete_file,
        queue::receive_queue_messages,
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Ingestion", description = "Free-form document ingestion"),
        (name = "Tables", description = "Raw table rows"),
        (name = "Products", description = "Product catalogue"),
        (name = "Customers", description = "Customer profiles"),
        (name = "Cart", description = "Shopping carts"),
        (name = "Orders", description = "Order placement"),
        (name = "Blobs", description = "Product images"),
        (name = "Files", description = "Contract file share"),
        (name = "Queues", description = "Queue inspection"),
    )
)]
struct ApiDoc;

/// Build the axum [`Router`] with every storefront route.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let body_limit = state.config.server.max_body_size;

    let mut router: Router<Arc<AppState>> = Router::new();
    if state.config.observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .route("/health", get(health_check))
        .route("/openapi.json", get(openapi_json))
        // Ingestion
        .route("/api/StoreProduct", post(tables::store_product))
        .route("/api/StoreCustomer", post(tables::store_customer))
        .route(
            "/api/tables/:table",
            post(tables::ingest_document).get(tables::list_rows),
        )
        .route(
            "/api/tables/:table/:pk/:rk",
            get(tables::get_row).delete(tables::delete_row),
        )
        // Products
        .route(
            "/api/products",
            get(products::list_products).post(products::create_product),
        )
        .route(
            "/api/products/:id",
            get(products::get_product)
                .put(products::update_product)
                .delete(products::delete_product),
        )
        // Customers
        .route("/api/customers", get(customers::list_customers))
        .route("/api/customer/send", post(customers::send_customer))
        // Cart
        .route(
            "/api/cart/:user",
            get(cart::get_cart)
                .post(cart::add_to_cart)
                .delete(cart::clear_cart),
        )
        .route("/api/cart/:user/:product", delete(cart::remove_from_cart))
        // Orders
        .route(
            "/api/orders",
            get(orders::list_orders).post(orders::place_order),
        )
        .route("/api/orders/:id/status", post(orders::set_order_status))
        // Product images
        .route("/api/WriteToBlob", post(blobs::write_to_blob))
        .route(
            "/api/blobs/:container/:name",
            get(blobs::get_blob).delete(blobs::delete_blob),
        )
        // Contract files
        .route("/api/WriteToFile", post(files::write_to_file))
        .route("/api/files", get(files::list_files))
        .route(
            "/api/files/:name",
            get(files::download_file).delete(files::delete_file),
        )
        // Queues
        .route("/api/ReceiveQueueMessages", get(queue::receive_queue_messages))
        .with_state(state)
        // Layer ordering: inner layers run first, outer layers wrap them.
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(common_headers_middleware))
        // metrics_middleware is outer (captures full request lifecycle).
        .layer(middleware::from_fn(metrics_middleware))
}

// -- Common headers middleware -----------------------------------------------

/// Adds common response headers to every response:
/// - `x-request-id`: the caller's id if it sent one, otherwise a fresh
///   16-character hex id (error responses already carry one)
/// - `Date`: RFC 7231 formatted timestamp
/// - `Server`: `Storefront`
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let incoming = req.headers().get(REQUEST_ID_HEADER).cloned();
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if let Some(id) = incoming {
        headers.insert(REQUEST_ID_HEADER, id);
    } else if !headers.contains_key(REQUEST_ID_HEADER) {
        if let Ok(id) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert(REQUEST_ID_HEADER, id);
        }
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(date) = HeaderValue::from_str(&date) {
        headers.insert("date", date);
    }
    headers.insert("server", HeaderValue::from_static("Storefront"));

    response
}

// -- Health check ------------------------------------------------------------

/// `GET /health` -- Returns `{"status": "ok"}` with 200 OK.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "HealthCheck",
    responses(
        (status = 200, description = "Health check OK")
    )
)]
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

/// `GET /openapi.json`
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
