//! HTTP handlers for the storefront API.
//!
//! Each submodule owns one resource family. Handlers extract typed
//! arguments, call the services on [`crate::AppState`] and return
//! [`crate::errors::ApiError`] on failure.

pub mod blobs;
pub mod cart;
pub mod customers;
pub mod files;
pub mod orders;
pub mod products;
pub mod queue;
pub mod tables;

use axum::extract::rejection::JsonRejection;
use axum::Json;

use crate::errors::ApiError;

/// Unwrap a JSON body, turning axum's rejection into a 400 with our body
/// shape.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::invalid(rejection.body_text()))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, Response};
    use axum::Router;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::storage::memory::MemoryBlobStore;
    use crate::table::memory::MemoryTableStore;
    use crate::AppState;

    /// State over in-memory tables and blob containers.
    pub async fn memory_state() -> Arc<AppState> {
        let config = Config::default();
        let state = AppState::build(
            config,
            Arc::new(MemoryTableStore::new()),
            Arc::new(MemoryBlobStore::new("productimages", 1 << 20)),
            Arc::new(MemoryBlobStore::new("contracts", 1 << 20)),
        )
        .await
        .unwrap();
        Arc::new(state)
    }

    pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
        app.clone().oneshot(request).await.unwrap()
    }

    pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    pub async fn body_json(response: Response<Body>) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
