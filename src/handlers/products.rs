//! Product catalogue handlers.
//!
//! Every write sends a notice to the product queue. Deleting a product also
//! deletes its image blob.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use garde::Validate;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::entity::{ETag, EntityIdentity};
use crate::errors::ApiError;
use crate::handlers::json_body;
use crate::models::{
    product_added_notice, product_altered_notice, product_deleted_notice, to_json, Product,
    PRODUCT_PARTITION,
};
use crate::queue::PRODUCT_QUEUE;
use crate::storage::backend::blob_name_from_url;
use crate::AppState;

/// Body of `POST /api/products` and `PUT /api/products/:id`.
#[derive(Debug, Clone, Default, Deserialize, Validate, utoipa::ToSchema)]
#[serde(default, rename_all = "PascalCase")]
pub struct ProductInput {
    #[garde(length(min = 1, max = 200))]
    pub product_name: String,
    #[garde(length(max = 2000))]
    pub description: String,
    #[garde(length(min = 1, max = 50))]
    pub price: String,
    #[garde(length(max = 100))]
    pub category: String,
    #[garde(range(min = 0))]
    pub stock_quantity: i32,
    #[garde(skip)]
    pub image_url: Option<String>,
}

impl ProductInput {
    fn apply(self, product: &mut Product) {
        product.product_name = self.product_name;
        product.description = self.description;
        product.price = self.price;
        product.category = self.category;
        product.stock_quantity = self.stock_quantity;
        product.image_url = self.image_url.filter(|url| !url.is_empty());
    }
}

async fn load(state: &AppState, id: &str) -> Result<Product, ApiError> {
    state
        .products
        .get_entity(PRODUCT_PARTITION, id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Product {} not found", id)))
}

async fn notify(state: &AppState, text: String) -> Result<(), ApiError> {
    if let Some(queue) = state.queue(PRODUCT_QUEUE) {
        queue.send(&text).await?;
    }
    Ok(())
}

/// `GET /api/products`
#[utoipa::path(
    get,
    path = "/api/products",
    tag = "Products",
    responses((status = 200, description = "Every product, ordered by id"))
)]
pub async fn list_products(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Value>>, ApiError> {
    let products = state.products.get_all_entities().await?;
    Ok(Json(products.iter().map(to_json).collect()))
}

/// `GET /api/products/:id`
#[utoipa::path(
    get,
    path = "/api/products/{id}",
    tag = "Products",
    params(("id" = String, Path, description = "Product row key")),
    responses(
        (status = 200, description = "The product"),
        (status = 404, description = "No such product")
    )
)]
pub async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let product = load(&state, &id).await?;
    Ok(Json(to_json(&product)))
}

/// `POST /api/products`
#[utoipa::path(
    post,
    path = "/api/products",
    tag = "Products",
    request_body = ProductInput,
    responses(
        (status = 201, description = "Product created"),
        (status = 400, description = "Validation failed")
    )
)]
pub async fn create_product(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ProductInput>, JsonRejection>,
) -> Result<Response, ApiError> {
    let input = json_body(payload)?;
    input.validate()?;

    let now = Utc::now();
    let mut product = Product {
        identity: EntityIdentity::new(PRODUCT_PARTITION, uuid::Uuid::new_v4().to_string()),
        created_date: now,
        ..Default::default()
    };
    input.apply(&mut product);

    let etag = state.products.add_entity(&product).await?;
    product.identity.etag = Some(etag);
    info!(product_id = %product.identity.row_key, name = %product.product_name, "Product created");

    notify(&state, product_added_notice(&product.product_name, now)).await?;
    Ok((StatusCode::CREATED, Json(to_json(&product))).into_response())
}

/// `PUT /api/products/:id`
///
/// Honours `If-Match`; without it the update is conditional on the version
/// just read.
#[utoipa::path(
    put,
    path = "/api/products/{id}",
    tag = "Products",
    params(("id" = String, Path, description = "Product row key")),
    request_body = ProductInput,
    responses(
        (status = 200, description = "Product replaced"),
        (status = 400, description = "Validation failed"),
        (status = 404, description = "No such product"),
        (status = 412, description = "ETag mismatch")
    )
)]
pub async fn update_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<ProductInput>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let input = json_body(payload)?;
    input.validate()?;

    let mut product = load(&state, &id).await?;
    if let Some(if_match) = headers.get("if-match").and_then(|v| v.to_str().ok()) {
        product.identity.etag = Some(if if_match.trim() == "*" {
            ETag::any()
        } else {
            ETag::new(if_match.trim())
        });
    }
    input.apply(&mut product);

    let etag = state.products.update_entity(&product).await?;
    product.identity.etag = Some(etag);
    info!(product_id = %id, "Product updated");

    notify(&state, product_altered_notice(&product.product_name)).await?;
    Ok(Json(to_json(&product)))
}

/// `DELETE /api/products/:id`
#[utoipa::path(
    delete,
    path = "/api/products/{id}",
    tag = "Products",
    params(("id" = String, Path, description = "Product row key")),
    responses(
        (status = 204, description = "Product deleted"),
        (status = 404, description = "No such product")
    )
)]
pub async fn delete_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let product = load(&state, &id).await?;
    state.products.delete_entity(PRODUCT_PARTITION, &id).await?;

    if let Some(name) = product.image_url.as_deref().and_then(blob_name_from_url) {
        match state.images.delete(&name).await {
            Ok(true) => info!(blob = %name, "Product image deleted"),
            Ok(false) => {}
            Err(e) => warn!(blob = %name, "Failed to delete product image: {}", e),
        }
    }
    info!(product_id = %id, "Product deleted");

    notify(&state, product_deleted_notice(&product.product_name)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::*;
    use crate::server::app;
    use bytes::Bytes;
    use serde_json::json;

    fn lamp() -> Value {
        json!({
            "ProductName": "Lamp",
            "Description": "Desk lamp",
            "Price": "$19.99",
            "Category": "Lighting",
            "StockQuantity": 4
        })
    }

    #[tokio::test]
    async fn test_create_get_and_notice() {
        let state = memory_state().await;
        let app = app(state.clone());

        let response = send(&app, json_request("POST", "/api/products", lamp())).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["PartitionKey"], "Product");
        let id = created["RowKey"].as_str().unwrap().to_string();

        let response = send(&app, empty_request("GET", &format!("/api/products/{}", id))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let product = body_json(response).await;
        assert_eq!(product["ProductName"], "Lamp");
        assert_eq!(product["StockQuantity"], 4);

        let notices = state.queue(PRODUCT_QUEUE).unwrap().peek(10).await.unwrap();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].text.starts_with("New product added: Lamp at "));
    }

    #[tokio::test]
    async fn test_create_validation_error() {
        let app = app(memory_state().await);
        let body = json!({"ProductName": "", "Price": "1", "StockQuantity": -1});
        let response = send(&app, json_request("POST", "/api/products", body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "InvalidArgument");
    }

    #[tokio::test]
    async fn test_update_with_stale_etag_fails() {
        let state = memory_state().await;
        let app = app(state.clone());
        let created = body_json(send(&app, json_request("POST", "/api/products", lamp())).await).await;
        let id = created["RowKey"].as_str().unwrap().to_string();
        let stale = created["ETag"].as_str().unwrap().to_string();

        let mut body = lamp();
        body["StockQuantity"] = json!(9);
        let response = send(&app, json_request("PUT", &format!("/api/products/{}", id), body.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["StockQuantity"], 9);

        let mut request = json_request("PUT", &format!("/api/products/{}", id), body);
        request
            .headers_mut()
            .insert("if-match", stale.parse().unwrap());
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);

        let notices = state.queue(PRODUCT_QUEUE).unwrap().peek(10).await.unwrap();
        assert_eq!(notices[1].text, "Product: Lamp has been altered");
    }

    #[tokio::test]
    async fn test_delete_removes_image() {
        let state = memory_state().await;
        state
            .images
            .put("pic.jpg", Bytes::from_static(b"jpeg"), true)
            .await
            .unwrap();
        let app = app(state.clone());

        let mut body = lamp();
        body["ImageUrl"] = json!("http://localhost:8080/api/blobs/productimages/pic.jpg");
        let created = body_json(send(&app, json_request("POST", "/api/products", body)).await).await;
        let id = created["RowKey"].as_str().unwrap().to_string();

        let response = send(&app, empty_request("DELETE", &format!("/api/products/{}", id))).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!state.images.exists("pic.jpg").await.unwrap());

        let response = send(&app, empty_request("GET", &format!("/api/products/{}", id))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let notices = state.queue(PRODUCT_QUEUE).unwrap().peek(10).await.unwrap();
        assert_eq!(notices.last().unwrap().text, "Product: Lamp has been deleted");
    }

    #[tokio::test]
    async fn test_typed_read_tolerates_ingested_doubles() {
        let app = app(memory_state().await);
        let doc = json!({"RowKey": "p9", "ProductName": "Rug", "StockQuantity": 2, "Price": 15});
        send(&app, json_request("POST", "/api/StoreProduct", doc)).await;

        let response = send(&app, empty_request("GET", "/api/products/p9")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let product = body_json(response).await;
        assert_eq!(product["ProductName"], "Rug");
        // Ingested numbers are doubles, which an integer column does not take.
        assert_eq!(product["StockQuantity"], 0);
    }
}
