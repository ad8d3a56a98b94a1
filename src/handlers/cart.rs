//! Shopping cart handlers.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::errors::ApiError;
use crate::handlers::json_body;
use crate::models::{to_json, PRODUCT_PARTITION};
use crate::AppState;

/// Body of `POST /api/cart/:user`.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct AddToCart {
    pub product_id: String,
}

/// `GET /api/cart/:user`
#[utoipa::path(
    get,
    path = "/api/cart/{user}",
    tag = "Cart",
    params(("user" = String, Path, description = "User id")),
    responses((status = 200, description = "Cart lines, newest first"))
)]
pub async fn get_cart(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let items = state.cart.get_cart(&user).await?;
    Ok(Json(items.iter().map(to_json).collect()))
}

/// `POST /api/cart/:user` -- add one of a product.
#[utoipa::path(
    post,
    path = "/api/cart/{user}",
    tag = "Cart",
    params(("user" = String, Path, description = "User id")),
    request_body = AddToCart,
    responses(
        (status = 200, description = "The updated cart line"),
        (status = 404, description = "No such product"),
        (status = 412, description = "Concurrent updates kept conflicting")
    )
)]
pub async fn add_to_cart(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
    payload: Result<Json<AddToCart>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let request = json_body(payload)?;
    let product = state
        .products
        .get_entity(PRODUCT_PARTITION, &request.product_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Product {} not found", request.product_id)))?;

    let line = state.cart.add_item(&user, &product).await?;
    info!(user = %user, product_id = %request.product_id, quantity = line.quantity, "Cart updated");
    Ok(Json(to_json(&line)))
}

/// `DELETE /api/cart/:user` -- empty the cart.
#[utoipa::path(
    delete,
    path = "/api/cart/{user}",
    tag = "Cart",
    params(("user" = String, Path, description = "User id")),
    responses((status = 200, description = "Number of lines removed"))
)]
pub async fn clear_cart(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let removed = state.cart.clear(&user).await?;
    Ok(Json(json!({ "removed": removed })))
}

/// `DELETE /api/cart/:user/:product`
#[utoipa::path(
    delete,
    path = "/api/cart/{user}/{product}",
    tag = "Cart",
    params(
        ("user" = String, Path, description = "User id"),
        ("product" = String, Path, description = "Product id")
    ),
    responses((status = 204, description = "Line removed, or was already absent"))
)]
pub async fn remove_from_cart(
    State(state): State<Arc<AppState>>,
    Path((user, product)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.cart.remove_item(&user, &product).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityIdentity;
    use crate::handlers::test_support::*;
    use crate::models::Product;

    async fn seed(state: &crate::AppState, id: &str, price: &str) {
        let product = Product {
            identity: EntityIdentity::new(PRODUCT_PARTITION, id),
            product_name: format!("Product {}", id),
            price: price.to_string(),
            ..Default::default()
        };
        state.products.add_entity(&product).await.unwrap();
    }

    #[tokio::test]
    async fn test_add_twice_increments() {
        let state = memory_state().await;
        seed(&state, "p1", "$5.25").await;
        let app = crate::server::app(state);

        let body = json!({"ProductId": "p1"});
        send(&app, json_request("POST", "/api/cart/u1", body.clone())).await;
        let response = send(&app, json_request("POST", "/api/cart/u1", body)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let line = body_json(response).await;
        assert_eq!(line["Quantity"], 2);
        assert_eq!(line["PartitionKey"], "u1");
        assert_eq!(line["RowKey"], "p1");

        let cart = body_json(send(&app, empty_request("GET", "/api/cart/u1")).await).await;
        assert_eq!(cart.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_product_is_not_found() {
        let app = crate::server::app(memory_state().await);
        let response = send(&app, json_request("POST", "/api/cart/u1", json!({"ProductId": "nope"}))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let state = memory_state().await;
        seed(&state, "p1", "1").await;
        seed(&state, "p2", "2").await;
        let app = crate::server::app(state);
        for id in ["p1", "p2"] {
            send(&app, json_request("POST", "/api/cart/u7", json!({"ProductId": id}))).await;
        }

        let response = send(&app, empty_request("DELETE", "/api/cart/u7/p1")).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send(&app, empty_request("DELETE", "/api/cart/u7")).await;
        assert_eq!(body_json(response).await["removed"], 1);
        let cart = body_json(send(&app, empty_request("GET", "/api/cart/u7")).await).await;
        assert!(cart.as_array().unwrap().is_empty());
    }
}
