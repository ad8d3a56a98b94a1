//! Order handlers. Placing an order only queues it.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::ApiError;
use crate::handlers::json_body;
use crate::models::to_json;
use crate::orders::PlaceOrder;
use crate::AppState;

/// Body of `POST /api/orders/:id/status`.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct StatusUpdate {
    pub status: String,
}

/// `POST /api/orders`
#[utoipa::path(
    post,
    path = "/api/orders",
    tag = "Orders",
    request_body = PlaceOrder,
    responses(
        (status = 202, description = "Order queued"),
        (status = 400, description = "Validation failed"),
        (status = 404, description = "Unknown customer or product")
    )
)]
pub async fn place_order(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PlaceOrder>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = json_body(payload)?;
    let (message_id, message) = state.orders.place_order(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "MessageId": message_id,
            "Order": message,
        })),
    )
        .into_response())
}

/// `GET /api/orders`
#[utoipa::path(
    get,
    path = "/api/orders",
    tag = "Orders",
    responses((status = 200, description = "Stored orders"))
)]
pub async fn list_orders(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Value>>, ApiError> {
    let orders = state.orders.list_orders().await?;
    Ok(Json(orders.iter().map(to_json).collect()))
}

/// `POST /api/orders/:id/status`
#[utoipa::path(
    post,
    path = "/api/orders/{id}/status",
    tag = "Orders",
    params(("id" = String, Path, description = "Order row key")),
    request_body = StatusUpdate,
    responses(
        (status = 200, description = "The updated order"),
        (status = 404, description = "No such order")
    )
)]
pub async fn set_order_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let update = json_body(payload)?;
    if update.status.trim().is_empty() {
        return Err(ApiError::invalid("Status must not be empty"));
    }
    let order = state.orders.set_status(&id, update.status.trim()).await?;
    Ok(Json(to_json(&order)))
}
