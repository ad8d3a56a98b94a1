//! Customer handlers.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::{json, Value};
use tracing::info;

use crate::entity::EntityIdentity;
use crate::errors::ApiError;
use crate::handlers::json_body;
use crate::models::{to_json, CustomerProfile, CUSTOMER_PARTITION};
use crate::AppState;

/// `GET /api/customers`
#[utoipa::path(
    get,
    path = "/api/customers",
    tag = "Customers",
    responses((status = 200, description = "Every customer"))
)]
pub async fn list_customers(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Value>>, ApiError> {
    let customers = state.customers.get_all_entities().await?;
    Ok(Json(customers.iter().map(to_json).collect()))
}

/// Identity column from the body, if it is a non-empty string.
fn key_from(document: &Value, name: &str) -> Option<String> {
    document
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `POST /api/customer/send` -- save a customer profile.
///
/// Missing keys default to partition "Customer" and a fresh row key; a
/// missing `CreatedDate` becomes now.
#[utoipa::path(
    post,
    path = "/api/customer/send",
    tag = "Customers",
    responses(
        (status = 200, description = "Customer saved"),
        (status = 400, description = "Invalid customer data"),
        (status = 409, description = "Customer already exists")
    )
)]
pub async fn send_customer(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let document = json_body(payload)?;
    let mut profile: CustomerProfile = serde_json::from_value(document.clone())
        .map_err(|e| ApiError::invalid(format!("Invalid customer data: {}", e)))?;

    profile.identity = EntityIdentity::new(
        key_from(&document, "PartitionKey").unwrap_or_else(|| CUSTOMER_PARTITION.to_string()),
        key_from(&document, "RowKey").unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
    );
    if profile.created_date == DateTime::<FixedOffset>::default() {
        profile.created_date = Utc::now().fixed_offset();
    }

    state.customers.add_entity(&profile).await?;
    info!(customer_id = %profile.identity.row_key, "Customer saved");

    Ok(Json(json!({
        "Message": format!("Customer {} saved.", profile.full_name),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::*;
    use crate::server::app;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_send_then_list() {
        let app = app(memory_state().await);
        let body = json!({
            "RowKey": "c1",
            "FullName": "Ada Lovelace",
            "Email": "ada@example.com",
            "DateOfBirth": "1815-12-10T00:00:00Z"
        });
        let response = send(&app, json_request("POST", "/api/customer/send", body)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["Message"], "Customer Ada Lovelace saved.");

        let response = send(&app, empty_request("GET", "/api/customers")).await;
        let customers = body_json(response).await;
        assert_eq!(customers.as_array().unwrap().len(), 1);
        assert_eq!(customers[0]["PartitionKey"], "Customer");
        assert_eq!(customers[0]["RowKey"], "c1");
        assert_eq!(customers[0]["Email"], "ada@example.com");
    }

    #[tokio::test]
    async fn test_send_rejects_bad_field_type() {
        let app = app(memory_state().await);
        let body = json!({"FullName": "Bob", "DateOfBirth": "yesterday"});
        let response = send(&app, json_request("POST", "/api/customer/send", body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_tolerates_ingested_rows() {
        let app = app(memory_state().await);
        let doc = json!({"RowKey": "c2", "FullName": "Grace", "DateOfBirth": "not a date"});
        send(&app, json_request("POST", "/api/StoreCustomer", doc)).await;

        let response = send(&app, empty_request("GET", "/api/customers")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let customers = body_json(response).await;
        assert_eq!(customers[0]["FullName"], "Grace");
    }
}
