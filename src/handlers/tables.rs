//! Document ingestion and raw row access.
//!
//! Ingested documents keep whatever properties the caller sends; the typed
//! readers tolerate the mismatches through the mapper's fallback.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::entity::odata::{document_to_bag, to_odata};
use crate::entity::ETag;
use crate::errors::ApiError;
use crate::handlers::json_body;
use crate::models::{CUSTOMER_PARTITION, CUSTOMER_TABLE, PRODUCT_PARTITION, PRODUCT_TABLE};
use crate::table::store::validate_table_name;
use crate::AppState;

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PartitionQuery {
    /// Restrict the listing to one partition.
    pub partition: Option<String>,
}

/// Store `document` in `table`, creating the table when needed.
async fn ingest(
    state: &AppState,
    table: &str,
    default_partition: &str,
    document: Value,
) -> Result<Response, ApiError> {
    validate_table_name(table)?;
    let bag = document_to_bag(&document, default_partition)?;
    let partition_key = bag.partition_key().to_string();
    let row_key = bag.row_key().to_string();

    state.tables.create_table(table).await?;
    let etag = state.tables.add_entity(table, bag).await?;
    info!(table, partition_key = %partition_key, row_key = %row_key, "Document stored");

    Ok((
        StatusCode::OK,
        Json(json!({
            "message": format!("{} entity stored successfully.", table),
            "PartitionKey": partition_key,
            "RowKey": row_key,
            "ETag": etag.as_str(),
        })),
    )
        .into_response())
}

/// `POST /api/StoreProduct`
#[utoipa::path(
    post,
    path = "/api/StoreProduct",
    tag = "Ingestion",
    responses(
        (status = 200, description = "Document stored in the Product table"),
        (status = 400, description = "Body is not a JSON object"),
        (status = 409, description = "Key already taken")
    )
)]
pub async fn store_product(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    ingest(&state, PRODUCT_TABLE, PRODUCT_PARTITION, json_body(payload)?).await
}

/// `POST /api/StoreCustomer`
#[utoipa::path(
    post,
    path = "/api/StoreCustomer",
    tag = "Ingestion",
    responses(
        (status = 200, description = "Document stored in the Customer table"),
        (status = 400, description = "Body is not a JSON object"),
        (status = 409, description = "Key already taken")
    )
)]
pub async fn store_customer(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    ingest(&state, CUSTOMER_TABLE, CUSTOMER_PARTITION, json_body(payload)?).await
}

/// `POST /api/tables/:table` -- the partition defaults to the table name.
#[utoipa::path(
    post,
    path = "/api/tables/{table}",
    tag = "Tables",
    params(("table" = String, Path, description = "Table name")),
    responses(
        (status = 200, description = "Document stored"),
        (status = 400, description = "Invalid table name or body"),
        (status = 409, description = "Key already taken")
    )
)]
pub async fn ingest_document(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let document = json_body(payload)?;
    ingest(&state, &table, &table, document).await
}

/// `GET /api/tables/:table`
#[utoipa::path(
    get,
    path = "/api/tables/{table}",
    tag = "Tables",
    params(("table" = String, Path, description = "Table name"), PartitionQuery),
    responses(
        (status = 200, description = "OData rows ordered by key"),
        (status = 404, description = "No such table")
    )
)]
pub async fn list_rows(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    Query(query): Query<PartitionQuery>,
) -> Result<Json<Vec<Value>>, ApiError> {
    validate_table_name(&table)?;
    let bags = state.tables.query(&table, query.partition.as_deref()).await?;
    Ok(Json(bags.iter().map(to_odata).collect()))
}

/// `GET /api/tables/:table/:pk/:rk`
#[utoipa::path(
    get,
    path = "/api/tables/{table}/{pk}/{rk}",
    tag = "Tables",
    params(
        ("table" = String, Path, description = "Table name"),
        ("pk" = String, Path, description = "Partition key"),
        ("rk" = String, Path, description = "Row key")
    ),
    responses(
        (status = 200, description = "The OData row"),
        (status = 404, description = "No such table or entity")
    )
)]
pub async fn get_row(
    State(state): State<Arc<AppState>>,
    Path((table, partition_key, row_key)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    validate_table_name(&table)?;
    let bag = state
        .tables
        .get_entity(&table, &partition_key, &row_key)
        .await?
        .ok_or_else(|| {
            ApiError::not_found(format!(
                "Entity ({}, {}) not found in table {}",
                partition_key, row_key, table
            ))
        })?;
    Ok(Json(to_odata(&bag)))
}

/// `DELETE /api/tables/:table/:pk/:rk`
#[utoipa::path(
    delete,
    path = "/api/tables/{table}/{pk}/{rk}",
    tag = "Tables",
    params(
        ("table" = String, Path, description = "Table name"),
        ("pk" = String, Path, description = "Partition key"),
        ("rk" = String, Path, description = "Row key")
    ),
    responses(
        (status = 204, description = "Deleted, or was already absent"),
        (status = 404, description = "No such table")
    )
)]
pub async fn delete_row(
    State(state): State<Arc<AppState>>,
    Path((table, partition_key, row_key)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    validate_table_name(&table)?;
    state
        .tables
        .delete_entity(&table, &partition_key, &row_key, &ETag::any())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
