//! Product image upload and download.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use metrics::counter;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::errors::ApiError;
use crate::metrics::BLOB_BYTES_WRITTEN_TOTAL;
use crate::storage::backend::public_url;
use crate::storage::{BlobInfo, BlobStore, StoredBlob};
use crate::AppState;

const DEFAULT_EXTENSION: &str = ".jpg";

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UploadQuery {
    /// Original file name; only its extension is kept.
    pub filename: Option<String>,
}

/// `.ext` of `filename`, lowercased, or `.jpg`.
fn extension_of(filename: Option<&str>) -> String {
    filename
        .and_then(|name| std::path::Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// Write `data` and count the bytes.
pub(crate) async fn store_blob(
    store: &dyn BlobStore,
    name: &str,
    data: Bytes,
) -> Result<BlobInfo, ApiError> {
    let len = data.len() as u64;
    let info = store.put(name, data, true).await?;
    counter!(BLOB_BYTES_WRITTEN_TOTAL, "container" => store.container().to_string()).increment(len);
    Ok(info)
}

/// Response carrying a blob's bytes, its type and ETag.
pub(crate) fn blob_response(blob: StoredBlob, attachment: Option<&str>) -> Response {
    let mut response = (StatusCode::OK, blob.data).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(blob.content_type));
    if let Ok(etag) = HeaderValue::from_str(&blob.etag) {
        headers.insert(header::ETAG, etag);
    }
    if let Some(name) = attachment {
        let disposition = format!(
            "attachment; filename=\"{}\"",
            name.replace(['"', '\\'], "_")
        );
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }
    response
}

/// `POST /api/WriteToBlob` -- store the raw body as a new product image.
#[utoipa::path(
    post,
    path = "/api/WriteToBlob",
    tag = "Blobs",
    params(UploadQuery),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Image stored; body carries its public URL"),
        (status = 400, description = "Empty body or container full")
    )
)]
pub async fn write_to_blob(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::invalid("No file uploaded."));
    }
    let name = format!(
        "{}{}",
        uuid::Uuid::new_v4(),
        extension_of(query.filename.as_deref())
    );
    let info = store_blob(state.images.as_ref(), &name, body).await?;
    let url = public_url(
        &state.config.blobs.public_base_url,
        state.images.container(),
        &info.name,
    );
    info!(blob = %info.name, size = info.size, "Product image uploaded");

    Ok(Json(json!({
        "message": "File uploaded successfully",
        "url": url,
    })))
}

fn check_container(state: &AppState, container: &str) -> Result<(), ApiError> {
    if container == state.images.container() {
        Ok(())
    } else {
        Err(ApiError::not_found(format!("Container {} not found", container)))
    }
}

/// `GET /api/blobs/:container/:name`
#[utoipa::path(
    get,
    path = "/api/blobs/{container}/{name}",
    tag = "Blobs",
    params(
        ("container" = String, Path, description = "Image container"),
        ("name" = String, Path, description = "Blob name")
    ),
    responses(
        (status = 200, description = "Blob bytes"),
        (status = 404, description = "No such blob")
    )
)]
pub async fn get_blob(
    State(state): State<Arc<AppState>>,
    Path((container, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    check_container(&state, &container)?;
    let blob = state
        .images
        .get(&name)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Blob {} not found", name)))?;
    Ok(blob_response(blob, None))
}

/// `DELETE /api/blobs/:container/:name`
#[utoipa::path(
    delete,
    path = "/api/blobs/{container}/{name}",
    tag = "Blobs",
    params(
        ("container" = String, Path, description = "Image container"),
        ("name" = String, Path, description = "Blob name")
    ),
    responses(
        (status = 204, description = "Blob deleted"),
        (status = 404, description = "No such blob")
    )
)]
pub async fn delete_blob(
    State(state): State<Arc<AppState>>,
    Path((container, name)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    check_container(&state, &container)?;
    if state.images.delete(&name).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("Blob {} not found", name)))
    }
}
