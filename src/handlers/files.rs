//! Contract file share handlers.

use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::errors::ApiError;
use crate::handlers::blobs::{blob_response, store_blob};
use crate::AppState;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub etag: String,
}

/// Final path component of an uploaded file name.
fn base_name(file_name: &str) -> Option<String> {
    file_name
        .rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// `POST /api/WriteToFile` -- store every file part of a multipart form.
///
/// Parts without a file name or without content are ignored. Existing files
/// are overwritten.
#[utoipa::path(
    post,
    path = "/api/WriteToFile",
    tag = "Files",
    responses(
        (status = 200, description = "Files stored"),
        (status = 400, description = "Not a multipart form, or no files in it")
    )
)]
pub async fn write_to_file(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ApiError> {
    let mut multipart = multipart.map_err(|rejection| ApiError::invalid(rejection.body_text()))?;

    let mut stored = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::invalid(e.body_text()))?
    {
        let Some(name) = field.file_name().and_then(base_name) else {
            debug!(field = ?field.name(), "Skipping form field without a file name");
            continue;
        };
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::invalid(e.body_text()))?;
        if data.is_empty() {
            continue;
        }
        let info = store_blob(state.contracts.as_ref(), &name, data).await?;
        info!(file = %info.name, size = info.size, "Contract file uploaded");
        stored.push(info.name);
    }

    if stored.is_empty() {
        return Err(ApiError::invalid("No files uploaded."));
    }
    Ok(Json(json!({
        "message": format!("Uploaded {} file(s).", stored.len()),
        "files": stored,
    })))
}

/// `GET /api/files`
#[utoipa::path(
    get,
    path = "/api/files",
    tag = "Files",
    responses((status = 200, description = "Files in the share", body = [FileEntry]))
)]
pub async fn list_files(State(state): State<Arc<AppState>>) -> Result<Json<Vec<FileEntry>>, ApiError> {
    let files = state
        .contracts
        .list()
        .await?
        .into_iter()
        .map(|info| FileEntry {
            name: info.name,
            size: info.size,
            etag: info.etag,
        })
        .collect();
    Ok(Json(files))
}

/// `GET /api/files/:name` -- download as an attachment.
#[utoipa::path(
    get,
    path = "/api/files/{name}",
    tag = "Files",
    params(("name" = String, Path, description = "File name")),
    responses(
        (status = 200, description = "File bytes"),
        (status = 404, description = "No such file")
    )
)]
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let blob = state
        .contracts
        .get(&name)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("File {} not found", name)))?;
    Ok(blob_response(blob, Some(&name)))
}

/// `DELETE /api/files/:name`
#[utoipa::path(
    delete,
    path = "/api/files/{name}",
    tag = "Files",
    params(("name" = String, Path, description = "File name")),
    responses(
        (status = 204, description = "File deleted"),
        (status = 404, description = "No such file")
    )
)]
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.contracts.delete(&name).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("File {} not found", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::*;
    use axum::body::Body;
    use axum::http::{header, Request};

    const BOUNDARY: &str = "XBOUNDARYX";

    fn multipart_request(parts: &[(&str, Option<&str>, &str)]) -> Request<Body> {
        let mut body = String::new();
        for (field, file_name, content) in parts {
            body.push_str(&format!("--{}\r\n", BOUNDARY));
            match file_name {
                Some(file_name) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n",
                    field, file_name
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                    field
                )),
            }
            body.push_str(content);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{}--\r\n", BOUNDARY));

        Request::builder()
            .method("POST")
            .uri("/api/WriteToFile")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("C:\\docs\\lease.pdf").as_deref(), Some("lease.pdf"));
        assert_eq!(base_name("a/b/c.txt").as_deref(), Some("c.txt"));
        assert_eq!(base_name("dir/"), None);
    }

    #[tokio::test]
    async fn test_upload_list_download_delete() {
        let app = crate::server::app(memory_state().await);
        let request = multipart_request(&[
            ("note", None, "ignored"),
            ("file", Some("lease.pdf"), "PDF-1"),
            ("file", Some("terms.txt"), "be nice"),
            ("file", Some("empty.txt"), ""),
        ]);
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Uploaded 2 file(s).");

        let files = body_json(send(&app, empty_request("GET", "/api/files")).await).await;
        let names: Vec<&str> = files
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["lease.pdf", "terms.txt"]);

        let response = send(&app, empty_request("GET", "/api/files/terms.txt")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"terms.txt\""
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"be nice");

        let response = send(&app, empty_request("DELETE", "/api/files/terms.txt")).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = send(&app, empty_request("DELETE", "/api/files/terms.txt")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_form_without_files_rejected() {
        let app = crate::server::app(memory_state().await);
        let response = send(&app, multipart_request(&[("note", None, "hi")])).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&app, json_request("POST", "/api/WriteToFile", json!({}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
