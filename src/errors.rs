//! HTTP API error type.
//!
//! Every variant maps to a stable error code and status. The enum
//! implements [`axum::response::IntoResponse`] so handlers can simply
//! return `Err(ApiError::NotFound { .. })`. Bodies are JSON
//! `{"code", "message", "requestId"}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::entity::odata::ODataError;
use crate::orders::OrderError;
use crate::queue::QueueError;
use crate::storage::BlobError;
use crate::table::TableError;

/// Response header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// The addressed table, entity, blob or message does not exist.
    #[error("{message}")]
    NotFound { message: String },

    /// The entity or blob already exists.
    #[error("{message}")]
    Conflict { message: String },

    /// The entity changed since it was read.
    #[error("{message}")]
    PreconditionFailed { message: String },

    /// A request argument or body is invalid.
    #[error("{message}")]
    InvalidArgument { message: String },

    /// Stored data could not be decoded.
    #[error("Stored data could not be decoded: {message}")]
    CorruptData { message: String },

    /// Catch-all for unexpected internal errors.
    #[error("We encountered an internal error, please try again.")]
    InternalError(#[from] anyhow::Error),
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ApiError::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound { .. } => "NotFound",
            ApiError::Conflict { .. } => "Conflict",
            ApiError::PreconditionFailed { .. } => "PreconditionFailed",
            ApiError::InvalidArgument { .. } => "InvalidArgument",
            ApiError::CorruptData { .. } => "CorruptData",
            ApiError::InternalError(_) => "InternalError",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::PreconditionFailed { .. } => StatusCode::PRECONDITION_FAILED,
            ApiError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            ApiError::CorruptData { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TableError> for ApiError {
    fn from(err: TableError) -> Self {
        let message = err.to_string();
        match err {
            TableError::TableNotFound(_) | TableError::EntityNotFound { .. } => {
                ApiError::NotFound { message }
            }
            TableError::EntityAlreadyExists { .. } => ApiError::Conflict { message },
            TableError::PreconditionFailed { .. } => ApiError::PreconditionFailed { message },
            TableError::InvalidTableName(_) | TableError::InvalidKey(_) => {
                ApiError::InvalidArgument { message }
            }
            TableError::Wire(_) => ApiError::CorruptData { message },
            TableError::Schema(e) => ApiError::InternalError(e.into()),
            TableError::Backend(e) => ApiError::InternalError(e),
        }
    }
}

impl From<BlobError> for ApiError {
    fn from(err: BlobError) -> Self {
        let message = err.to_string();
        match err {
            BlobError::InvalidName(_) | BlobError::Full { .. } => {
                ApiError::InvalidArgument { message }
            }
            BlobError::AlreadyExists(_) => ApiError::Conflict { message },
            BlobError::Io(e) => ApiError::InternalError(e),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        let message = err.to_string();
        match err {
            QueueError::MessageNotFound(_) => ApiError::NotFound { message },
            QueueError::PopReceiptMismatch(_) => ApiError::PreconditionFailed { message },
            QueueError::InvalidBatchSize(_) => ApiError::InvalidArgument { message },
            QueueError::Backend(e) => ApiError::InternalError(e),
        }
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        let message = err.to_string();
        match err {
            OrderError::CustomerNotFound(_)
            | OrderError::ProductNotFound(_)
            | OrderError::OrderNotFound(_) => ApiError::NotFound { message },
            OrderError::Invalid(_) => ApiError::InvalidArgument { message },
            OrderError::Table(e) => e.into(),
            OrderError::Queue(e) => e.into(),
            OrderError::Encode(e) => ApiError::InternalError(e.into()),
        }
    }
}

/// Request documents that do not have the expected shape.
impl From<ODataError> for ApiError {
    fn from(err: ODataError) -> Self {
        ApiError::invalid(err.to_string())
    }
}

impl From<garde::Report> for ApiError {
    fn from(report: garde::Report) -> Self {
        ApiError::invalid(report.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = generate_request_id();
        let status = self.status_code();
        if let ApiError::InternalError(e) = &self {
            error!(request_id = %request_id, "Internal error: {e:#}");
        }

        let body = json!({
            "code": self.code(),
            "message": self.to_string(),
            "requestId": request_id,
        });

        (status, [(REQUEST_ID_HEADER, request_id)], Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_shape() {
        let id = generate_request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_table_error_mapping() {
        let err: ApiError = TableError::not_found("Product", "Product", "x").into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err: ApiError = TableError::precondition_failed("Cart", "u", "p").into();
        assert_eq!(err.status_code(), StatusCode::PRECONDITION_FAILED);
        assert_eq!(err.code(), "PreconditionFailed");

        let err: ApiError = TableError::InvalidTableName("x".into()).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_blob_and_queue_mapping() {
        let err: ApiError = BlobError::AlreadyExists("a.pdf".into()).into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        let err: ApiError = QueueError::InvalidBatchSize(0).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_into_response_json_body() {
        let response = ApiError::not_found("no such product").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "NotFound");
        assert_eq!(body["message"], "no such product");
        assert_eq!(body["requestId"], request_id.as_str());
    }
}
