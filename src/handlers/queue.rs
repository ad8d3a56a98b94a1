//! Queue inspection.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::ApiError;
use crate::queue::ORDER_QUEUE;
use crate::AppState;

const DEFAULT_PEEK: usize = 10;

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PeekQuery {
    /// Queue to inspect; defaults to the order queue.
    pub queue: Option<String>,
    /// How many messages to peek, at most 32.
    pub max: Option<usize>,
}

/// `GET /api/ReceiveQueueMessages` -- peek without dequeuing.
#[utoipa::path(
    get,
    path = "/api/ReceiveQueueMessages",
    tag = "Queues",
    params(PeekQuery),
    responses(
        (status = 200, description = "Visible messages, oldest first"),
        (status = 400, description = "Batch size out of range"),
        (status = 404, description = "No such queue")
    )
)]
pub async fn receive_queue_messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PeekQuery>,
) -> Result<Json<Value>, ApiError> {
    let name = query.queue.as_deref().unwrap_or(ORDER_QUEUE);
    let queue = state
        .queue(name)
        .ok_or_else(|| ApiError::not_found(format!("Queue {} not found", name)))?;

    let messages = queue.peek(query.max.unwrap_or(DEFAULT_PEEK)).await?;
    if messages.is_empty() {
        return Ok(Json(json!({ "Status": "No messages in queue." })));
    }
    let listed: Vec<Value> = messages
        .into_iter()
        .map(|m| json!({ "MessageId": m.id, "MessageText": m.text }))
        .collect();
    Ok(Json(Value::Array(listed)))
}

#[cfg(test)]
mod tests {
    use crate::handlers::test_support::*;
    use crate::queue::PRODUCT_QUEUE;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_empty_queue_status() {
        let app = crate::server::app(memory_state().await);
        let response = send(&app, empty_request("GET", "/api/ReceiveQueueMessages")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["Status"], "No messages in queue.");
    }

    #[tokio::test]
    async fn test_peek_leaves_messages_visible() {
        let state = memory_state().await;
        let queue = state.queue(PRODUCT_QUEUE).unwrap().clone();
        for i in 0..12 {
            queue.send(&format!("notice {}", i)).await.unwrap();
        }
        let app = crate::server::app(state);

        let uri = "/api/ReceiveQueueMessages?queue=product-queue";
        let first = body_json(send(&app, empty_request("GET", uri)).await).await;
        assert_eq!(first.as_array().unwrap().len(), 10);
        assert_eq!(first[0]["MessageText"], "notice 0");

        let again = body_json(send(&app, empty_request("GET", uri)).await).await;
        assert_eq!(again[0]["MessageId"], first[0]["MessageId"]);
    }

    #[tokio::test]
    async fn test_unknown_queue_and_bad_batch() {
        let app = crate::server::app(memory_state().await);
        let response = send(&app, empty_request("GET", "/api/ReceiveQueueMessages?queue=nope")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = send(&app, empty_request("GET", "/api/ReceiveQueueMessages?max=0")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
