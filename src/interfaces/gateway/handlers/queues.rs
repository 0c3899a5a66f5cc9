use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::super::GatewayState;
use super::error_response;
use crate::core::queue::QueueError;

fn queue_error(e: QueueError) -> Response {
    let status = match e {
        QueueError::InvalidDepth(_) | QueueError::InvalidName(_) => StatusCode::BAD_REQUEST,
        QueueError::LeaseNotFound(_) => StatusCode::NOT_FOUND,
        QueueError::LeaseExpired { .. } => StatusCode::GONE,
    };
    error_response(status, e.to_string())
}

#[derive(serde::Deserialize)]
pub struct SendRequest {
    items: Vec<serde_json::Value>,
}

pub async fn send_endpoint(
    Path(queue): Path<String>,
    State(state): State<GatewayState>,
    Json(request): Json<SendRequest>,
) -> Response {
    match state.services.queues.send(&queue, request.items).await {
        Ok(ids) => Json(serde_json::json!({ "success": true, "ids": ids })).into_response(),
        Err(e) => queue_error(e),
    }
}

fn default_depth() -> usize {
    1
}

#[derive(serde::Deserialize)]
pub struct ReceiveRequest {
    #[serde(default = "default_depth")]
    depth: usize,
}

pub async fn receive_endpoint(
    Path(queue): Path<String>,
    State(state): State<GatewayState>,
    Json(request): Json<ReceiveRequest>,
) -> Response {
    match state.services.queues.receive(&queue, request.depth).await {
        Ok(items) => Json(serde_json::json!({ "success": true, "items": items })).into_response(),
        Err(e) => queue_error(e),
    }
}

#[derive(serde::Deserialize)]
pub struct CompleteRequest {
    lease_id: String,
}

pub async fn complete_endpoint(
    Path(queue): Path<String>,
    State(state): State<GatewayState>,
    Json(request): Json<CompleteRequest>,
) -> Response {
    match state
        .services
        .queues
        .complete(&queue, &request.lease_id)
        .await
    {
        Ok(()) => Json(serde_json::json!({ "success": true })).into_response(),
        Err(e) => queue_error(e),
    }
}

pub async fn stats_endpoint(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let queues = state.services.queues.stats().await;
    Json(serde_json::json!({ "success": true, "queues": queues }))
}
