use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::info;

use super::super::GatewayState;
use super::error_response;
use crate::core::protocol::TriggerResponse;
use crate::core::worker::DispatchError;

/// Fire a schedule immediately, outside its cadence.
pub async fn trigger_endpoint(
    Path(schedule): Path<String>,
    State(state): State<GatewayState>,
) -> Response {
    info!(schedule = %schedule, "manual schedule trigger");
    match state.services.scheduler.trigger(&schedule).await {
        Ok(TriggerResponse::Ack { success, message }) => Json(serde_json::json!({
            "success": success,
            "schedule": schedule,
            "message": message,
        }))
        .into_response(),
        Ok(other) => Json(serde_json::json!({
            "success": other.is_success(),
            "schedule": schedule,
        }))
        .into_response(),
        Err(DispatchError::WorkerNotFound(_)) => error_response(
            StatusCode::NOT_FOUND,
            format!("no worker registered for schedule {}", schedule),
        ),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e.to_string()),
    }
}
