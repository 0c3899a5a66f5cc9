use axum::{
    Json,
    extract::{Path, State},
};
use std::time::Duration;

use super::super::GatewayState;
use crate::core::events::PublishOutcome;

#[derive(serde::Deserialize)]
pub struct PublishRequest {
    #[serde(default)]
    payload: serde_json::Value,
    delay_ms: Option<u64>,
}

pub async fn publish_endpoint(
    Path(topic): Path<String>,
    State(state): State<GatewayState>,
    Json(request): Json<PublishRequest>,
) -> Json<serde_json::Value> {
    let delay = request.delay_ms.map(Duration::from_millis);
    let outcome = state
        .services
        .events
        .publish(&topic, request.payload, delay)
        .await;

    match outcome {
        PublishOutcome::Delivered(report) => Json(serde_json::json!({
            "success": true,
            "status": "delivered",
            "message_id": report.message_id,
            "delivered": report.delivered,
            "failed": report.failed,
        })),
        PublishOutcome::Scheduled {
            message_id,
            delay_ms,
        } => Json(serde_json::json!({
            "success": true,
            "status": "scheduled",
            "message_id": message_id,
            "delay_ms": delay_ms,
        })),
    }
}
