use axum::{
    Json,
    extract::{Query, State},
};

use super::super::GatewayState;

const DEFAULT_HISTORY_LIMIT: usize = 100;

pub async fn health_endpoint(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "workers": state.services.pool.workers().await.len(),
        "connections": state.connections.count().await,
    }))
}

pub async fn workers_endpoint(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let workers = state.services.pool.workers().await;
    let schedules = state.services.scheduler.bindings().await;
    Json(serde_json::json!({
        "success": true,
        "workers": workers,
        "schedules": schedules
            .iter()
            .map(|b| serde_json::json!({ "key": b.key, "cron": b.cron, "worker_id": b.worker_id }))
            .collect::<Vec<_>>(),
    }))
}

#[derive(serde::Deserialize)]
pub struct HistoryQuery {
    limit: Option<usize>,
}

pub async fn history_endpoint(
    Query(query): Query<HistoryQuery>,
    State(state): State<GatewayState>,
) -> Json<serde_json::Value> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Json(serde_json::json!({
        "success": true,
        "history": state.services.history.recent(limit),
    }))
}
