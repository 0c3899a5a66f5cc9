use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::time::Duration;

use super::super::GatewayState;
use super::error_response;
use crate::core::storage::{PresignOperation, StorageError};

const DEFAULT_PRESIGN_EXPIRY_SECS: u64 = 600;

fn storage_error(e: StorageError) -> Response {
    let status = match e {
        StorageError::NotFound { .. } => StatusCode::NOT_FOUND,
        StorageError::InvalidKey(_) => StatusCode::BAD_REQUEST,
        StorageError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.to_string())
}

pub async fn read_endpoint(
    Path((bucket, key)): Path<(String, String)>,
    State(state): State<GatewayState>,
) -> Response {
    match state.services.storage.read(&bucket, &key).await {
        Ok(body) => body.into_response(),
        Err(e) => storage_error(e),
    }
}

pub async fn write_endpoint(
    Path((bucket, key)): Path<(String, String)>,
    State(state): State<GatewayState>,
    body: Bytes,
) -> Response {
    match state.services.storage.write(&bucket, &key, body.to_vec()).await {
        Ok(report) => Json(serde_json::json!({
            "success": true,
            "key": key,
            "notified": report.delivered,
            "failed": report.failed,
        }))
        .into_response(),
        Err(e) => storage_error(e),
    }
}

pub async fn delete_endpoint(
    Path((bucket, key)): Path<(String, String)>,
    State(state): State<GatewayState>,
) -> Response {
    match state.services.storage.delete(&bucket, &key).await {
        Ok(report) => Json(serde_json::json!({
            "success": true,
            "key": key,
            "notified": report.delivered,
            "failed": report.failed,
        }))
        .into_response(),
        Err(e) => storage_error(e),
    }
}

#[derive(serde::Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    prefix: String,
}

pub async fn list_endpoint(
    Path(bucket): Path<String>,
    Query(query): Query<ListQuery>,
    State(state): State<GatewayState>,
) -> Response {
    match state.services.storage.list_files(&bucket, &query.prefix).await {
        Ok(files) => Json(serde_json::json!({ "success": true, "files": files })).into_response(),
        Err(e) => storage_error(e),
    }
}

fn default_expiry_secs() -> u64 {
    DEFAULT_PRESIGN_EXPIRY_SECS
}

#[derive(serde::Deserialize)]
pub struct PresignRequest {
    operation: PresignOperation,
    #[serde(default = "default_expiry_secs")]
    expiry_secs: u64,
}

pub async fn presign_endpoint(
    Path((bucket, key)): Path<(String, String)>,
    State(state): State<GatewayState>,
    Json(request): Json<PresignRequest>,
) -> Response {
    match state
        .services
        .storage
        .presign_url(
            &bucket,
            &key,
            request.operation,
            Duration::from_secs(request.expiry_secs),
        )
        .await
    {
        Ok(url) => Json(serde_json::json!({
            "success": true,
            "url": url,
            "operation": request.operation.as_str(),
        }))
        .into_response(),
        Err(e) => storage_error(e),
    }
}
