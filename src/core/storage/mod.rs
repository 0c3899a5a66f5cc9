//! Emulated object storage.
//!
//! Persistence sits behind [`StorageBackend`]; [`StorageService`] adds the
//! bucket notification fan-out on top of whichever backend is configured.

mod local;

pub use local::LocalStorage;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::core::history::{History, HistoryEvent};
use crate::core::protocol::{BucketEvent, TriggerRequest};
use crate::core::registry::BucketNotificationRegistry;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("{bucket}/{key} not found")]
    NotFound { bucket: String, key: String },
    #[error("invalid bucket or key '{0}'")]
    InvalidKey(String),
    #[error("storage i/o error: {0}")]
    Io(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresignOperation {
    Read,
    Write,
}

impl PresignOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            PresignOperation::Read => "read",
            PresignOperation::Write => "write",
        }
    }
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;
    async fn write(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StorageError>;
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError>;
    async fn list_files(&self, bucket: &str, prefix: &str) -> Result<Vec<FileInfo>, StorageError>;
    async fn presign_url(
        &self,
        bucket: &str,
        key: &str,
        operation: PresignOperation,
        expiry: Duration,
    ) -> Result<String, StorageError>;
}

/// Counts from notifying bucket workers about one change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NotificationReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct StorageService {
    backend: Arc<dyn StorageBackend>,
    notifications: Arc<BucketNotificationRegistry>,
    history: Arc<History>,
}

impl StorageService {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        notifications: Arc<BucketNotificationRegistry>,
        history: Arc<History>,
    ) -> Self {
        Self {
            backend,
            notifications,
            history,
        }
    }

    pub async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.backend.read(bucket, key).await
    }

    pub async fn write(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> Result<NotificationReport, StorageError> {
        self.backend.write(bucket, key, body).await?;
        Ok(self.notify(bucket, key, BucketEvent::Write).await)
    }

    pub async fn delete(&self, bucket: &str, key: &str) -> Result<NotificationReport, StorageError> {
        self.backend.delete(bucket, key).await?;
        Ok(self.notify(bucket, key, BucketEvent::Delete).await)
    }

    pub async fn list_files(&self, bucket: &str, prefix: &str) -> Result<Vec<FileInfo>, StorageError> {
        self.backend.list_files(bucket, prefix).await
    }

    pub async fn presign_url(
        &self,
        bucket: &str,
        key: &str,
        operation: PresignOperation,
        expiry: Duration,
    ) -> Result<String, StorageError> {
        self.backend
            .presign_url(bucket, key, operation, expiry)
            .await
    }

    async fn notify(&self, bucket: &str, key: &str, event: BucketEvent) -> NotificationReport {
        let workers = self.notifications.matching(bucket, key, event).await;
        if workers.is_empty() {
            return NotificationReport::default();
        }

        let calls = workers.iter().map(|worker| {
            worker.stream().call(TriggerRequest::Notification {
                bucket: bucket.to_string(),
                key: key.to_string(),
                event,
            })
        });
        let mut report = NotificationReport::default();
        for (worker, result) in workers.iter().zip(join_all(calls).await) {
            match result {
                Ok(response) if response.is_success() => report.delivered += 1,
                Ok(_) => {
                    warn!(bucket, key, worker_id = %worker.id, "bucket notification refused");
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(bucket, key, worker_id = %worker.id, "bucket notification failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        info!(
            bucket,
            key,
            event = event.as_str(),
            "notified {}/{} bucket workers",
            report.delivered,
            workers.len()
        );
        self.history.record(HistoryEvent::BucketNotification {
            bucket: bucket.to_string(),
            key: key.to_string(),
            event,
            delivered: report.delivered,
            failed: report.failed,
        });
        report
    }
}
