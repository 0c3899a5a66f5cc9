//! Per-trigger-kind registries of live workers.
//!
//! Each registry owns its own lock so registrations of unrelated trigger
//! kinds never contend. Conflicting registrations are rejected and the
//! worker that registered first stays in place.

pub mod api;
pub mod bucket;
pub mod http_proxy;
pub mod schedule;
pub mod topic;
pub mod websocket;

pub use api::ApiRegistry;
pub use bucket::BucketNotificationRegistry;
pub use http_proxy::HttpProxyRegistry;
pub use schedule::ScheduleRegistry;
pub use topic::TopicRegistry;
pub use websocket::WebsocketRegistry;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::protocol::StatusCode;
use crate::core::worker::{Worker, WorkerId};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Invalid(String),
    #[error("scheduler rejected registration: {0}")]
    Scheduler(String),
}

impl RegistrationError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistrationError::Conflict(_) => StatusCode::AlreadyExists,
            RegistrationError::Invalid(_) => StatusCode::InvalidArgument,
            RegistrationError::Scheduler(_) => StatusCode::InvalidArgument,
        }
    }
}

#[async_trait]
pub trait TriggerRegistry: Send + Sync {
    /// Insert the worker, or reject it when it conflicts with a live one.
    async fn add(&self, worker: Arc<Worker>) -> Result<(), RegistrationError>;

    /// Remove the worker. Returns false if it was not registered.
    async fn remove(&self, worker: &Worker) -> bool;

    /// Snapshot of every live worker in this registry.
    async fn workers(&self) -> Vec<Arc<Worker>>;
}

/// Key → workers map shared by all registries.
#[derive(Default)]
pub(crate) struct WorkerMap {
    inner: RwLock<HashMap<String, Vec<Arc<Worker>>>>,
}

impl WorkerMap {
    /// Runs `check` against the current workers under `key` while holding the
    /// write lock, inserting only when it passes.
    pub(crate) async fn insert_checked<F>(
        &self,
        key: &str,
        worker: Arc<Worker>,
        check: F,
    ) -> Result<(), RegistrationError>
    where
        F: FnOnce(&[Arc<Worker>]) -> Result<(), RegistrationError>,
    {
        let mut map = self.inner.write().await;
        let existing = map.get(key).map(Vec::as_slice).unwrap_or_default();
        check(existing)?;
        map.entry(key.to_string()).or_default().push(worker);
        Ok(())
    }

    pub(crate) async fn remove(&self, key: &str, id: &WorkerId) -> bool {
        let mut map = self.inner.write().await;
        let Some(workers) = map.get_mut(key) else {
            return false;
        };
        let before = workers.len();
        workers.retain(|w| &w.id != id);
        let removed = workers.len() != before;
        if workers.is_empty() {
            map.remove(key);
        }
        removed
    }

    pub(crate) async fn get(&self, key: &str) -> Vec<Arc<Worker>> {
        self.inner.read().await.get(key).cloned().unwrap_or_default()
    }

    pub(crate) async fn all(&self) -> Vec<Arc<Worker>> {
        self.inner.read().await.values().flatten().cloned().collect()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use crate::core::protocol::WorkerRegistration;
    use crate::core::worker::{Worker, WorkerSpec, WorkerStream};

    pub(crate) fn worker(registration: WorkerRegistration) -> Arc<Worker> {
        let spec = WorkerSpec::try_from(registration).expect("valid registration");
        let (stream, _rx) = WorkerStream::new();
        Arc::new(Worker::new(spec, stream))
    }
}
