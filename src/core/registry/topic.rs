use async_trait::async_trait;
use std::sync::Arc;

use super::{RegistrationError, TriggerRegistry, WorkerMap};
use crate::core::worker::{Worker, WorkerSpec};

/// Topic subscribers. Any number of workers may subscribe to one topic.
#[derive(Default)]
pub struct TopicRegistry {
    workers: WorkerMap,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current subscribers; later (un)registrations do not
    /// affect a delivery that is already iterating it.
    pub async fn subscribers(&self, topic: &str) -> Vec<Arc<Worker>> {
        self.workers.get(topic).await
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.workers.get(topic).await.len()
    }
}

#[async_trait]
impl TriggerRegistry for TopicRegistry {
    async fn add(&self, worker: Arc<Worker>) -> Result<(), RegistrationError> {
        let WorkerSpec::Subscriber(spec) = &worker.spec else {
            return Err(RegistrationError::Invalid(
                "not a subscriber worker".to_string(),
            ));
        };
        let topic = spec.topic.clone();
        self.workers
            .insert_checked(&topic, worker.clone(), |_| Ok(()))
            .await
    }

    async fn remove(&self, worker: &Worker) -> bool {
        self.workers.remove(worker.spec.key(), &worker.id).await
    }

    async fn workers(&self) -> Vec<Arc<Worker>> {
        self.workers.all().await
    }
}
