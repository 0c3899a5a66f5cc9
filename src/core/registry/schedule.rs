use async_trait::async_trait;
use std::sync::Arc;

use super::{RegistrationError, TriggerRegistry, WorkerMap};
use crate::core::worker::{Worker, WorkerSpec};

#[derive(Default)]
pub struct ScheduleRegistry {
    workers: WorkerMap,
}

impl ScheduleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn find(&self, key: &str) -> Option<Arc<Worker>> {
        self.workers.get(key).await.into_iter().next()
    }
}

#[async_trait]
impl TriggerRegistry for ScheduleRegistry {
    async fn add(&self, worker: Arc<Worker>) -> Result<(), RegistrationError> {
        let WorkerSpec::Schedule(spec) = &worker.spec else {
            return Err(RegistrationError::Invalid(
                "not a schedule worker".to_string(),
            ));
        };
        let key = spec.key.clone();
        self.workers
            .insert_checked(&key, worker.clone(), |existing| {
                if existing.is_empty() {
                    Ok(())
                } else {
                    Err(RegistrationError::Conflict(format!(
                        "schedule '{}' is already registered",
                        key
                    )))
                }
            })
            .await
    }

    async fn remove(&self, worker: &Worker) -> bool {
        self.workers.remove(worker.spec.key(), &worker.id).await
    }

    async fn workers(&self) -> Vec<Arc<Worker>> {
        self.workers.all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::{Cadence, WorkerRegistration};
    use crate::core::registry::testing::worker;

    #[tokio::test]
    async fn duplicate_schedule_key_is_rejected() {
        let registry = ScheduleRegistry::new();
        let first = worker(WorkerRegistration::Schedule {
            key: "nightly".to_string(),
            cadence: Cadence::Rate("1 day".to_string()),
        });
        let second = worker(WorkerRegistration::Schedule {
            key: "nightly".to_string(),
            cadence: Cadence::Cron("0 1 * * *".to_string()),
        });
        registry.add(first.clone()).await.unwrap();
        let err = registry.add(second).await.unwrap_err();
        assert!(err.to_string().contains("nightly"));
        assert_eq!(registry.find("nightly").await.unwrap().id, first.id);
    }
}
