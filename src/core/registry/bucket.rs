use async_trait::async_trait;
use std::sync::Arc;

use super::{RegistrationError, TriggerRegistry, WorkerMap};
use crate::core::protocol::BucketEvent;
use crate::core::worker::{Worker, WorkerSpec};

/// Bucket notification workers. Two workers on the same bucket and event
/// may not have overlapping key prefixes.
#[derive(Default)]
pub struct BucketNotificationRegistry {
    workers: WorkerMap,
}

fn prefixes_overlap(a: &str, b: &str) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

impl BucketNotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Workers interested in `event` on `key`.
    pub async fn matching(&self, bucket: &str, key: &str, event: BucketEvent) -> Vec<Arc<Worker>> {
        self.workers
            .get(bucket)
            .await
            .into_iter()
            .filter(|w| {
                matches!(
                    &w.spec,
                    WorkerSpec::BucketNotification(s) if s.event == event && key.starts_with(&s.prefix)
                )
            })
            .collect()
    }
}

#[async_trait]
impl TriggerRegistry for BucketNotificationRegistry {
    async fn add(&self, worker: Arc<Worker>) -> Result<(), RegistrationError> {
        let WorkerSpec::BucketNotification(spec) = &worker.spec else {
            return Err(RegistrationError::Invalid(
                "not a bucket notification worker".to_string(),
            ));
        };
        let bucket = spec.bucket.clone();
        let event = spec.event;
        let prefix = spec.prefix.clone();
        self.workers
            .insert_checked(&bucket, worker.clone(), |existing| {
                for other in existing {
                    if let WorkerSpec::BucketNotification(o) = &other.spec
                        && o.event == event
                        && prefixes_overlap(&o.prefix, &prefix)
                    {
                        return Err(RegistrationError::Conflict(format!(
                            "{} notifications for bucket '{}' with prefix '{}' overlap existing prefix '{}'",
                            event.as_str(),
                            bucket,
                            prefix,
                            o.prefix
                        )));
                    }
                }
                Ok(())
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
