//! Cron bindings for schedule workers.
//!
//! Each accepted schedule worker gets one job in the shared
//! [`JobScheduler`]. Firing looks the worker up again by schedule key, so a
//! job that races with unregistration finds nothing and does nothing.

mod rate;

pub use rate::{RateError, normalize_cron, rate_to_cron, to_engine_expression};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};

use crate::core::history::{History, HistoryEvent};
use crate::core::protocol::{TriggerRequest, TriggerResponse};
use crate::core::registry::{RegistrationError, ScheduleRegistry};
use crate::core::worker::{DispatchError, Worker, WorkerId, WorkerSpec};

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleBinding {
    pub key: String,
    pub cron: String,
    pub worker_id: WorkerId,
    pub job_id: uuid::Uuid,
}

pub struct Scheduler {
    jobs: JobScheduler,
    schedules: Arc<ScheduleRegistry>,
    history: Arc<History>,
    bindings: Mutex<HashMap<WorkerId, ScheduleBinding>>,
}

impl Scheduler {
    pub fn new(jobs: JobScheduler, schedules: Arc<ScheduleRegistry>, history: Arc<History>) -> Self {
        Self {
            jobs,
            schedules,
            history,
            bindings: Mutex::new(HashMap::new()),
        }
    }

    pub fn schedules(&self) -> &Arc<ScheduleRegistry> {
        &self.schedules
    }

    /// Add a cron job for a schedule worker. Non-schedule workers are ignored.
    pub async fn bind(&self, worker: &Worker) -> Result<(), RegistrationError> {
        let WorkerSpec::Schedule(spec) = &worker.spec else {
            return Ok(());
        };

        let expression = to_engine_expression(&spec.cron);
        let schedules = self.schedules.clone();
        let history = self.history.clone();
        let key = spec.key.clone();

        let job = Job::new_async(expression.as_str(), move |_uuid, mut _l| {
            let schedules = schedules.clone();
            let history = history.clone();
            let key = key.clone();
            Box::pin(async move {
                match fire(&schedules, &history, &key).await {
                    Ok(_) => {}
                    Err(DispatchError::WorkerNotFound(_)) => {
                        debug!(schedule = %key, "schedule fired with no worker");
                    }
                    Err(e) => warn!(schedule = %key, "schedule delivery failed: {}", e),
                }
            })
        })
        .map_err(|e| {
            RegistrationError::Scheduler(format!("invalid cron expression '{}': {}", spec.cron, e))
        })?;

        let job_id = self
            .jobs
            .add(job)
            .await
            .map_err(|e| RegistrationError::Scheduler(e.to_string()))?;

        info!(schedule = %spec.key, cron = %spec.cron, "schedule bound");
        self.bindings.lock().await.insert(
            worker.id,
            ScheduleBinding {
                key: spec.key.clone(),
                cron: spec.cron.clone(),
                worker_id: worker.id,
                job_id,
            },
        );
        Ok(())
    }

    /// Remove the worker's cron job. Returns false when it had none.
    pub async fn unbind(&self, worker: &Worker) -> bool {
        let Some(binding) = self.bindings.lock().await.remove(&worker.id) else {
            return false;
        };
        if let Err(e) = self.jobs.remove(&binding.job_id).await {
            warn!(schedule = %binding.key, "failed to remove cron job: {}", e);
        }
        debug!(schedule = %binding.key, "schedule unbound");
        true
    }

    /// Fire a schedule now, outside its cadence.
    pub async fn trigger(&self, key: &str) -> Result<TriggerResponse, DispatchError> {
        fire(&self.schedules, &self.history, key).await
    }

    pub async fn bindings(&self) -> Vec<ScheduleBinding> {
        self.bindings.lock().await.values().cloned().collect()
    }
}

async fn fire(
    schedules: &ScheduleRegistry,
    history: &History,
    key: &str,
) -> Result<TriggerResponse, DispatchError> {
    let Some(worker) = schedules.find(key).await else {
        return Err(DispatchError::WorkerNotFound(key.to_string()));
    };

    let result = worker
        .stream()
        .call(TriggerRequest::Interval {
            schedule: key.to_string(),
        })
        .await;

    history.record(HistoryEvent::ScheduleFire {
        schedule: key.to_string(),
        success: matches!(&result, Ok(response) if response.is_success()),
    });
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::{Cadence, ServerMessage, WorkerRegistration};
    use crate::core::registry::TriggerRegistry;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn schedule_worker(key: &str, cadence: Cadence) -> (Arc<Worker>, mpsc::Receiver<ServerMessage>) {
        let spec = WorkerSpec::try_from(WorkerRegistration::Schedule {
            key: key.to_string(),
            cadence,
        })
        .unwrap();
        let (stream, rx) = crate::core::worker::WorkerStream::new();
        (Arc::new(Worker::new(spec, stream)), rx)
    }

    async fn scheduler() -> Scheduler {
        Scheduler::new(
            JobScheduler::new().await.unwrap(),
            Arc::new(ScheduleRegistry::new()),
            Arc::new(History::default()),
        )
    }

    fn ack_all(worker: Arc<Worker>, mut rx: mpsc::Receiver<ServerMessage>) -> tokio::task::JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let mut fired = Vec::new();
            while let Some(ServerMessage::Trigger { id, request }) = rx.recv().await {
                if let TriggerRequest::Interval { schedule } = request {
                    fired.push(schedule);
                }
                worker
                    .stream()
                    .resolve(
                        &id,
                        TriggerResponse::Ack {
                            success: true,
                            message: None,
                        },
                    );
                if !fired.is_empty() {
                    break;
                }
            }
            fired
        })
    }

    #[tokio::test]
    async fn bind_and_unbind_track_jobs() {
        let scheduler = scheduler().await;
        let (worker, _rx) = schedule_worker("nightly", Cadence::Rate("1 day".to_string()));

        scheduler.bind(&worker).await.unwrap();
        let bindings = scheduler.bindings().await;
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].cron, "0 0 */1 * *");

        assert!(scheduler.unbind(&worker).await);
        assert!(!scheduler.unbind(&worker).await);
        assert!(scheduler.bindings().await.is_empty());
    }

    #[tokio::test]
    async fn unparseable_cron_fails_binding() {
        let scheduler = scheduler().await;
        let (worker, _rx) = schedule_worker("broken", Cadence::Cron("a b c d e".to_string()));
        let err = scheduler.bind(&worker).await.unwrap_err();
        assert!(matches!(err, RegistrationError::Scheduler(_)));
    }

    #[tokio::test]
    async fn manual_trigger_reaches_worker() {
        let scheduler = scheduler().await;
        let (worker, rx) = schedule_worker("report", Cadence::Rate("1 day".to_string()));
        scheduler.schedules().add(worker.clone()).await.unwrap();
        let fired = ack_all(worker, rx);

        let response = scheduler.trigger("report").await.unwrap();
        assert!(response.is_success());
        assert_eq!(fired.await.unwrap(), vec!["report".to_string()]);
    }

    #[tokio::test]
    async fn trigger_without_worker_is_not_found() {
        let scheduler = scheduler().await;
        assert_eq!(
            scheduler.trigger("ghost").await.unwrap_err(),
            DispatchError::WorkerNotFound("ghost".to_string())
        );
    }

    #[tokio::test]
    async fn cron_job_fires_into_worker() {
        let jobs = JobScheduler::new().await.unwrap();
        let scheduler = Scheduler::new(
            jobs.clone(),
            Arc::new(ScheduleRegistry::new()),
            Arc::new(History::default()),
        );
        let (worker, rx) = schedule_worker("tick", Cadence::Cron("* * * * * *".to_string()));
        scheduler.schedules().add(worker.clone()).await.unwrap();
        scheduler.bind(&worker).await.unwrap();
        let fired = ack_all(worker, rx);
        jobs.start().await.unwrap();

        let fired = tokio::time::timeout(Duration::from_secs(5), fired)
            .await
            .expect("schedule fired")
            .unwrap();
        assert_eq!(fired, vec!["tick".to_string()]);
    }
}
