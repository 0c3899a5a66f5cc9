use std::sync::Arc;
use tokio_cron_scheduler::JobScheduler;

use crate::core::config::MembraneConfig;
use crate::core::events::EventService;
use crate::core::history::History;
use crate::core::pool::WorkerPool;
use crate::core::queue::QueueService;
use crate::core::registry::ScheduleRegistry;
use crate::core::scheduler::Scheduler;
use crate::core::storage::{LocalStorage, StorageBackend, StorageService};

/// The worker pool and every emulated resource, wired to share registries.
#[derive(Clone)]
pub struct Services {
    pub pool: Arc<WorkerPool>,
    pub scheduler: Arc<Scheduler>,
    pub events: EventService,
    pub queues: Arc<QueueService>,
    pub storage: Arc<StorageService>,
    pub history: Arc<History>,
}

impl Services {
    pub fn new(config: &MembraneConfig, jobs: JobScheduler) -> Self {
        let backend = Arc::new(LocalStorage::new(
            config.storage_dir.clone(),
            config.gateway_url(),
        ));
        Self::with_backend(config, jobs, backend)
    }

    pub fn with_backend(
        config: &MembraneConfig,
        jobs: JobScheduler,
        backend: Arc<dyn StorageBackend>,
    ) -> Self {
        let history = Arc::new(History::new(config.history_capacity));
        let scheduler = Arc::new(Scheduler::new(
            jobs,
            Arc::new(ScheduleRegistry::new()),
            history.clone(),
        ));
        let pool = Arc::new(WorkerPool::new().with_scheduler(scheduler.clone()));
        let events = EventService::new(pool.topics.clone(), history.clone());
        let queues = Arc::new(QueueService::new(config.visibility_timeout()));
        let storage = Arc::new(StorageService::new(
            backend,
            pool.buckets.clone(),
            history.clone(),
        ));

        Self {
            pool,
            scheduler,
            events,
            queues,
            storage,
            history,
        }
    }
}
