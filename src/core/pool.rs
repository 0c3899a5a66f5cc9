use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::core::protocol::WorkerRegistration;
use crate::core::registry::{
    ApiRegistry, BucketNotificationRegistry, HttpProxyRegistry, RegistrationError,
    ScheduleRegistry, TopicRegistry, TriggerRegistry, WebsocketRegistry,
};
use crate::core::scheduler::Scheduler;
use crate::core::worker::{Worker, WorkerKind, WorkerSpec, WorkerStream, WorkerSummary};

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Added(Arc<Worker>),
    Removed(Arc<Worker>),
}

/// Observer of pool membership. Called after the registry change commits.
pub trait WorkerListener: Send + Sync {
    fn on_event(&self, event: &WorkerEvent);
}

/// Every live worker, filed in the registry for its trigger kind.
pub struct WorkerPool {
    pub apis: Arc<ApiRegistry>,
    pub http_proxies: Arc<HttpProxyRegistry>,
    pub topics: Arc<TopicRegistry>,
    pub schedules: Arc<ScheduleRegistry>,
    pub websockets: Arc<WebsocketRegistry>,
    pub buckets: Arc<BucketNotificationRegistry>,
    scheduler: Option<Arc<Scheduler>>,
    listeners: RwLock<Vec<Arc<dyn WorkerListener>>>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            apis: Arc::new(ApiRegistry::new()),
            http_proxies: Arc::new(HttpProxyRegistry::new()),
            topics: Arc::new(TopicRegistry::new()),
            schedules: Arc::new(ScheduleRegistry::new()),
            websockets: Arc::new(WebsocketRegistry::new()),
            buckets: Arc::new(BucketNotificationRegistry::new()),
            scheduler: None,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Attach the scheduler that owns cron jobs for schedule workers. It must
    /// share this pool's schedule registry.
    pub fn with_scheduler(mut self, scheduler: Arc<Scheduler>) -> Self {
        self.schedules = scheduler.schedules().clone();
        self.scheduler = Some(scheduler);
        self
    }

    pub fn scheduler(&self) -> Option<&Arc<Scheduler>> {
        self.scheduler.as_ref()
    }

    pub fn subscribe(&self, listener: Arc<dyn WorkerListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(listener);
    }

    fn registry_for(&self, kind: WorkerKind) -> &dyn TriggerRegistry {
        match kind {
            WorkerKind::Api => self.apis.as_ref(),
            WorkerKind::HttpProxy => self.http_proxies.as_ref(),
            WorkerKind::Subscriber => self.topics.as_ref(),
            WorkerKind::Schedule => self.schedules.as_ref(),
            WorkerKind::Websocket => self.websockets.as_ref(),
            WorkerKind::BucketNotification => self.buckets.as_ref(),
        }
    }

    /// Validate a registration and file the resulting worker.
    pub async fn register(
        &self,
        registration: WorkerRegistration,
        stream: Arc<WorkerStream>,
    ) -> Result<Arc<Worker>, RegistrationError> {
        let spec = WorkerSpec::try_from(registration)?;
        let worker = Arc::new(Worker::new(spec, stream));
        let registry = self.registry_for(worker.kind());
        registry.add(worker.clone()).await?;

        if let Some(scheduler) = &self.scheduler
            && let Err(e) = scheduler.bind(&worker).await
        {
            registry.remove(&worker).await;
            return Err(e);
        }

        info!(worker_id = %worker.id, "registered {}", worker.spec);
        self.notify(&WorkerEvent::Added(worker.clone()));
        Ok(worker)
    }

    /// Remove a worker. Safe to call more than once; only the first call
    /// returns true and notifies listeners.
    pub async fn unregister(&self, worker: &Arc<Worker>) -> bool {
        if let Some(scheduler) = &self.scheduler {
            scheduler.unbind(worker).await;
        }
        let removed = self.registry_for(worker.kind()).remove(worker).await;
        if removed {
            info!(worker_id = %worker.id, "unregistered {}", worker.spec);
            self.notify(&WorkerEvent::Removed(worker.clone()));
        } else {
            debug!(worker_id = %worker.id, "worker already unregistered");
        }
        removed
    }

    pub async fn workers(&self) -> Vec<WorkerSummary> {
        let mut all = Vec::new();
        for kind in [
            WorkerKind::Api,
            WorkerKind::HttpProxy,
            WorkerKind::Subscriber,
            WorkerKind::Schedule,
            WorkerKind::Websocket,
            WorkerKind::BucketNotification,
        ] {
            all.extend(
                self.registry_for(kind)
                    .workers()
                    .await
                    .iter()
                    .map(|w| w.summary()),
            );
        }
        all.sort_by_key(|s| s.registered_at);
        all
    }

    fn notify(&self, event: &WorkerEvent) {
        let listeners = self.listeners.read().unwrap_or_else(|p| p.into_inner()).clone();
        for listener in listeners {
            listener.on_event(event);
        }
    }
}
