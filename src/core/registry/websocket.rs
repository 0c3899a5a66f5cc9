use async_trait::async_trait;
use std::sync::Arc;

use super::{RegistrationError, TriggerRegistry, WorkerMap};
use crate::core::protocol::WebsocketEvent;
use crate::core::worker::{Worker, WorkerSpec};

/// One handler per (socket, event).
#[derive(Default)]
pub struct WebsocketRegistry {
    workers: WorkerMap,
}

impl WebsocketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn find(&self, socket: &str, event: WebsocketEvent) -> Option<Arc<Worker>> {
        self.workers
            .get(socket)
            .await
            .into_iter()
            .find(|w| matches!(&w.spec, WorkerSpec::Websocket(s) if s.event == event))
    }
}

#[async_trait]
impl TriggerRegistry for WebsocketRegistry {
    async fn add(&self, worker: Arc<Worker>) -> Result<(), RegistrationError> {
        let WorkerSpec::Websocket(spec) = &worker.spec else {
            return Err(RegistrationError::Invalid(
                "not a websocket worker".to_string(),
            ));
        };
        let socket = spec.socket.clone();
        let event = spec.event;
        self.workers
            .insert_checked(&socket, worker.clone(), |existing| {
                let taken = existing
                    .iter()
                    .any(|w| matches!(&w.spec, WorkerSpec::Websocket(s) if s.event == event));
                if taken {
                    Err(RegistrationError::Conflict(format!(
                        "socket '{}' already has a {} handler",
                        socket,
                        event.as_str()
                    )))
                } else {
                    Ok(())
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
