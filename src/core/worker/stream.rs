use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::protocol::{ServerMessage, TriggerRequest, TriggerResponse};

const OUTBOUND_BUFFER: usize = 64;
const RESPONSE_BUFFER: usize = 16;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("worker not found: {0}")]
    WorkerNotFound(String),
    #[error("worker stream closed")]
    StreamClosed,
    #[error("unexpected response from worker: {0}")]
    UnexpectedResponse(String),
}

/// Live half of a worker's bidirectional stream.
///
/// Dispatchers push trigger frames through [`WorkerStream::dispatch`]; the
/// registration handler drains the outbound queue onto the transport and
/// feeds correlated responses back through [`WorkerStream::resolve`].
pub struct WorkerStream {
    outbound: mpsc::Sender<ServerMessage>,
    pending: Mutex<HashMap<String, mpsc::Sender<TriggerResponse>>>,
    closed: CancellationToken,
}

impl WorkerStream {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<ServerMessage>) {
        let (outbound, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let stream = Arc::new(Self {
            outbound,
            pending: Mutex::new(HashMap::new()),
            closed: CancellationToken::new(),
        });
        (stream, rx)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Send a trigger to the worker and return the stream of its response frames.
    pub async fn dispatch(
        self: &Arc<Self>,
        request: TriggerRequest,
    ) -> Result<ResponseStream, DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::StreamClosed);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(RESPONSE_BUFFER);
        self.lock_pending().insert(id.clone(), tx);

        let response = ResponseStream {
            id: id.clone(),
            rx,
            closed: self.closed.clone(),
            owner: Arc::downgrade(self),
        };

        if self
            .outbound
            .send(ServerMessage::Trigger { id, request })
            .await
            .is_err()
        {
            return Err(DispatchError::StreamClosed);
        }
        Ok(response)
    }

    /// Dispatch and wait for the first response frame.
    pub async fn call(self: &Arc<Self>, request: TriggerRequest) -> Result<TriggerResponse, DispatchError> {
        let mut responses = self.dispatch(request).await?;
        responses.next().await
    }

    /// Route a response frame to whoever is waiting on `id`.
    /// Returns false when nobody is waiting for it any more.
    ///
    /// Never blocks: a caller that lets [`RESPONSE_BUFFER`] frames pile up is
    /// cut off so the rest of the worker's traffic keeps flowing.
    pub fn resolve(&self, id: &str, response: TriggerResponse) -> bool {
        let terminal = response.is_terminal();
        let waiter = {
            let mut pending = self.lock_pending();
            if terminal {
                pending.remove(id)
            } else {
                pending.get(id).cloned()
            }
        };

        let Some(waiter) = waiter else {
            debug!(request_id = id, "dropping response for unknown request");
            return false;
        };

        match waiter.try_send(response) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(request_id = id, "response reader fell behind, dropping it");
                self.lock_pending().remove(id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.lock_pending().remove(id);
                false
            }
        }
    }

    /// Fail every in-flight dispatch and refuse new ones.
    pub fn close(&self) {
        self.closed.cancel();
        self.lock_pending().clear();
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, mpsc::Sender<TriggerResponse>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Response frames for one dispatched trigger.
pub struct ResponseStream {
    id: String,
    rx: mpsc::Receiver<TriggerResponse>,
    closed: CancellationToken,
    owner: Weak<WorkerStream>,
}

impl ResponseStream {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn next(&mut self) -> Result<TriggerResponse, DispatchError> {
        tokio::select! {
            biased;
            frame = self.rx.recv() => frame.ok_or(DispatchError::StreamClosed),
            _ = self.closed.cancelled() => match self.rx.try_recv() {
                Ok(frame) => Ok(frame),
                Err(_) => Err(DispatchError::StreamClosed),
            },
        }
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.lock_pending().remove(&self.id);
        }
    }
}
