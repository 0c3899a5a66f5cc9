//! Server side of a worker's registration stream.
//!
//! The transport only moves JSON text frames; [`serve`] owns the protocol:
//! the first frame must be a registration, after which trigger frames flow
//! out and response frames flow back until either side hangs up.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::pool::WorkerPool;
use crate::core::protocol::{ClientMessage, ServerMessage, StatusCode};
use crate::core::worker::{Worker, WorkerStream};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("first frame must be a registration request")]
    FailedPrecondition,
    #[error("registration rejected ({}): {message}", .code.as_str())]
    Rejected { code: StatusCode, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("stream closed before registration")]
    Closed,
}

/// A bidirectional stream of text frames.
#[async_trait]
pub trait FrameStream: Send {
    /// Next inbound frame, `None` once the peer has closed.
    async fn recv(&mut self) -> Result<Option<String>, StreamError>;
    async fn send(&mut self, frame: String) -> Result<(), StreamError>;
    async fn close(&mut self);
}

/// Lets the handler look at the first frame before committing to it.
pub struct PeekableStream<S> {
    inner: S,
    peeked: Option<Option<String>>,
}

impl<S: FrameStream> PeekableStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            peeked: None,
        }
    }

    pub async fn peek(&mut self) -> Result<Option<&str>, StreamError> {
        if self.peeked.is_none() {
            self.peeked = Some(self.inner.recv().await?);
        }
        Ok(self.peeked.as_ref().and_then(|f| f.as_deref()))
    }

    pub async fn recv(&mut self) -> Result<Option<String>, StreamError> {
        match self.peeked.take() {
            Some(frame) => Ok(frame),
            None => self.inner.recv().await,
        }
    }

    pub async fn send(&mut self, message: &ServerMessage) -> Result<(), StreamError> {
        let frame =
            serde_json::to_string(message).map_err(|e| StreamError::Transport(e.to_string()))?;
        self.inner.send(frame).await
    }

    pub async fn close(&mut self) {
        self.inner.close().await;
    }
}

/// Unregisters the worker if `serve` is dropped before it finishes.
struct RegistrationGuard {
    pool: Arc<WorkerPool>,
    worker: Option<Arc<Worker>>,
}

impl RegistrationGuard {
    async fn release(mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stream().close();
            self.pool.unregister(&worker).await;
        }
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.stream().close();
        let pool = self.pool.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    pool.unregister(&worker).await;
                });
            }
            Err(_) => warn!(worker_id = %worker.id, "no runtime to unregister worker"),
        }
    }
}

async fn reject<S: FrameStream>(
    stream: &mut PeekableStream<S>,
    code: StatusCode,
    message: String,
) -> StreamError {
    let frame = ServerMessage::RegistrationRejected {
        code,
        message: message.clone(),
    };
    if let Err(e) = stream.send(&frame).await {
        debug!("could not deliver rejection: {}", e);
    }
    stream.close().await;
    match code {
        StatusCode::FailedPrecondition => StreamError::FailedPrecondition,
        code => StreamError::Rejected { code, message },
    }
}

/// Serve one worker stream to completion.
pub async fn serve<S: FrameStream>(pool: Arc<WorkerPool>, stream: S) -> Result<(), StreamError> {
    let mut stream = PeekableStream::new(stream);

    let registration = match stream.peek().await? {
        None => return Err(StreamError::Closed),
        Some(frame) => match serde_json::from_str::<ClientMessage>(frame) {
            Ok(ClientMessage::Registration { worker }) => Some(worker),
            _ => None,
        },
    };
    let Some(registration) = registration else {
        warn!("stream opened without a registration request");
        return Err(reject(
            &mut stream,
            StatusCode::FailedPrecondition,
            "first message must be a registration request".to_string(),
        )
        .await);
    };
    stream.recv().await?;

    let (worker_stream, mut outbound) = WorkerStream::new();
    let worker = match pool.register(registration, worker_stream).await {
        Ok(worker) => worker,
        Err(e) => {
            warn!("registration rejected: {}", e);
            return Err(reject(&mut stream, e.status_code(), e.to_string()).await);
        }
    };
    let guard = RegistrationGuard {
        pool: pool.clone(),
        worker: Some(worker.clone()),
    };

    let accepted = ServerMessage::RegistrationAccepted {
        worker_id: worker.id.to_string(),
    };
    let result = match stream.send(&accepted).await {
        Ok(()) => pump(&mut stream, &worker, &mut outbound).await,
        Err(e) => Err(e),
    };

    match &result {
        Ok(()) => info!(worker_id = %worker.id, "worker stream closed"),
        Err(e) => warn!(worker_id = %worker.id, "worker stream failed: {}", e),
    }
    guard.release().await;
    stream.close().await;
    result
}

async fn pump<S: FrameStream>(
    stream: &mut PeekableStream<S>,
    worker: &Worker,
    outbound: &mut tokio::sync::mpsc::Receiver<ServerMessage>,
) -> Result<(), StreamError> {
    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    return Ok(());
                };
                stream.send(&message).await?;
            }
            frame = stream.recv() => {
                let Some(frame) = frame? else {
                    return Ok(());
                };
                match serde_json::from_str::<ClientMessage>(&frame) {
                    Ok(ClientMessage::Response { id, response }) => {
                        worker.stream().resolve(&id, response);
                    }
                    Ok(ClientMessage::Registration { .. }) => {
                        warn!(worker_id = %worker.id, "ignoring repeated registration");
                    }
                    Err(e) => {
                        warn!(worker_id = %worker.id, "dropping malformed frame: {}", e);
                    }
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::pair;
    use super::*;
    use crate::core::protocol::{TriggerRequest, TriggerResponse, WorkerRegistration};

    fn api_registration(path: &str) -> ClientMessage {
        ClientMessage::Registration {
            worker: WorkerRegistration::Api {
                api: "shop".to_string(),
                path: path.to_string(),
                methods: vec!["GET".to_string()],
            },
        }
    }

    #[tokio::test]
    async fn first_frame_must_be_registration() {
        let pool = Arc::new(WorkerPool::new());
        let (stream, mut peer) = pair();
        peer.send(&ClientMessage::Response {
            id: "1".to_string(),
            response: TriggerResponse::Ack {
                success: true,
                message: None,
            },
        })
        .await;

        let result = serve(pool.clone(), stream).await;
        assert_eq!(result, Err(StreamError::FailedPrecondition));
        assert!(matches!(
            peer.next().await,
            ServerMessage::RegistrationRejected {
                code: StatusCode::FailedPrecondition,
                ..
            }
        ));
        assert!(pool.workers().await.is_empty());
    }

    #[tokio::test]
    async fn garbage_first_frame_is_failed_precondition() {
        let pool = Arc::new(WorkerPool::new());
        let (stream, peer) = pair();
        peer.tx.send("not json".to_string()).await.unwrap();
        assert_eq!(
            serve(pool, stream).await,
            Err(StreamError::FailedPrecondition)
        );
    }

    #[tokio::test]
    async fn conflicting_registration_is_rejected_and_first_kept() {
        let pool = Arc::new(WorkerPool::new());

        let (first, mut first_peer) = pair();
        first_peer.send(&api_registration("/items/:id")).await;
        let first_task = tokio::spawn(serve(pool.clone(), first));
        assert!(matches!(
            first_peer.next().await,
            ServerMessage::RegistrationAccepted { .. }
        ));

        let (second, mut second_peer) = pair();
        second_peer.send(&api_registration("/Items/:other")).await;
        let result = serve(pool.clone(), second).await;
        assert!(matches!(
            result,
            Err(StreamError::Rejected {
                code: StatusCode::AlreadyExists,
                ..
            })
        ));
        assert!(matches!(
            second_peer.next().await,
            ServerMessage::RegistrationRejected {
                code: StatusCode::AlreadyExists,
                ..
            }
        ));

        let found = pool.apis.find("shop", "GET", "/items/7").await.unwrap();
        assert_eq!(found.params["id"], "7");

        drop(first_peer);
        first_task.await.unwrap().unwrap();
        assert!(pool.apis.find("shop", "GET", "/items/7").await.is_none());
    }

    #[tokio::test]
    async fn invalid_registration_is_invalid_argument() {
        let pool = Arc::new(WorkerPool::new());
        let (stream, peer) = pair();
        peer.send(&ClientMessage::Registration {
            worker: WorkerRegistration::Schedule {
                key: "bad".to_string(),
                cadence: crate::core::protocol::Cadence::Rate("45 fortnights".to_string()),
            },
        })
        .await;
        let result = serve(pool, stream).await;
        assert!(matches!(
            result,
            Err(StreamError::Rejected {
                code: StatusCode::InvalidArgument,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn triggers_and_responses_flow_until_close() {
        let pool = Arc::new(WorkerPool::new());
        let (stream, mut peer) = pair();
        peer.send(&api_registration("/ping")).await;
        let task = tokio::spawn(serve(pool.clone(), stream));
        assert!(matches!(
            peer.next().await,
            ServerMessage::RegistrationAccepted { .. }
        ));

        let route = pool.apis.find("shop", "GET", "/ping").await.unwrap();
        let caller = tokio::spawn(async move {
            route
                .worker
                .stream()
                .call(TriggerRequest::Http {
                    method: "GET".to_string(),
                    path: "/ping".to_string(),
                    query: Default::default(),
                    headers: Default::default(),
                    path_params: Default::default(),
                    body: vec![],
                })
                .await
        });

        let ServerMessage::Trigger { id, .. } = peer.next().await else {
            panic!("expected trigger");
        };
        peer.send(&ClientMessage::Response {
            id: "unknown".to_string(),
            response: TriggerResponse::Ack {
                success: true,
                message: None,
            },
        })
        .await;
        peer.send(&ClientMessage::Response {
            id,
            response: TriggerResponse::Http {
                status: 200,
                headers: Default::default(),
                body: b"pong".to_vec(),
                more: false,
            },
        })
        .await;

        let TriggerResponse::Http { body, .. } = caller.await.unwrap().unwrap() else {
            panic!("expected http response");
        };
        assert_eq!(body, b"pong");

        drop(peer);
        task.await.unwrap().unwrap();
        assert!(pool.workers().await.is_empty());
    }

    #[tokio::test]
    async fn aborted_serve_still_unregisters() {
        let pool = Arc::new(WorkerPool::new());
        let (stream, mut peer) = pair();
        peer.send(&api_registration("/abort")).await;
        let task = tokio::spawn(serve(pool.clone(), stream));
        assert!(matches!(
            peer.next().await,
            ServerMessage::RegistrationAccepted { .. }
        ));

        task.abort();
        let _ = task.await;
        for _ in 0..50 {
            if pool.workers().await.is_empty() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("worker was not unregistered after abort");
    }
}
