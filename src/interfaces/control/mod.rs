//! Control plane: the websocket endpoint function processes register on.

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::core::lifecycle::LifecycleComponent;
use crate::core::pool::WorkerPool;
use crate::core::stream::{FrameStream, StreamError, serve};

/// A registration stream carried over an axum websocket.
pub struct WsFrameStream {
    socket: WebSocket,
}

impl WsFrameStream {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl FrameStream for WsFrameStream {
    async fn recv(&mut self) -> Result<Option<String>, StreamError> {
        loop {
            match self.socket.recv().await {
                None | Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(Message::Binary(bytes))) => {
                    return String::from_utf8(bytes.to_vec())
                        .map(Some)
                        .map_err(|_| StreamError::Transport("binary frame is not utf-8".to_string()));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(StreamError::Transport(e.to_string())),
            }
        }
    }

    async fn send(&mut self, frame: String) -> Result<(), StreamError> {
        self.socket
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.socket.send(Message::Close(None)).await {
            debug!("websocket already closed: {}", e);
        }
    }
}

async fn register_endpoint(State(pool): State<Arc<WorkerPool>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = serve(pool, WsFrameStream::new(socket)).await {
            debug!("registration stream ended: {}", e);
        }
    })
}

pub fn build_control_router(pool: Arc<WorkerPool>) -> Router {
    Router::new()
        .route("/register", get(register_endpoint))
        .with_state(pool)
}

pub struct ControlPlaneServer {
    pool: Arc<WorkerPool>,
    addr: String,
    handle: Option<JoinHandle<()>>,
}

impl ControlPlaneServer {
    pub fn new(pool: Arc<WorkerPool>, addr: String) -> Self {
        Self {
            pool,
            addr,
            handle: None,
        }
    }
}

#[async_trait]
impl LifecycleComponent for ControlPlaneServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("Control plane initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        let app = build_control_router(self.pool.clone());
        let addr = self.addr.clone();
        info!("Control plane listening at ws://{}/register", addr);
        self.handle = Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Control plane crashed: {}", e);
            }
        }));
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("Control plane shutting down...");
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        Ok(())
    }
}
