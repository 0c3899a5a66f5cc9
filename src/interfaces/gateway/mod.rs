//! HTTP gateway: routes external traffic to workers and exposes the emulated
//! resources.

mod handlers;
mod router;

pub use handlers::websockets::WebsocketConnections;
pub use router::build_gateway_router;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Router,
    extract::State,
    response::sse::{Event, Sse},
};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::core::lifecycle::LifecycleComponent;
use crate::core::services::Services;

#[derive(Clone)]
pub struct GatewayState {
    pub(crate) services: Services,
    pub(crate) connections: Arc<WebsocketConnections>,
    pub(crate) http: reqwest::Client,
    pub(crate) log_tx: broadcast::Sender<String>,
}

impl GatewayState {
    pub fn new(
        services: Services,
        log_tx: broadcast::Sender<String>,
        proxy_connect_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(proxy_connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            services,
            connections: Arc::new(WebsocketConnections::default()),
            http,
            log_tx,
        })
    }
}

async fn sse_logs_endpoint(
    State(state): State<GatewayState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(log) => Ok(Event::default().data(log)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream)
}

/// Accept loop for the gateway. A connection that sends nothing for
/// `idle_timeout`, either before its first request or between keep-alive
/// requests, is closed.
pub async fn serve_gateway(listener: TcpListener, app: Router, idle_timeout: Duration) {
    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(idle_timeout);
    let builder = Arc::new(builder);

    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Gateway accept failed: {}", e);
                continue;
            }
        };
        let builder = builder.clone();
        let service = TowerToHyperService::new(app.clone());

        tokio::spawn(async move {
            match tokio::time::timeout(idle_timeout, stream.readable()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(%remote, "gateway connection failed: {}", e);
                    return;
                }
                Err(_) => {
                    debug!(%remote, "closing idle gateway connection");
                    return;
                }
            }
            if let Err(e) = builder
                .serve_connection_with_upgrades(TokioIo::new(stream), service)
                .await
            {
                debug!(%remote, "gateway connection ended: {}", e);
            }
        });
    }
}

pub struct GatewayServer {
    state: GatewayState,
    addr: String,
    idle_timeout: Duration,
    handle: Option<JoinHandle<()>>,
}

impl GatewayServer {
    pub fn new(state: GatewayState, addr: String, idle_timeout: Duration) -> Self {
        Self {
            state,
            addr,
            idle_timeout,
            handle: None,
        }
    }
}

#[async_trait]
impl LifecycleComponent for GatewayServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("Gateway initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        let app = build_gateway_router(self.state.clone());
        info!("Gateway running at http://{}", self.addr);
        self.handle = Some(tokio::spawn(serve_gateway(
            listener,
            app,
            self.idle_timeout,
        )));
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("Gateway shutting down...");
        self.state.connections.close_all().await;
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        Ok(())
    }
}
