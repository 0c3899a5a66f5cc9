use axum::{
    Json,
    body::Bytes,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use super::super::GatewayState;
use super::error_response;
use crate::core::history::HistoryEvent;
use crate::core::protocol::{QueryParams, TriggerRequest, WebsocketEvent};

#[derive(Debug)]
enum Outbound {
    Send(Vec<u8>),
    Close,
}

struct Connection {
    socket: String,
    tx: mpsc::UnboundedSender<Outbound>,
}

/// Live client connections on gateway websockets, keyed by connection id.
#[derive(Default)]
pub struct WebsocketConnections {
    connections: Mutex<HashMap<String, Connection>>,
}

impl WebsocketConnections {
    async fn open(&self, socket: &str, id: &str) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.lock().await.insert(
            id.to_string(),
            Connection {
                socket: socket.to_string(),
                tx,
            },
        );
        rx
    }

    async fn forget(&self, id: &str) {
        self.connections.lock().await.remove(id);
    }

    async fn push(&self, socket: &str, id: &str, message: Outbound) -> bool {
        let connections = self.connections.lock().await;
        match connections.get(id) {
            Some(conn) if conn.socket == socket => conn.tx.send(message).is_ok(),
            _ => false,
        }
    }

    pub async fn count(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn close_all(&self) {
        let mut connections = self.connections.lock().await;
        for (_, conn) in connections.drain() {
            let _ = conn.tx.send(Outbound::Close);
        }
    }
}

async fn dispatch_event(
    state: &GatewayState,
    socket: &str,
    connection_id: &str,
    event: WebsocketEvent,
    query: QueryParams,
    body: Vec<u8>,
) -> Option<bool> {
    let worker = state.services.pool.websockets.find(socket, event).await?;
    let success = match worker
        .stream()
        .call(TriggerRequest::Websocket {
            socket: socket.to_string(),
            event,
            connection_id: connection_id.to_string(),
            query,
            body,
        })
        .await
    {
        Ok(response) => response.is_success(),
        Err(e) => {
            warn!(socket, connection_id, "websocket {} dispatch failed: {}", event.as_str(), e);
            false
        }
    };

    state.services.history.record(HistoryEvent::WebsocketEvent {
        socket: socket.to_string(),
        connection_id: connection_id.to_string(),
        event,
        success,
    });
    Some(success)
}

pub async fn connect_endpoint(
    Path(socket): Path<String>,
    Query(query): Query<Vec<(String, String)>>,
    State(state): State<GatewayState>,
    ws: WebSocketUpgrade,
) -> Response {
    let mut params = QueryParams::new();
    for (name, value) in query {
        params.entry(name).or_default().push(value);
    }

    // Registered before the connect event so the worker can push to the
    // connection while deciding; frames queue until the upgrade completes.
    let connection_id = uuid::Uuid::new_v4().to_string();
    let outbound = state.connections.open(&socket, &connection_id).await;
    let verdict = dispatch_event(
        &state,
        &socket,
        &connection_id,
        WebsocketEvent::Connect,
        params.clone(),
        Vec::new(),
    )
    .await;
    match verdict {
        None => {
            state.connections.forget(&connection_id).await;
            return error_response(
                StatusCode::NOT_FOUND,
                format!("no websocket registered for {}", socket),
            );
        }
        Some(false) => {
            state.connections.forget(&connection_id).await;
            return error_response(StatusCode::FORBIDDEN, "connection refused by worker");
        }
        Some(true) => {}
    }

    let connections = state.connections.clone();
    let failed_id = connection_id.clone();
    ws.on_failed_upgrade(move |e| {
        warn!(connection_id = %failed_id, "websocket upgrade failed: {}", e);
        tokio::spawn(async move { connections.forget(&failed_id).await });
    })
    .on_upgrade(move |client| run_connection(state, socket, connection_id, params, outbound, client))
}

async fn run_connection(
    state: GatewayState,
    socket: String,
    connection_id: String,
    query: QueryParams,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    client: WebSocket,
) {
    info!(socket = %socket, connection_id = %connection_id, "websocket connected");
    let (mut sink, mut incoming) = client.split();

    loop {
        tokio::select! {
            frame = incoming.next() => {
                let body = match frame {
                    Some(Ok(Message::Text(text))) => text.as_str().as_bytes().to_vec(),
                    Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(connection_id = %connection_id, "websocket read failed: {}", e);
                        break;
                    }
                };
                dispatch_event(
                    &state,
                    &socket,
                    &connection_id,
                    WebsocketEvent::Message,
                    query.clone(),
                    body,
                )
                .await;
            }
            message = outbound.recv() => {
                let frame = match message {
                    Some(Outbound::Send(body)) => match String::from_utf8(body) {
                        Ok(text) => Message::Text(text.into()),
                        Err(e) => Message::Binary(e.into_bytes().into()),
                    },
                    Some(Outbound::Close) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                };
                if sink.send(frame).await.is_err() {
                    break;
                }
            }
        }
    }

    state.connections.forget(&connection_id).await;
    dispatch_event(
        &state,
        &socket,
        &connection_id,
        WebsocketEvent::Disconnect,
        query,
        Vec::new(),
    )
    .await;
    info!(socket = %socket, connection_id = %connection_id, "websocket disconnected");
}

pub async fn send_endpoint(
    Path((socket, connection_id)): Path<(String, String)>,
    State(state): State<GatewayState>,
    body: Bytes,
) -> Response {
    if state
        .connections
        .push(&socket, &connection_id, Outbound::Send(body.to_vec()))
        .await
    {
        Json(serde_json::json!({ "success": true })).into_response()
    } else {
        error_response(
            StatusCode::NOT_FOUND,
            format!("no connection {} on websocket {}", connection_id, socket),
        )
    }
}

pub async fn close_endpoint(
    Path((socket, connection_id)): Path<(String, String)>,
    State(state): State<GatewayState>,
) -> Response {
    if state
        .connections
        .push(&socket, &connection_id, Outbound::Close)
        .await
    {
        Json(serde_json::json!({ "success": true })).into_response()
    } else {
        error_response(
            StatusCode::NOT_FOUND,
            format!("no connection {} on websocket {}", connection_id, socket),
        )
    }
}
