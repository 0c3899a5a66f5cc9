//! Frames exchanged between the membrane and function processes.
//!
//! Every frame is a JSON text message. A function opens a stream, sends a
//! single [`ClientMessage::Registration`] and afterwards only answers
//! [`ServerMessage::Trigger`] frames with [`ClientMessage::Response`] frames
//! carrying the same `id`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type Headers = HashMap<String, Vec<String>>;
pub type QueryParams = HashMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Registration {
        worker: WorkerRegistration,
    },
    Response {
        id: String,
        response: TriggerResponse,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RegistrationAccepted { worker_id: String },
    RegistrationRejected { code: StatusCode, message: String },
    Trigger { id: String, request: TriggerRequest },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    FailedPrecondition,
    AlreadyExists,
    InvalidArgument,
    NotFound,
    Internal,
}

impl StatusCode {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusCode::FailedPrecondition => "FailedPrecondition",
            StatusCode::AlreadyExists => "AlreadyExists",
            StatusCode::InvalidArgument => "InvalidArgument",
            StatusCode::NotFound => "NotFound",
            StatusCode::Internal => "Internal",
        }
    }
}

/// What a function wants to be triggered by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerRegistration {
    Api {
        api: String,
        path: String,
        methods: Vec<String>,
    },
    Schedule {
        key: String,
        cadence: Cadence,
    },
    Subscription {
        topic: String,
    },
    BucketNotification {
        bucket: String,
        event: BucketEvent,
        #[serde(default)]
        prefix: String,
    },
    HttpWorker {
        host: String,
        address: String,
    },
    Websocket {
        socket: String,
        event: WebsocketEvent,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// A cron expression with five (or six, seconds first) fields.
    Cron(String),
    /// A rate such as `"5 minutes"`.
    Rate(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebsocketEvent {
    Connect,
    Disconnect,
    Message,
}

impl WebsocketEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            WebsocketEvent::Connect => "connect",
            WebsocketEvent::Disconnect => "disconnect",
            WebsocketEvent::Message => "message",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketEvent {
    Write,
    Delete,
}

impl BucketEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            BucketEvent::Write => "write",
            BucketEvent::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerRequest {
    Http {
        method: String,
        path: String,
        #[serde(default)]
        query: QueryParams,
        #[serde(default)]
        headers: Headers,
        #[serde(default)]
        path_params: HashMap<String, String>,
        #[serde(default, with = "base64_body")]
        body: Vec<u8>,
    },
    Topic {
        topic: String,
        message_id: String,
        payload: serde_json::Value,
    },
    Interval {
        schedule: String,
    },
    Notification {
        bucket: String,
        key: String,
        event: BucketEvent,
    },
    Websocket {
        socket: String,
        event: WebsocketEvent,
        connection_id: String,
        #[serde(default)]
        query: QueryParams,
        #[serde(default, with = "base64_body")]
        body: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerResponse {
    /// Response head (and possibly the whole body). With `more` set the body
    /// continues in `HttpChunk` frames until one has `last` set.
    Http {
        status: u16,
        #[serde(default)]
        headers: Headers,
        #[serde(default, with = "base64_body")]
        body: Vec<u8>,
        #[serde(default)]
        more: bool,
    },
    HttpChunk {
        #[serde(default, with = "base64_body")]
        body: Vec<u8>,
        #[serde(default)]
        last: bool,
    },
    /// Acknowledgement for fire-and-forget triggers.
    Ack {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl TriggerResponse {
    /// Whether no further frames will follow for the same request id.
    pub fn is_terminal(&self) -> bool {
        match self {
            TriggerResponse::Http { more, .. } => !more,
            TriggerResponse::HttpChunk { last, .. } => *last,
            TriggerResponse::Ack { .. } => true,
        }
    }

    pub fn is_success(&self) -> bool {
        match self {
            TriggerResponse::Http { status, .. } => *status < 500,
            TriggerResponse::HttpChunk { .. } => true,
            TriggerResponse::Ack { success, .. } => *success,
        }
    }
}

mod base64_body {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
