mod stream;

pub use stream::{DispatchError, ResponseStream, WorkerStream};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::core::protocol::{BucketEvent, Cadence, WebsocketEvent, WorkerRegistration};
use crate::core::registry::RegistrationError;
use crate::core::registry::api::RoutePattern;
use crate::core::registry::http_proxy::bare_host;
use crate::core::scheduler::{normalize_cron, rate_to_cron};

const HTTP_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS", "TRACE", "CONNECT",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WorkerId(uuid::Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    Api,
    HttpProxy,
    Subscriber,
    Schedule,
    Websocket,
    BucketNotification,
}

impl WorkerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerKind::Api => "api",
            WorkerKind::HttpProxy => "http_proxy",
            WorkerKind::Subscriber => "subscriber",
            WorkerKind::Schedule => "schedule",
            WorkerKind::Websocket => "websocket",
            WorkerKind::BucketNotification => "bucket_notification",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiWorker {
    pub api: String,
    pub route: RoutePattern,
    pub methods: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpProxyWorker {
    /// Lower-cased host name without port.
    pub host: String,
    /// `host:port` the function listens on.
    pub address: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberWorker {
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleWorker {
    pub key: String,
    pub cadence: Cadence,
    /// Cron expression derived from the cadence.
    pub cron: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebsocketWorker {
    pub socket: String,
    pub event: WebsocketEvent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketNotificationWorker {
    pub bucket: String,
    pub event: BucketEvent,
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerSpec {
    Api(ApiWorker),
    HttpProxy(HttpProxyWorker),
    Subscriber(SubscriberWorker),
    Schedule(ScheduleWorker),
    Websocket(WebsocketWorker),
    BucketNotification(BucketNotificationWorker),
}

impl WorkerSpec {
    pub fn kind(&self) -> WorkerKind {
        match self {
            WorkerSpec::Api(_) => WorkerKind::Api,
            WorkerSpec::HttpProxy(_) => WorkerKind::HttpProxy,
            WorkerSpec::Subscriber(_) => WorkerKind::Subscriber,
            WorkerSpec::Schedule(_) => WorkerKind::Schedule,
            WorkerSpec::Websocket(_) => WorkerKind::Websocket,
            WorkerSpec::BucketNotification(_) => WorkerKind::BucketNotification,
        }
    }

    /// The registry key this worker is filed under.
    pub fn key(&self) -> &str {
        match self {
            WorkerSpec::Api(w) => &w.api,
            WorkerSpec::HttpProxy(w) => &w.host,
            WorkerSpec::Subscriber(w) => &w.topic,
            WorkerSpec::Schedule(w) => &w.key,
            WorkerSpec::Websocket(w) => &w.socket,
            WorkerSpec::BucketNotification(w) => &w.bucket,
        }
    }
}

impl fmt::Display for WorkerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerSpec::Api(w) => {
                let methods: Vec<&str> = w.methods.iter().map(String::as_str).collect();
                write!(f, "api {} {} {}", w.api, methods.join(","), w.route)
            }
            WorkerSpec::HttpProxy(w) => write!(f, "http proxy {} -> {}", w.host, w.address),
            WorkerSpec::Subscriber(w) => write!(f, "subscriber {}", w.topic),
            WorkerSpec::Schedule(w) => write!(f, "schedule {} ({})", w.key, w.cron),
            WorkerSpec::Websocket(w) => write!(f, "websocket {} {}", w.socket, w.event.as_str()),
            WorkerSpec::BucketNotification(w) => write!(
                f,
                "bucket {} {} prefix '{}'",
                w.bucket,
                w.event.as_str(),
                w.prefix
            ),
        }
    }
}

fn required(field: &str, value: &str) -> Result<String, RegistrationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RegistrationError::Invalid(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

fn normalize_methods(methods: &[String]) -> Result<BTreeSet<String>, RegistrationError> {
    if methods.is_empty() {
        return Err(RegistrationError::Invalid(
            "at least one http method is required".to_string(),
        ));
    }
    let mut out = BTreeSet::new();
    for method in methods {
        let upper = method.trim().to_uppercase();
        if !HTTP_METHODS.contains(&upper.as_str()) {
            return Err(RegistrationError::Invalid(format!(
                "unsupported http method '{}'",
                method
            )));
        }
        out.insert(upper);
    }
    Ok(out)
}

fn normalize_host(host: &str) -> Result<String, RegistrationError> {
    let host = bare_host(&required("host", host)?);
    if host.is_empty() {
        return Err(RegistrationError::Invalid("host must not be empty".to_string()));
    }
    Ok(host)
}

impl TryFrom<WorkerRegistration> for WorkerSpec {
    type Error = RegistrationError;

    fn try_from(registration: WorkerRegistration) -> Result<Self, Self::Error> {
        let spec = match registration {
            WorkerRegistration::Api { api, path, methods } => WorkerSpec::Api(ApiWorker {
                api: required("api", &api)?,
                route: RoutePattern::parse(&path)?,
                methods: normalize_methods(&methods)?,
            }),
            WorkerRegistration::Schedule { key, cadence } => {
                let cron = match &cadence {
                    Cadence::Rate(rate) => rate_to_cron(rate)
                        .map_err(|e| RegistrationError::Invalid(e.to_string()))?,
                    Cadence::Cron(expr) => normalize_cron(expr)
                        .map_err(|e| RegistrationError::Invalid(e.to_string()))?,
                };
                WorkerSpec::Schedule(ScheduleWorker {
                    key: required("schedule key", &key)?,
                    cadence,
                    cron,
                })
            }
            WorkerRegistration::Subscription { topic } => {
                WorkerSpec::Subscriber(SubscriberWorker {
                    topic: required("topic", &topic)?,
                })
            }
            WorkerRegistration::BucketNotification {
                bucket,
                event,
                prefix,
            } => WorkerSpec::BucketNotification(BucketNotificationWorker {
                bucket: required("bucket", &bucket)?,
                event,
                prefix: prefix.trim_start_matches('/').to_string(),
            }),
            WorkerRegistration::HttpWorker { host, address } => {
                WorkerSpec::HttpProxy(HttpProxyWorker {
                    host: normalize_host(&host)?,
                    address: required("address", &address)?,
                })
            }
            WorkerRegistration::Websocket { socket, event } => {
                WorkerSpec::Websocket(WebsocketWorker {
                    socket: required("socket", &socket)?,
                    event,
                })
            }
        };
        Ok(spec)
    }
}

/// A registered function process, reachable through its stream.
pub struct Worker {
    pub id: WorkerId,
    pub spec: WorkerSpec,
    pub registered_at: DateTime<Utc>,
    stream: Arc<WorkerStream>,
}

impl Worker {
    pub fn new(spec: WorkerSpec, stream: Arc<WorkerStream>) -> Self {
        Self {
            id: WorkerId::new(),
            spec,
            registered_at: Utc::now(),
            stream,
        }
    }

    pub fn kind(&self) -> WorkerKind {
        self.spec.kind()
    }

    pub fn stream(&self) -> &Arc<WorkerStream> {
        &self.stream
    }

    pub fn summary(&self) -> WorkerSummary {
        WorkerSummary {
            id: self.id,
            kind: self.kind(),
            key: self.spec.key().to_string(),
            description: self.spec.to_string(),
            registered_at: self.registered_at,
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("spec", &self.spec)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerSummary {
    pub id: WorkerId,
    pub kind: WorkerKind,
    pub key: String,
    pub description: String,
    pub registered_at: DateTime<Utc>,
}
