use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{RegistrationError, TriggerRegistry, WorkerMap};
use crate::core::worker::{Worker, WorkerSpec};

/// Marker standing in for any `:param` segment when comparing routes.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A registered API path such as `/orders/:id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    pub fn parse(path: &str) -> Result<Self, RegistrationError> {
        let raw = path.trim();
        if !raw.starts_with('/') {
            return Err(RegistrationError::Invalid(format!(
                "api path '{}' must start with '/'",
                path
            )));
        }

        let mut segments = Vec::new();
        for part in raw.split('/').filter(|s| !s.is_empty()) {
            if let Some(name) = part.strip_prefix(':') {
                if name.is_empty() {
                    return Err(RegistrationError::Invalid(format!(
                        "api path '{}' has an unnamed parameter",
                        path
                    )));
                }
                segments.push(Segment::Param(name.to_string()));
            } else {
                segments.push(Segment::Literal(part.to_lowercase()));
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Comparison form: literals lower-cased, parameters replaced by [`WILDCARD`].
    pub fn normalized(&self) -> String {
        let parts: Vec<&str> = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Literal(l) => l.as_str(),
                Segment::Param(_) => WILDCARD,
            })
            .collect();
        format!("/{}", parts.join("/"))
    }

    /// Match a concrete request path, returning the extracted parameters.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(l) => {
                    if !part.eq_ignore_ascii_case(l) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(params)
    }

    /// Ordering key for overlapping matches: a literal segment outranks a
    /// parameter, compared left to right.
    fn specificity(&self) -> Vec<bool> {
        self.segments
            .iter()
            .map(|s| matches!(s, Segment::Literal(_)))
            .collect()
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A worker matched for an inbound request.
pub struct RouteMatch {
    pub worker: Arc<Worker>,
    pub params: HashMap<String, String>,
}

#[derive(Default)]
pub struct ApiRegistry {
    workers: WorkerMap,
}

impl ApiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the worker serving `method path` on the named API. When several
    /// routes match, the most literal one wins regardless of registration order.
    pub async fn find(&self, api: &str, method: &str, path: &str) -> Option<RouteMatch> {
        let method = method.to_uppercase();
        let mut best: Option<(Vec<bool>, RouteMatch)> = None;
        for worker in self.workers.get(api).await {
            let WorkerSpec::Api(spec) = &worker.spec else {
                continue;
            };
            if !spec.methods.contains(&method) {
                continue;
            }
            let Some(params) = spec.route.matches(path) else {
                continue;
            };
            let rank = spec.route.specificity();
            if best.as_ref().is_none_or(|(current, _)| rank > *current) {
                best = Some((rank, RouteMatch { worker, params }));
            }
        }
        best.map(|(_, found)| found)
    }

    pub async fn apis(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .workers
            .all()
            .await
            .iter()
            .map(|w| w.spec.key().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

#[async_trait]
impl TriggerRegistry for ApiRegistry {
    async fn add(&self, worker: Arc<Worker>) -> Result<(), RegistrationError> {
        let WorkerSpec::Api(spec) = &worker.spec else {
            return Err(RegistrationError::Invalid(
                "not an api worker".to_string(),
            ));
        };
        let normalized = spec.route.normalized();
        let key = spec.api.clone();
        let methods = spec.methods.clone();

        self.workers
            .insert_checked(&key, worker.clone(), |existing| {
                for other in existing {
                    let WorkerSpec::Api(other_spec) = &other.spec else {
                        continue;
                    };
                    if other_spec.route.normalized() != normalized {
                        continue;
                    }
                    let overlap: Vec<&str> = other_spec
                        .methods
                        .intersection(&methods)
                        .map(String::as_str)
                        .collect();
                    if !overlap.is_empty() {
                        return Err(RegistrationError::Conflict(format!(
                            "route {} {} on api '{}' is already registered by another worker ({})",
                            overlap.join(","),
                            other_spec.route,
                            key,
                            normalized
                        )));
                    }
                }
                Ok(())
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
