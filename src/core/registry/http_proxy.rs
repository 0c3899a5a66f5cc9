use async_trait::async_trait;
use axum::http::uri::Authority;
use std::sync::Arc;

use super::{RegistrationError, TriggerRegistry, WorkerMap};
use crate::core::worker::{Worker, WorkerSpec};

/// Lower-cased host of a `Host` header or registered host, without port or
/// IPv6 brackets.
pub fn bare_host(value: &str) -> String {
    let value = value.trim();
    let host = match value.parse::<Authority>() {
        Ok(authority) => authority.host().to_string(),
        Err(_) => value.to_string(),
    };
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .to_lowercase()
}

/// Host-name keyed proxy workers; at most one per host.
#[derive(Default)]
pub struct HttpProxyRegistry {
    workers: WorkerMap,
}

impl HttpProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the worker bound to a `Host` header value.
    pub async fn find(&self, host_header: &str) -> Option<Arc<Worker>> {
        self.workers.get(&bare_host(host_header)).await.into_iter().next()
    }
}

#[async_trait]
impl TriggerRegistry for HttpProxyRegistry {
    async fn add(&self, worker: Arc<Worker>) -> Result<(), RegistrationError> {
        let WorkerSpec::HttpProxy(spec) = &worker.spec else {
            return Err(RegistrationError::Invalid(
                "not an http proxy worker".to_string(),
            ));
        };
        let host = spec.host.clone();
        self.workers
            .insert_checked(&host, worker.clone(), |existing| {
                if existing.is_empty() {
                    Ok(())
                } else {
                    Err(RegistrationError::Conflict(format!(
                        "host '{}' is already bound to another http worker",
                        host
                    )))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::WorkerRegistration;
    use crate::core::registry::testing::worker;

    fn proxy(host: &str, address: &str) -> Arc<Worker> {
        worker(WorkerRegistration::HttpWorker {
            host: host.to_string(),
            address: address.to_string(),
        })
    }

    #[tokio::test]
    async fn second_worker_for_host_is_rejected() {
        let registry = HttpProxyRegistry::new();
        let first = proxy("web.localhost", "127.0.0.1:8080");
        registry.add(first.clone()).await.unwrap();
        assert!(
            registry
                .add(proxy("WEB.localhost", "127.0.0.1:8081"))
                .await
                .is_err()
        );
        let found = registry.find("web.localhost:9001").await.unwrap();
        assert_eq!(found.id, first.id);
    }

    #[test]
    fn bare_host_drops_port_and_brackets() {
        assert_eq!(bare_host("Web.Localhost:9001"), "web.localhost");
        assert_eq!(bare_host("web.localhost"), "web.localhost");
        assert_eq!(bare_host("[::1]:9001"), "::1");
        assert_eq!(bare_host("[::1]"), "::1");
        assert_eq!(bare_host("::1"), "::1");
    }

    #[tokio::test]
    async fn ipv6_hosts_are_routed() {
        let registry = HttpProxyRegistry::new();
        let v6 = proxy("[::1]", "127.0.0.1:8080");
        registry.add(v6.clone()).await.unwrap();
        let found = registry.find("[::1]:9001").await.unwrap();
        assert_eq!(found.id, v6.id);
        assert!(registry.find("[::2]:9001").await.is_none());
    }

    #[tokio::test]
    async fn unknown_host_is_none() {
        let registry = HttpProxyRegistry::new();
        assert!(registry.find("nobody.localhost").await.is_none());
    }
}
