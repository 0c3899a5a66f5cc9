//! Topic publishing with fan-out to every live subscriber.

use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::history::{History, HistoryEvent};
use crate::core::protocol::TriggerRequest;
use crate::core::registry::TopicRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub message_id: String,
    pub topic: String,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PublishOutcome {
    Delivered(DeliveryReport),
    Scheduled { message_id: String, delay_ms: u64 },
}

impl PublishOutcome {
    pub fn message_id(&self) -> &str {
        match self {
            PublishOutcome::Delivered(report) => &report.message_id,
            PublishOutcome::Scheduled { message_id, .. } => message_id,
        }
    }
}

#[derive(Clone)]
pub struct EventService {
    topics: Arc<TopicRegistry>,
    history: Arc<History>,
}

impl EventService {
    pub fn new(topics: Arc<TopicRegistry>, history: Arc<History>) -> Self {
        Self { topics, history }
    }

    /// Publish `payload` to `topic`. With a delay the delivery runs on its own
    /// task and this returns straight away.
    pub async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
        delay: Option<Duration>,
    ) -> PublishOutcome {
        let message_id = uuid::Uuid::new_v4().to_string();

        match delay.filter(|d| !d.is_zero()) {
            Some(delay) => {
                let service = self.clone();
                let delayed_topic = topic.to_string();
                let id = message_id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    service.deliver(&delayed_topic, id, payload).await;
                });
                debug!(topic, message_id = %message_id, "publish scheduled in {:?}", delay);
                PublishOutcome::Scheduled {
                    message_id,
                    delay_ms: delay.as_millis() as u64,
                }
            }
            None => PublishOutcome::Delivered(self.deliver(topic, message_id, payload).await),
        }
    }

    async fn deliver(
        &self,
        topic: &str,
        message_id: String,
        payload: serde_json::Value,
    ) -> DeliveryReport {
        let subscribers = self.topics.subscribers(topic).await;

        let deliveries = subscribers.iter().map(|worker| {
            let request = TriggerRequest::Topic {
                topic: topic.to_string(),
                message_id: message_id.clone(),
                payload: payload.clone(),
            };
            let delivery_id = uuid::Uuid::new_v4();
            async move {
                match worker.stream().call(request).await {
                    Ok(response) if response.is_success() => true,
                    Ok(response) => {
                        warn!(topic, %delivery_id, worker_id = %worker.id, "subscriber reported failure: {:?}", response);
                        false
                    }
                    Err(e) => {
                        warn!(topic, %delivery_id, worker_id = %worker.id, "delivery failed: {}", e);
                        false
                    }
                }
            }
        });
        let results = join_all(deliveries).await;

        let delivered = results.iter().filter(|ok| **ok).count();
        let report = DeliveryReport {
            message_id,
            topic: topic.to_string(),
            delivered,
            failed: results.len() - delivered,
        };

        info!(
            topic,
            message_id = %report.message_id,
            "published to {}/{} subscribers",
            report.delivered,
            results.len()
        );
        self.history.record(HistoryEvent::TopicPublish {
            topic: report.topic.clone(),
            message_id: report.message_id.clone(),
            delivered: report.delivered,
            failed: report.failed,
        });
        report
    }
}
