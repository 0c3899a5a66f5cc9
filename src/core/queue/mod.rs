//! In-process queue emulation with visibility-timeout leases.
//!
//! Items are never handed to two receivers at once: a received item carries a
//! lease until its expiry, and only completing it with that lease removes it.
//! Once a lease expires the item is visible again.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

pub const DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = 30;
pub const MAX_RECEIVE_DEPTH: usize = 10;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: std::time::Duration) {
        let by = Duration::from_std(by).unwrap_or_else(|_| Duration::zero());
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("receive depth must be between 1 and 10, got {0}")]
    InvalidDepth(usize),
    #[error("lease {lease_id} expired at {expiry} (now {now})")]
    LeaseExpired {
        lease_id: String,
        expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    },
    #[error("lease {0} not found")]
    LeaseNotFound(String),
    #[error("invalid queue name '{0}'")]
    InvalidName(String),
}

#[derive(Debug, Clone)]
struct Lease {
    id: String,
    expiry: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct QueueItem {
    id: String,
    payload: serde_json::Value,
    lease: Option<Lease>,
}

impl QueueItem {
    fn visible_at(&self, now: DateTime<Utc>) -> bool {
        self.lease.as_ref().is_none_or(|lease| lease.expiry <= now)
    }
}

/// An item handed out by [`QueueService::receive`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeasedItem {
    pub id: String,
    pub lease_id: String,
    pub expiry: DateTime<Utc>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub name: String,
    pub items: usize,
    pub leased: usize,
}

pub struct QueueService {
    queues: AsyncMutex<HashMap<String, Vec<QueueItem>>>,
    clock: Arc<dyn Clock>,
    visibility_timeout: Duration,
}

fn check_name(queue: &str) -> Result<(), QueueError> {
    if queue.trim().is_empty() || queue.contains('/') {
        return Err(QueueError::InvalidName(queue.to_string()));
    }
    Ok(())
}

impl QueueService {
    pub fn new(visibility_timeout: std::time::Duration) -> Self {
        Self::with_clock(visibility_timeout, Arc::new(SystemClock))
    }

    pub fn with_clock(visibility_timeout: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        let visibility_timeout = Duration::from_std(visibility_timeout)
            .unwrap_or_else(|_| Duration::seconds(DEFAULT_VISIBILITY_TIMEOUT_SECS as i64));
        Self {
            queues: AsyncMutex::new(HashMap::new()),
            clock,
            visibility_timeout,
        }
    }

    /// Append items, creating the queue on first use. Returns the item ids.
    pub async fn send(
        &self,
        queue: &str,
        payloads: Vec<serde_json::Value>,
    ) -> Result<Vec<String>, QueueError> {
        check_name(queue)?;
        let mut queues = self.queues.lock().await;
        let items = queues.entry(queue.to_string()).or_default();
        let ids = payloads
            .into_iter()
            .map(|payload| {
                let id = uuid::Uuid::new_v4().to_string();
                items.push(QueueItem {
                    id: id.clone(),
                    payload,
                    lease: None,
                });
                id
            })
            .collect::<Vec<_>>();
        debug!(queue, count = ids.len(), "queued items");
        Ok(ids)
    }

    /// Lease up to `depth` visible items in insertion order.
    pub async fn receive(&self, queue: &str, depth: usize) -> Result<Vec<LeasedItem>, QueueError> {
        check_name(queue)?;
        if !(1..=MAX_RECEIVE_DEPTH).contains(&depth) {
            return Err(QueueError::InvalidDepth(depth));
        }

        let now = self.clock.now();
        let expiry = now + self.visibility_timeout;
        let mut queues = self.queues.lock().await;
        let Some(items) = queues.get_mut(queue) else {
            return Ok(Vec::new());
        };

        let leased = items
            .iter_mut()
            .filter(|item| item.visible_at(now))
            .take(depth)
            .map(|item| {
                let lease = Lease {
                    id: uuid::Uuid::new_v4().to_string(),
                    expiry,
                };
                let out = LeasedItem {
                    id: item.id.clone(),
                    lease_id: lease.id.clone(),
                    expiry,
                    payload: item.payload.clone(),
                };
                item.lease = Some(lease);
                out
            })
            .collect::<Vec<_>>();
        debug!(queue, count = leased.len(), "leased items");
        Ok(leased)
    }

    /// Remove the item holding `lease_id`, provided the lease is still live.
    pub async fn complete(&self, queue: &str, lease_id: &str) -> Result<(), QueueError> {
        check_name(queue)?;
        let now = self.clock.now();
        let mut queues = self.queues.lock().await;
        let not_found = || QueueError::LeaseNotFound(lease_id.to_string());
        let items = queues.get_mut(queue).ok_or_else(not_found)?;

        let position = items
            .iter()
            .position(|item| item.lease.as_ref().is_some_and(|l| l.id == lease_id))
            .ok_or_else(not_found)?;

        if let Some(lease) = &items[position].lease
            && lease.expiry <= now
        {
            return Err(QueueError::LeaseExpired {
                lease_id: lease_id.to_string(),
                expiry: lease.expiry,
                now,
            });
        }

        items.remove(position);
        debug!(queue, lease_id, "completed item");
        Ok(())
    }

    pub async fn stats(&self) -> Vec<QueueStats> {
        let now = self.clock.now();
        let queues = self.queues.lock().await;
        let mut stats: Vec<QueueStats> = queues
            .iter()
            .map(|(name, items)| QueueStats {
                name: name.clone(),
                items: items.len(),
                leased: items.iter().filter(|i| !i.visible_at(now)).count(),
            })
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}
