use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::core::protocol::{BucketEvent, WebsocketEvent};

pub const DEFAULT_CAPACITY: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEvent {
    ApiCall {
        api: String,
        method: String,
        path: String,
        status: u16,
    },
    TopicPublish {
        topic: String,
        message_id: String,
        delivered: usize,
        failed: usize,
    },
    ScheduleFire {
        schedule: String,
        success: bool,
    },
    BucketNotification {
        bucket: String,
        key: String,
        event: BucketEvent,
        delivered: usize,
        failed: usize,
    },
    WebsocketEvent {
        socket: String,
        connection_id: String,
        event: WebsocketEvent,
        success: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: HistoryEvent,
}

/// Append-only ring of recent trigger activity. Oldest records fall off once
/// `capacity` is reached.
pub struct History {
    capacity: usize,
    records: Mutex<VecDeque<HistoryRecord>>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record(&self, event: HistoryEvent) {
        let record = HistoryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event,
        };
        let mut records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Newest first, at most `limit` records.
    pub fn recent(&self, limit: usize) -> Vec<HistoryRecord> {
        let records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        records.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
