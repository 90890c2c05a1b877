//! Bounded in-memory buffer of operator warnings
//!
//! Warnings are not persisted. Deleting only hides a warning from `recent`;
//! ids keep increasing across evictions.

use super::broadcast::{publish_json, EventBroadcaster, NEW_WARNING};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Warning as submitted by a bot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningInput {
    #[serde(rename = "type")]
    pub kind: String,
    pub msg: String,
    pub chain: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warning {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    pub msg: String,
    pub chain: String,
    pub deleted: bool,
}

struct WarningLog {
    next_id: u64,
    entries: VecDeque<Warning>,
}

pub struct WarningBuffer {
    capacity: usize,
    log: Mutex<WarningLog>,
    broadcaster: Arc<dyn EventBroadcaster>,
}

impl WarningBuffer {
    pub fn new(capacity: usize, broadcaster: Arc<dyn EventBroadcaster>) -> Self {
        Self {
            capacity: capacity.max(1),
            log: Mutex::new(WarningLog {
                next_id: 1,
                entries: VecDeque::new(),
            }),
            broadcaster,
        }
    }

    /// Store a warning, evicting the oldest past capacity, and publish it
    pub fn push(&self, input: WarningInput) -> Warning {
        let warning = {
            let mut log = self.log.lock();
            let warning = Warning {
                id: log.next_id,
                created_at: Utc::now(),
                kind: input.kind,
                msg: input.msg,
                chain: input.chain.to_lowercase(),
                deleted: false,
            };
            log.next_id += 1;
            log.entries.push_back(warning.clone());
            while log.entries.len() > self.capacity {
                log.entries.pop_front();
            }
            warning
        };

        publish_json(self.broadcaster.as_ref(), NEW_WARNING, &warning);
        warning
    }

    /// Soft-delete by id; false if the id is unknown or already evicted
    pub fn delete(&self, id: u64) -> bool {
        let mut log = self.log.lock();
        match log.entries.iter_mut().find(|w| w.id == id) {
            Some(warning) => {
                warning.deleted = true;
                true
            }
            None => false,
        }
    }

    /// Up to `limit` non-deleted warnings, newest first
    pub fn recent(&self, limit: usize) -> Vec<Warning> {
        let log = self.log.lock();
        log.entries
            .iter()
            .rev()
            .filter(|w| !w.deleted)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.log.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
