//! Latest "top pools" report per chain
//!
//! Bots periodically post the pools they are watching most closely. Only the
//! newest report per chain is kept, in memory, and every update is published
//! as `topUpdate`.

use super::broadcast::{publish_json, EventBroadcaster, TOP_UPDATE};
use super::types::normalize_chain;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Report as submitted by a bot; `pools` is passed through untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopInput {
    pub chain: String,
    pub pools: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopInfo {
    pub chain: String,
    pub pools: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

pub struct TopBoard {
    latest: Mutex<BTreeMap<String, TopInfo>>,
    broadcaster: Arc<dyn EventBroadcaster>,
}

impl TopBoard {
    pub fn new(broadcaster: Arc<dyn EventBroadcaster>) -> Self {
        Self {
            latest: Mutex::new(BTreeMap::new()),
            broadcaster,
        }
    }

    /// Replace the chain's report and publish it
    pub fn update(&self, input: TopInput) -> TopInfo {
        let info = TopInfo {
            chain: normalize_chain(&input.chain),
            pools: input.pools,
            created_at: Utc::now(),
        };
        self.latest.lock().insert(info.chain.clone(), info.clone());

        publish_json(self.broadcaster.as_ref(), TOP_UPDATE, &info);
        info
    }

    pub fn get(&self, chain: &str) -> Option<TopInfo> {
        self.latest.lock().get(&normalize_chain(chain)).cloned()
    }

    /// Every chain's latest report, ordered by chain
    pub fn all(&self) -> Vec<TopInfo> {
        self.latest.lock().values().cloned().collect()
    }
}
