//! Same-day income per (chain, tag)
//!
//! Attribution is non-exclusive: a trade tagged `["A", "B"]` credits its full
//! income to both A and B.

use super::types::{TagTotal, TradeRecord};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct TagProfitIndex {
    chains: BTreeMap<String, BTreeMap<String, f64>>,
}

impl TagProfitIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_trade(&mut self, trade: &TradeRecord) {
        let tags = trade.distinct_tags();
        if tags.is_empty() {
            return;
        }
        let bucket = self.chains.entry(trade.chain.clone()).or_default();
        for tag in tags {
            *bucket.entry(tag.to_string()).or_insert(0.0) += trade.income;
        }
    }

    /// Drop every chain's tag totals
    pub fn clear(&mut self) {
        self.chains.clear();
    }

    pub fn total(&self, chain: &str, tag: &str) -> Option<f64> {
        self.chains.get(chain).and_then(|tags| tags.get(tag)).copied()
    }

    pub fn totals(&self) -> Vec<TagTotal> {
        self.chains
            .iter()
            .flat_map(|(chain, tags)| {
                tags.iter().map(move |(tag, total)| TagTotal {
                    chain: chain.clone(),
                    tag: tag.clone(),
                    total: *total,
                })
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}
