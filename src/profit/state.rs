//! In-memory profit state container
//!
//! `ProfitBook` owns the profit cache and the tag index together so that a
//! trade is applied to both under one lock, and a reconciled replacement can be
//! swapped in as a single value.

use super::cache::ProfitCache;
use super::tags::TagProfitIndex;
use super::types::{ProfitWindowStats, TradeRecord};
use chrono::NaiveDate;

#[derive(Debug, Clone)]
pub struct ProfitBook {
    /// Local date the windows were reconciled for
    day: NaiveDate,
    pub cache: ProfitCache,
    pub tags: TagProfitIndex,
}

impl ProfitBook {
    pub fn new(chains: &[String], day: NaiveDate) -> Self {
        Self {
            day,
            cache: ProfitCache::new(chains),
            tags: TagProfitIndex::new(),
        }
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    /// Apply a durably recorded trade to both the cache and the tag index
    ///
    /// Untracked chains touch neither. Returns the chain's new `today.tx_count`.
    pub fn record_trade(&mut self, trade: &TradeRecord) -> Option<u64> {
        let tx_count = self.cache.record_trade(trade)?;
        self.tags.record_trade(trade);
        Some(tx_count)
    }

    pub fn snapshot(&self, chain: &str) -> Option<ProfitWindowStats> {
        self.cache.snapshot(chain)
    }
}
