//! Per-chain six-window profit cache
//!
//! Only `today` moves between reconciliations. Yesterday/week/month boundaries
//! are advanced exclusively by installing a freshly reconciled cache, never by
//! `record_trade`.

use super::types::{ProfitWindowStats, TradeRecord};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ProfitCache {
    /// Tracked chains in configured order
    order: Vec<String>,
    stats: HashMap<String, ProfitWindowStats>,
}

impl ProfitCache {
    /// Zeroed stats for every tracked chain
    pub fn new(chains: &[String]) -> Self {
        let mut cache = Self::default();
        for chain in chains {
            if !cache.stats.contains_key(chain) {
                cache.order.push(chain.clone());
                cache.stats.insert(chain.clone(), ProfitWindowStats::default());
            }
        }
        cache
    }

    /// Replace a chain's stats wholesale (reconciliation only)
    pub fn install(&mut self, chain: &str, stats: ProfitWindowStats) {
        if let Some(slot) = self.stats.get_mut(chain) {
            *slot = stats;
        }
    }

    /// Add a trade to its chain's `today` window
    ///
    /// Returns the chain's updated `today.tx_count`, or `None` if the chain is
    /// not tracked (the trade is ignored).
    pub fn record_trade(&mut self, trade: &TradeRecord) -> Option<u64> {
        let stats = self.stats.get_mut(&trade.chain)?;
        stats.today.add_trade(trade.gross, trade.income);
        Some(stats.today.tx_count)
    }

    /// Copy of a chain's six windows
    pub fn snapshot(&self, chain: &str) -> Option<ProfitWindowStats> {
        self.stats.get(chain).copied()
    }

    pub fn is_tracked(&self, chain: &str) -> bool {
        self.stats.contains_key(chain)
    }

    pub fn chains(&self) -> &[String] {
        &self.order
    }

    /// All chains with their stats, in configured order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ProfitWindowStats)> {
        self.order
            .iter()
            .filter_map(move |chain| self.stats.get(chain).map(|s| (chain.as_str(), s)))
    }
}
