//! Core data structures for the profit engine
//!
//! Serialized field names are camelCase to match the dashboard payloads
//! (`txCount`, `thisWeek`, `extraInfo`, ...).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Trade as received from the upstream boundary, before it is persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeInput {
    pub chain: String,
    pub builder: String,
    pub hash: String,
    #[serde(default, alias = "vicHashes")]
    pub victim_hashes: Vec<String>,
    pub gross: f64,
    pub bribe: f64,
    pub income: f64,
    pub ratio: f64,
    #[serde(default)]
    pub extra_info: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TradeInput {
    /// Lowercases and trims the chain name
    pub fn normalized(mut self) -> Self {
        self.chain = normalize_chain(&self.chain);
        self
    }
}

/// Canonical chain key: trimmed, lowercase
pub fn normalize_chain(chain: &str) -> String {
    chain.trim().to_lowercase()
}

/// Persisted trade. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub id: i64,
    pub chain: String,
    pub builder: String,
    pub hash: String,
    pub victim_hashes: Vec<String>,
    pub gross: f64,
    pub bribe: f64,
    pub income: f64,
    pub ratio: f64,
    pub extra_info: String,
    pub tags: Vec<String>,
    /// Unix timestamp (seconds)
    pub created_at: i64,
}

impl TradeRecord {
    pub fn from_input(input: &TradeInput, id: i64, created_at: i64) -> Self {
        Self {
            id,
            chain: input.chain.clone(),
            builder: input.builder.clone(),
            hash: input.hash.clone(),
            victim_hashes: input.victim_hashes.clone(),
            gross: input.gross,
            bribe: input.bribe,
            income: input.income,
            ratio: input.ratio,
            extra_info: input.extra_info.clone(),
            tags: input.tags.clone(),
            created_at,
        }
    }

    /// Distinct, non-empty tags in first-seen order
    pub fn distinct_tags(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::with_capacity(self.tags.len());
        for tag in &self.tags {
            let tag = tag.as_str();
            if !tag.is_empty() && !seen.contains(&tag) {
                seen.push(tag);
            }
        }
        seen
    }
}

/// Persisted daily aggregate, one per (chain, day)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfitSnapshotRow {
    pub chain: String,
    pub day: NaiveDate,
    pub gross: f64,
    pub income: f64,
    pub tx_count: u64,
}

impl ProfitSnapshotRow {
    pub fn new(chain: &str, day: NaiveDate, info: ProfitInfo) -> Self {
        Self {
            chain: chain.to_string(),
            day,
            gross: info.gross,
            income: info.income,
            tx_count: info.tx_count,
        }
    }
}

/// Totals for a single window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfitInfo {
    pub gross: f64,
    pub income: f64,
    pub tx_count: u64,
}

impl ProfitInfo {
    pub fn add_trade(&mut self, gross: f64, income: f64) {
        self.gross += gross;
        self.income += income;
        self.tx_count += 1;
    }

    pub fn from_trades<'a>(trades: impl IntoIterator<Item = &'a TradeRecord>) -> Self {
        let mut info = Self::default();
        for trade in trades {
            info.add_trade(trade.gross, trade.income);
        }
        info
    }

    pub fn from_snapshots<'a>(rows: impl IntoIterator<Item = &'a ProfitSnapshotRow>) -> Self {
        rows.into_iter().fold(Self::default(), |mut acc, row| {
            acc.gross += row.gross;
            acc.income += row.income;
            acc.tx_count += row.tx_count;
            acc
        })
    }

    /// Swap the `old` share of these totals for `new`
    pub fn replace_part(self, old: ProfitInfo, new: ProfitInfo) -> Self {
        Self {
            gross: self.gross - old.gross + new.gross,
            income: self.income - old.income + new.income,
            tx_count: self.tx_count.saturating_sub(old.tx_count) + new.tx_count,
        }
    }

    /// income / gross, or 0 when nothing was grossed
    pub fn ratio(&self) -> f64 {
        if self.gross == 0.0 {
            0.0
        } else {
            self.income / self.gross
        }
    }
}

/// The six rolling windows kept per chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfitWindowStats {
    pub today: ProfitInfo,
    pub yesterday: ProfitInfo,
    pub this_week: ProfitInfo,
    pub last_week: ProfitInfo,
    pub this_month: ProfitInfo,
    pub last_month: ProfitInfo,
}

/// Flattened tag-income entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagTotal {
    pub chain: String,
    pub tag: String,
    pub total: f64,
}

/// `profitUpdate` entry: a chain with all six windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainProfit {
    pub chain: String,
    #[serde(flatten)]
    pub stats: ProfitWindowStats,
}

/// `welcomeUpdate` entry: today's headline numbers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeInfo {
    pub chain: String,
    pub income: f64,
    pub tx_count: u64,
}

/// Income per window with today's income/gross ratio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfitSummary {
    pub chain: String,
    pub day: f64,
    pub day_ratio: f64,
    pub week: f64,
    pub last_week: f64,
    pub month: f64,
    pub last_month: f64,
}

impl ProfitSummary {
    pub fn from_stats(chain: &str, stats: &ProfitWindowStats) -> Self {
        Self {
            chain: chain.to_string(),
            day: stats.today.income,
            day_ratio: stats.today.ratio(),
            week: stats.this_week.income,
            last_week: stats.last_week.income,
            month: stats.this_month.income,
            last_month: stats.last_month.income,
        }
    }
}

/// `newTrade` payload: the stored trade plus its chain's updated `today.txCount`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTradeNotice {
    #[serde(flatten)]
    pub trade: TradeRecord,
    pub tx_count: u64,
}
