//! # Profit Aggregation Engine
//!
//! Keeps per-chain profit windows for the arbitrage bot dashboard:
//! - Records every trade durably before it is counted
//! - Maintains today / yesterday / this week / last week / this month / last
//!   month totals per chain, plus same-day income per (chain, tag)
//! - Persists `today` into one daily snapshot row per chain every minute
//! - Rolls over at local midnight: retention cleanup, then a full rebuild
//!
//! ## Data Flow
//!
//! ```text
//! bots ──JSONL──▶ ingestion ──▶ ProfitEngine ──▶ Ledger (trade_info)
//!                                   │
//!                                   ├──▶ ProfitBook (cache + tag index)
//!                                   └──▶ EventBroadcaster ──▶ dashboard
//!
//! scheduler ── every minute ──▶ ProfitEngine::persist_snapshots ──▶ profit_snapshots
//!           ── at midnight ───▶ ProfitEngine::run_rollover ──▶ StatsReconciler
//! ```
//!
//! ## Schema Reference
//!
//! Tables are created from `/sql/` on startup:
//! - `trade_info` → `TradeRecord`
//! - `profit_snapshots` → `ProfitSnapshotRow`
//!
//! ## Module Organization
//!
//! - `types` - Core data structures (TradeInput, TradeRecord, ProfitInfo)
//! - `windows` - Calendar window boundaries and retention cutoffs
//! - `cache` / `tags` - In-memory aggregates
//! - `state` - `ProfitBook`, the container swapped on rebuild
//! - `db` - `Ledger` trait and SQLite implementation
//! - `reconciler` - Rebuilds state from the ledger
//! - `engine` - `ProfitEngine`
//! - `scheduler` - Snapshot and rollover tasks
//! - `ingestion` - Inbound channel processing
//! - `broadcast` / `alerts` / `tops` - Dashboard events, warnings and the
//!   latest top-pools report per chain

pub mod alerts;
pub mod broadcast;
pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod ingestion;
pub mod reconciler;
pub mod scheduler;
pub mod state;
pub mod tags;
pub mod tops;
pub mod types;
pub mod windows;

// Re-export commonly used types
pub use alerts::{Warning, WarningBuffer, WarningInput};
pub use broadcast::{BroadcastEvent, ChannelBroadcaster, EventBroadcaster};
pub use cache::ProfitCache;
pub use config::EngineConfig;
pub use db::{Ledger, SortField, SortOrder, SqliteLedger, TradeQuery};
pub use engine::{EngineOptions, ProfitEngine, RolloverReport};
pub use error::{EngineError, LedgerError};
pub use ingestion::InboundMessage;
pub use reconciler::StatsReconciler;
pub use state::ProfitBook;
pub use tags::TagProfitIndex;
pub use tops::{TopBoard, TopInfo, TopInput};
pub use types::{
    ChainProfit, ProfitInfo, ProfitSnapshotRow, ProfitSummary, ProfitWindowStats, TagTotal,
    TradeInput, TradeRecord, WelcomeInfo,
};
