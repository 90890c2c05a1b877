//! Runtime configuration from environment variables

use super::types::normalize_chain;
use super::windows::RetentionPolicy;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CHAINS: &str = "bsc,sol,eth,sui";

/// Configuration for the profit runtime
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// Tracked chains, normalized and deduplicated, in configured order
    pub chains: Vec<String>,

    /// Period of the snapshot upsert task
    pub snapshot_interval_secs: u64,

    pub trade_retention_days: i64,

    pub snapshot_retention_months: u32,

    /// Events buffered per broadcast subscriber before it starts lagging
    pub broadcast_capacity: usize,

    /// Inbound message channel buffer
    pub channel_buffer: usize,

    /// Number of warnings kept in memory
    pub warning_buffer_size: usize,
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `ARBWATCH_DB_PATH` (default: arb_bots.db)
    /// - `ARBWATCH_CHAINS` (default: bsc,sol,eth,sui)
    /// - `SNAPSHOT_INTERVAL_SECS` (default: 60)
    /// - `TRADE_RETENTION_DAYS` (default: 14)
    /// - `SNAPSHOT_RETENTION_MONTHS` (default: 2)
    /// - `BROADCAST_CAPACITY` (default: 1024)
    /// - `INGEST_CHANNEL_BUFFER` (default: 10000)
    /// - `WARNING_BUFFER_SIZE` (default: 1000)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            db_path: lookup("ARBWATCH_DB_PATH").unwrap_or_else(|| "arb_bots.db".to_string()),

            chains: parse_chains(&lookup("ARBWATCH_CHAINS").unwrap_or_else(|| DEFAULT_CHAINS.to_string())),

            snapshot_interval_secs: parse_var(&lookup, "SNAPSHOT_INTERVAL_SECS")
                .filter(|secs: &u64| *secs > 0)
                .unwrap_or(60),

            trade_retention_days: parse_var(&lookup, "TRADE_RETENTION_DAYS")
                .filter(|days: &i64| *days > 0)
                .unwrap_or(14),

            snapshot_retention_months: parse_var(&lookup, "SNAPSHOT_RETENTION_MONTHS")
                .filter(|months: &u32| *months > 0)
                .unwrap_or(2),

            broadcast_capacity: parse_var(&lookup, "BROADCAST_CAPACITY").unwrap_or(1024),

            channel_buffer: parse_var(&lookup, "INGEST_CHANNEL_BUFFER")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(10_000),

            warning_buffer_size: parse_var(&lookup, "WARNING_BUFFER_SIZE").unwrap_or(1000),
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            trade_days: self.trade_retention_days,
            snapshot_months: self.snapshot_retention_months,
        }
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|s| s.trim().parse().ok())
}

/// Comma-separated chain list; falls back to the defaults if nothing usable is left
fn parse_chains(raw: &str) -> Vec<String> {
    let mut chains: Vec<String> = Vec::new();
    for chain in raw.split(',').map(normalize_chain) {
        if !chain.is_empty() && !chains.contains(&chain) {
            chains.push(chain);
        }
    }
    if chains.is_empty() && raw != DEFAULT_CHAINS {
        return parse_chains(DEFAULT_CHAINS);
    }
    chains
}
