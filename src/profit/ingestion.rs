//! Inbound message ingestion
//!
//! Upstream bots emit one JSON object per message: a trade, a warning or a
//! top-pools report. `read_jsonl` validates lines at the boundary and forwards
//! them on an mpsc channel; `start_ingestion` drains the channel into the
//! engine and the side channels.

use super::alerts::{WarningBuffer, WarningInput};
use super::engine::ProfitEngine;
use super::error::EngineError;
use super::tops::{TopBoard, TopInput};
use super::types::{normalize_chain, TradeInput};
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

/// One upstream message
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum InboundMessage {
    Trade(TradeInput),
    Warning(WarningInput),
    Top(TopInput),
}

/// Counters reported when ingestion stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionStats {
    pub trades: u64,
    pub warnings: u64,
    pub tops: u64,
    pub rejected: u64,
}

/// Drain `rx` until every sender is dropped
///
/// A trade that fails to persist is logged and dropped; the in-memory state is
/// only touched for trades the ledger accepted.
pub async fn start_ingestion(
    mut rx: mpsc::Receiver<InboundMessage>,
    engine: Arc<ProfitEngine>,
    warnings: Arc<WarningBuffer>,
    tops: Arc<TopBoard>,
) -> IngestionStats {
    log::info!("🚀 Starting ingestion");
    log::info!("   ├─ Chains: {}", engine.chains().join(", "));
    log::info!("   └─ Waiting for messages...");

    let channel_capacity = rx.max_capacity();
    let mut totals = IngestionStats::default();
    let mut window_trades = 0u64;
    let mut last_log_time = std::time::Instant::now();
    let mut health_timer = interval(Duration::from_secs(10));

    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else {
                    log::warn!("⚠️  Inbound channel closed, stopping ingestion");
                    break;
                };
                match message {
                    InboundMessage::Trade(trade) => match engine.ingest(trade).await {
                        Ok(_) => {
                            totals.trades += 1;
                            window_trades += 1;
                        }
                        Err(EngineError::UntrackedChain(chain)) => {
                            totals.rejected += 1;
                            log::warn!("⚠️  Dropping trade for untracked chain '{}'", chain);
                        }
                        Err(e) => {
                            totals.rejected += 1;
                            log::error!("❌ Failed to record trade: {}", e);
                        }
                    },
                    InboundMessage::Warning(warning) => {
                        let stored = warnings.push(warning);
                        totals.warnings += 1;
                        log::debug!("🔔 Warning #{} [{}] {}", stored.id, stored.chain, stored.kind);
                    }
                    InboundMessage::Top(report) => {
                        let info = tops.update(report);
                        totals.tops += 1;
                        log::debug!("🏆 Top pools updated for {}", info.chain);
                    }
                }
            }

            _ = health_timer.tick() => {
                let elapsed = last_log_time.elapsed().as_secs_f64();
                if window_trades > 0 && elapsed > 0.0 {
                    log::info!(
                        "📊 Ingestion rate: {:.1} trades/sec (total: {}) | channel: {}/{}",
                        window_trades as f64 / elapsed,
                        totals.trades,
                        rx.len(),
                        channel_capacity,
                    );
                }
                if rx.len() > channel_capacity / 2 {
                    log::warn!("⚠️  Channel usage high: {}/{}", rx.len(), channel_capacity);
                }
                window_trades = 0;
                last_log_time = std::time::Instant::now();
            }
        }
    }

    log::info!(
        "✅ Ingestion stopped: {} trades, {} warnings, {} top reports, {} rejected",
        totals.trades,
        totals.warnings,
        totals.tops,
        totals.rejected,
    );
    totals
}

/// Parse and validate one line
///
/// Returns `None` for blank lines, malformed JSON, and messages naming a chain
/// outside `chains`.
pub fn parse_line(line: &str, chains: &[String]) -> Option<InboundMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let message: InboundMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => {
            log::warn!("⚠️  Skipping malformed line: {}", e);
            return None;
        }
    };

    let chain = match &message {
        InboundMessage::Trade(trade) => normalize_chain(&trade.chain),
        InboundMessage::Warning(warning) => normalize_chain(&warning.chain),
        InboundMessage::Top(report) => normalize_chain(&report.chain),
    };
    if !chains.contains(&chain) {
        log::warn!("⚠️  Skipping message for untracked chain '{}'", chain);
        return None;
    }

    Some(match message {
        InboundMessage::Trade(trade) => InboundMessage::Trade(trade.normalized()),
        other => other,
    })
}

/// Forward JSON lines from `reader` into `tx` until EOF
///
/// Returns the number of messages forwarded. Stops early if the receiver is
/// gone.
pub async fn read_jsonl<R>(
    reader: R,
    tx: mpsc::Sender<InboundMessage>,
    chains: Vec<String>,
) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0usize;

    while let Some(line) = lines.next_line().await? {
        let Some(message) = parse_line(&line, &chains) else {
            continue;
        };
        if tx.send(message).await.is_err() {
            log::warn!("⚠️  Ingestion receiver dropped, stopping reader");
            break;
        }
        forwarded += 1;
    }

    log::info!("📥 Input reader finished ({} messages)", forwarded);
    Ok(forwarded)
}
