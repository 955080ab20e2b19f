// =============================================================================
// Journal — append-only fill/equity tapes plus the per-symbol UI snapshot
// =============================================================================
//
// Two different persistence styles live side by side here, matching the
// distinction drawn for the runtime config and the sizing debug tape:
// fills and equity marks are append-only JSON Lines (never rewritten, so a
// tailing process can follow them), while the per-symbol snapshot is a
// small JSON document rewritten atomically every tick, the same tmp+rename
// pattern `RuntimeConfig::save` uses.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cooldown::CooldownJournalEntry;
use crate::types::OrderUpdate;

fn append_jsonl(path: impl AsRef<Path>, line: &str) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open journal at {}", path.display()))?;
    writeln!(file, "{line}").with_context(|| format!("failed to append to journal at {}", path.display()))?;
    Ok(())
}

pub fn append_fill(path: impl AsRef<Path>, update: &OrderUpdate) -> Result<()> {
    let line = serde_json::to_string(update).context("failed to serialise fill")?;
    append_jsonl(path, &line)
}

#[derive(Debug, Clone, Serialize)]
pub struct EquityMark {
    pub ts_ms: i64,
    pub equity: f64,
    pub realized_pnl_today: f64,
}

pub fn append_equity_mark(path: impl AsRef<Path>, mark: &EquityMark) -> Result<()> {
    let line = serde_json::to_string(mark).context("failed to serialise equity mark")?;
    append_jsonl(path, &line)
}

pub fn append_cooldown_entry(path: impl AsRef<Path>, entry: &CooldownJournalEntry) -> Result<()> {
    let line = serde_json::to_string(entry).context("failed to serialise cooldown entry")?;
    append_jsonl(path, &line)
}

/// Per-(venue, symbol) snapshot consumed by any external dashboard; holds
/// the latest decision and position state for that pair.
#[derive(Debug, Clone, Serialize)]
pub struct BotSnapshot {
    pub venue: String,
    pub symbol: String,
    pub trading_mode: String,
    pub last_decision: String,
    pub hold_reason: Option<String>,
    pub open_side: Option<String>,
    pub open_qty: f64,
    pub avg_entry_price: f64,
    pub unrealized_pnl: f64,
    pub composite_score: f64,
    pub ts_ms: i64,
}

pub fn write_bot_snapshot(dir: impl AsRef<Path>, snapshot: &BotSnapshot) -> Result<()> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir).ok();
    let path = dir.join(format!("{}_{}.json", snapshot.venue, snapshot.symbol));
    let content = serde_json::to_string_pretty(snapshot).context("failed to serialise bot snapshot")?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &content)
        .with_context(|| format!("failed to write tmp bot snapshot to {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, &path)
        .with_context(|| format!("failed to rename tmp bot snapshot to {}", path.display()))?;
    Ok(())
}
