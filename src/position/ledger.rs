// =============================================================================
// Position ledger — average-cost accounting with long/short flips
// =============================================================================
//
// An RwLock-guarded map behind a handful of methods, persisted with the
// same atomic tmp + rename save the runtime config uses. Stop and
// trailing-stop state lives in the exit manager, not here; this ledger's
// only job is turning a stream of fills into an accurate average-cost
// position per symbol, exactly mirroring what a broker's own position
// endpoint would report.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    fn from_order_side(side: Side) -> Self {
        match side {
            Side::Buy => Self::Long,
            Side::Sell => Self::Short,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub qty: f64,
    pub avg_entry_price: f64,
    pub high_water: f64,
    pub low_water: f64,
    pub realized_pnl: f64,
    pub realized_pnl_net: f64,
    pub fee_paid: f64,
    pub updated_at: i64,
}

impl Position {
    fn new(symbol: &str, side: PositionSide, qty: f64, price: f64, now_ms: i64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            qty,
            avg_entry_price: price,
            high_water: price,
            low_water: price,
            realized_pnl: 0.0,
            realized_pnl_net: 0.0,
            fee_paid: 0.0,
            updated_at: now_ms,
        }
    }

    fn signed_pnl(&self, exit_price: f64, qty: f64) -> f64 {
        match self.side {
            PositionSide::Long => (exit_price - self.avg_entry_price) * qty,
            PositionSide::Short => (self.avg_entry_price - exit_price) * qty,
        }
    }

    /// Push the watermark that matters for this side's trailing-stop check:
    /// the running high for a long, the running low for a short.
    fn touch_watermark(&mut self, price: f64) {
        match self.side {
            PositionSide::Long => self.high_water = self.high_water.max(price),
            PositionSide::Short => self.low_water = self.low_water.min(price),
        }
    }
}

/// Outcome of applying a single fill to the ledger.
#[derive(Debug, Clone, Copy)]
pub struct FillOutcome {
    pub realized_pnl: f64,
    pub closed: bool,
    pub flipped: bool,
}

pub struct PositionLedger {
    positions: RwLock<HashMap<String, Position>>,
    persist_path: Option<PathBuf>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self { positions: RwLock::new(HashMap::new()), persist_path: None }
    }

    /// Same as `new`, but every mutation immediately persists to `path`
    /// rather than waiting for an explicit `save` call, so a crash between
    /// ticks loses at most the in-flight fill.
    pub fn with_persist_path(path: impl Into<PathBuf>) -> Self {
        Self { positions: RwLock::new(HashMap::new()), persist_path: Some(path.into()) }
    }

    fn persist(&self) {
        if let Some(path) = &self.persist_path {
            if let Err(err) = self.save(path) {
                warn!(error = %err, path = %path.display(), "failed to persist position ledger");
            }
        }
    }

    pub fn get(&self, symbol: &str) -> Option<Position> {
        self.positions.read().get(symbol).cloned()
    }

    pub fn all(&self) -> Vec<Position> {
        self.positions.read().values().cloned().collect()
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.read().contains_key(symbol)
    }

    /// Apply a fill for `symbol` with `fill_side`/`fill_qty`/`fill_price`/`fee`.
    /// Implements the four cases of average-cost accounting with flips:
    ///
    /// 1. No existing position: open a new one.
    /// 2. Same-direction fill: weighted-average the entry price in.
    /// 3. Opposite-direction fill smaller than the open size: partial close,
    ///    realize pnl on the closed portion, keep the remainder open.
    /// 4. Opposite-direction fill at least as large as the open size: close
    ///    the position fully and flip any excess into a new position on the
    ///    other side at the fill price.
    ///
    /// Every branch folds `fee` into `fee_paid` and `realized_pnl_net` so the
    /// net figure always reflects realized pnl less every fee charged
    /// against this symbol, including fees paid while opening or averaging
    /// in (which realize nothing on their own).
    pub fn apply_fill(&self, symbol: &str, fill_side: Side, fill_qty: f64, fill_price: f64, fee: f64, now_ms: i64) -> FillOutcome {
        let fill_pos_side = PositionSide::from_order_side(fill_side);
        let mut map = self.positions.write();

        let outcome = match map.get(symbol).cloned() {
            None => {
                let mut pos = Position::new(symbol, fill_pos_side, fill_qty, fill_price, now_ms);
                pos.fee_paid += fee;
                pos.realized_pnl_net -= fee;
                map.insert(symbol.to_string(), pos);
                FillOutcome { realized_pnl: 0.0, closed: false, flipped: false }
            }
            Some(mut pos) if pos.side == fill_pos_side => {
                let new_qty = pos.qty + fill_qty;
                pos.avg_entry_price = (pos.avg_entry_price * pos.qty + fill_price * fill_qty) / new_qty;
                pos.qty = new_qty;
                pos.touch_watermark(fill_price);
                pos.fee_paid += fee;
                pos.realized_pnl_net -= fee;
                pos.updated_at = now_ms;
                map.insert(symbol.to_string(), pos);
                FillOutcome { realized_pnl: 0.0, closed: false, flipped: false }
            }
            Some(mut pos) if fill_qty < pos.qty => {
                let realized = pos.signed_pnl(fill_price, fill_qty);
                pos.qty -= fill_qty;
                pos.realized_pnl += realized;
                pos.realized_pnl_net += realized - fee;
                pos.fee_paid += fee;
                pos.updated_at = now_ms;
                map.insert(symbol.to_string(), pos);
                FillOutcome { realized_pnl: realized, closed: false, flipped: false }
            }
            Some(pos) => {
                let realized = pos.signed_pnl(fill_price, pos.qty);
                let excess = fill_qty - pos.qty;
                if excess > 1e-12 {
                    let mut flipped = Position::new(symbol, fill_pos_side, excess, fill_price, now_ms);
                    flipped.realized_pnl += realized;
                    flipped.realized_pnl_net += realized - fee;
                    flipped.fee_paid += fee;
                    map.insert(symbol.to_string(), flipped);
                    FillOutcome { realized_pnl: realized, closed: true, flipped: true }
                } else {
                    map.remove(symbol);
                    FillOutcome { realized_pnl: realized, closed: true, flipped: false }
                }
            }
        };
        drop(map);
        self.persist();
        outcome
    }

    /// Push the current price onto the open position's watermark, per side.
    /// A no-op when the symbol is flat.
    pub fn update_mark(&self, symbol: &str, price: f64, now_ms: i64) {
        let mut map = self.positions.write();
        let touched = if let Some(pos) = map.get_mut(symbol) {
            pos.touch_watermark(price);
            pos.updated_at = now_ms;
            true
        } else {
            false
        };
        drop(map);
        if touched {
            self.persist();
        }
    }

    pub fn unrealized_pnl(&self, symbol: &str, mark_price: f64) -> f64 {
        match self.get(symbol) {
            Some(pos) => pos.signed_pnl(mark_price, pos.qty),
            None => 0.0,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let snapshot: Vec<Position> = self.all();
        let content = serde_json::to_string_pretty(&snapshot).context("failed to serialise positions")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp positions to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp positions to {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read positions from {}", path.display()))?;
        let entries: Vec<Position> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse positions from {}", path.display()))?;
        let map = entries.into_iter().map(|p| (p.symbol.clone(), p)).collect();
        Ok(Self { positions: RwLock::new(map), persist_path: Some(path.to_path_buf()) })
    }
}
