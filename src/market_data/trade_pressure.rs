// =============================================================================
// Trade pressure book — rolling taker buy/sell volume over a short window
// =============================================================================
//
// Every fill updates a per-symbol aggregate behind a lock, and old fills
// are trimmed by wall clock rather than by count. The window is fixed
// (15s) and the book keeps the raw fill queue so it can re-derive the
// aggregate on every trim instead of carrying a decaying running total.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

const WINDOW_SEC: i64 = 15;

#[derive(Debug, Clone, Copy)]
struct Fill {
    ts_ms: i64,
    qty: f64,
    notional: f64,
    is_buy: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PressureSnapshot {
    pub buy_notional: f64,
    pub sell_notional: f64,
    pub trade_count: u32,
    pub large_trade_count: u32,
}

impl PressureSnapshot {
    pub fn total_notional(&self) -> f64 {
        self.buy_notional + self.sell_notional
    }

    /// Taker-buy share in `[0, 1]`; `0.5` when the window is empty.
    pub fn buy_share(&self) -> f64 {
        let total = self.total_notional();
        if total <= 0.0 {
            0.5
        } else {
            self.buy_notional / total
        }
    }

    pub fn large_share(&self) -> f64 {
        if self.trade_count == 0 {
            0.0
        } else {
            self.large_trade_count as f64 / self.trade_count as f64
        }
    }
}

pub struct TradePressureBook {
    fills: RwLock<HashMap<String, VecDeque<Fill>>>,
    large_notional_threshold: f64,
}

impl TradePressureBook {
    pub fn new(large_notional_threshold: f64) -> Self {
        Self {
            fills: RwLock::new(HashMap::new()),
            large_notional_threshold,
        }
    }

    pub fn record_trade(&self, symbol: &str, ts_ms: i64, price: f64, qty: f64, is_buyer_maker: bool) {
        let notional = price * qty;
        // is_buyer_maker=true means the resting order was a buy, so the
        // aggressor (the taker) sold.
        let is_buy = !is_buyer_maker;

        let mut map = self.fills.write();
        let queue = map.entry(symbol.to_string()).or_default();
        queue.push_back(Fill { ts_ms, qty, notional, is_buy });
        Self::trim(queue, ts_ms);
    }

    fn trim(queue: &mut VecDeque<Fill>, now_ms: i64) {
        let cutoff = now_ms - WINDOW_SEC * 1000;
        while let Some(front) = queue.front() {
            if front.ts_ms < cutoff {
                queue.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn snapshot(&self, symbol: &str, now_ms: i64) -> PressureSnapshot {
        let mut map = self.fills.write();
        let Some(queue) = map.get_mut(symbol) else {
            return PressureSnapshot::default();
        };
        Self::trim(queue, now_ms);

        let mut snap = PressureSnapshot::default();
        for fill in queue.iter() {
            if fill.is_buy {
                snap.buy_notional += fill.notional;
            } else {
                snap.sell_notional += fill.notional;
            }
            snap.trade_count += 1;
            if fill.notional >= self.large_notional_threshold {
                snap.large_trade_count += 1;
            }
        }
        snap
    }
}
