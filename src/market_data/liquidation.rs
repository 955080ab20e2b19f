// =============================================================================
// Liquidation cluster book — forced-liquidation notional bucketed by price
// =============================================================================
//
// Same rolling-window shape as the pressure book (raw events, trimmed by
// wall clock), but events are additionally bucketed by price so the entry
// pipeline can tell a cluster of liquidations near the current price from
// liquidations scattered far away.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

const WINDOW_SEC: i64 = 30;
const BUCKET_BPS: f64 = 10.0;

#[derive(Debug, Clone, Copy)]
struct LiqEvent {
    ts_ms: i64,
    price: f64,
    notional: f64,
    is_buy_side: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LiquidationSnapshot {
    pub total_notional: f64,
    pub buy_side_notional: f64,
    pub sell_side_notional: f64,
    pub near_price_notional: f64,
    pub event_count: u32,
    /// Price of the BUY-side bucket carrying the most notional, if any.
    pub top_buy_bucket_price: Option<f64>,
    /// Price of the SELL-side bucket carrying the most notional, if any.
    pub top_sell_bucket_price: Option<f64>,
}

pub struct LiquidationClusterBook {
    events: RwLock<HashMap<String, VecDeque<LiqEvent>>>,
}

impl LiquidationClusterBook {
    pub fn new() -> Self {
        Self { events: RwLock::new(HashMap::new()) }
    }

    pub fn record_liquidation(&self, symbol: &str, ts_ms: i64, price: f64, qty: f64, is_buy_side: bool) {
        let mut map = self.events.write();
        let queue = map.entry(symbol.to_string()).or_default();
        queue.push_back(LiqEvent { ts_ms, price, notional: price * qty, is_buy_side });
        Self::trim(queue, ts_ms);
    }

    fn trim(queue: &mut VecDeque<LiqEvent>, now_ms: i64) {
        let cutoff = now_ms - WINDOW_SEC * 1000;
        while let Some(front) = queue.front() {
            if front.ts_ms < cutoff {
                queue.pop_front();
            } else {
                break;
            }
        }
    }

    /// `reference_price` is the current mark/last price; liquidations
    /// within `BUCKET_BPS` of it count as "near price".
    pub fn snapshot(&self, symbol: &str, now_ms: i64, reference_price: f64) -> LiquidationSnapshot {
        let mut map = self.events.write();
        let Some(queue) = map.get_mut(symbol) else {
            return LiquidationSnapshot::default();
        };
        Self::trim(queue, now_ms);

        let bucket_width = reference_price * BUCKET_BPS / 10_000.0;
        let mut snap = LiquidationSnapshot::default();
        let mut buy_buckets: HashMap<i64, f64> = HashMap::new();
        let mut sell_buckets: HashMap<i64, f64> = HashMap::new();
        for event in queue.iter() {
            snap.total_notional += event.notional;
            if event.is_buy_side {
                snap.buy_side_notional += event.notional;
            } else {
                snap.sell_side_notional += event.notional;
            }
            snap.event_count += 1;
            if bucket_width > 0.0 && (event.price - reference_price).abs() <= bucket_width {
                snap.near_price_notional += event.notional;
            }

            if bucket_width <= 0.0 {
                continue;
            }
            let bucket_key = (event.price / bucket_width).round() as i64;
            let target = if event.is_buy_side { &mut buy_buckets } else { &mut sell_buckets };
            *target.entry(bucket_key).or_insert(0.0) += event.notional;
        }

        snap.top_buy_bucket_price = argmax_bucket_price(&buy_buckets, bucket_width);
        snap.top_sell_bucket_price = argmax_bucket_price(&sell_buckets, bucket_width);
        snap
    }

    /// The top liquidation-cluster price for `is_buy_side`, used as a limit
    /// price hint for the IOC ladder: forced buys cluster at short
    /// liquidation zones, and vice versa.
    pub fn hint_price_for_side(&self, symbol: &str, now_ms: i64, reference_price: f64, is_buy_side: bool) -> Option<f64> {
        let snap = self.snapshot(symbol, now_ms, reference_price);
        if is_buy_side { snap.top_buy_bucket_price } else { snap.top_sell_bucket_price }
    }
}

fn argmax_bucket_price(buckets: &HashMap<i64, f64>, bucket_width: f64) -> Option<f64> {
    if bucket_width <= 0.0 {
        return None;
    }
    buckets
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(key, _)| *key as f64 * bucket_width)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_outside_window_are_dropped() {
        let book = LiquidationClusterBook::new();
        book.record_liquidation("BTCUSDT", 0, 100.0, 1.0, true);
        let snap = book.snapshot("BTCUSDT", WINDOW_SEC * 1000 + 1, 100.0);
        assert_eq!(snap.event_count, 0);
    }

    #[test]
    fn near_price_bucket_excludes_far_events() {
        let book = LiquidationClusterBook::new();
        book.record_liquidation("BTCUSDT", 0, 100.0, 1.0, true); // at price
        book.record_liquidation("BTCUSDT", 0, 120.0, 1.0, true); // far away
        let snap = book.snapshot("BTCUSDT", 0, 100.0);
        assert_eq!(snap.event_count, 2);
        assert!((snap.near_price_notional - 100.0).abs() < 1e-6);
    }

    #[test]
    fn buy_and_sell_side_notional_tracked_separately() {
        let book = LiquidationClusterBook::new();
        book.record_liquidation("BTCUSDT", 0, 100.0, 2.0, true);
        book.record_liquidation("BTCUSDT", 0, 100.0, 3.0, false);
        let snap = book.snapshot("BTCUSDT", 0, 100.0);
        assert!((snap.buy_side_notional - 200.0).abs() < 1e-6);
        assert!((snap.sell_side_notional - 300.0).abs() < 1e-6);
    }

    #[test]
    fn hint_price_picks_the_heaviest_buy_side_cluster() {
        let book = LiquidationClusterBook::new();
        // A small cluster right at price, and a much heavier one further out.
        book.record_liquidation("BTCUSDT", 0, 100.0, 1.0, true);
        book.record_liquidation("BTCUSDT", 0, 102.0, 1.0, true);
        book.record_liquidation("BTCUSDT", 0, 102.0, 1.0, true);
        book.record_liquidation("BTCUSDT", 0, 102.0, 1.0, true);
        let hint = book.hint_price_for_side("BTCUSDT", 0, 100.0, true);
        assert!(hint.is_some());
        assert!((hint.unwrap() - 102.0).abs() < 0.5);
    }

    #[test]
    fn hint_price_is_none_with_no_events_on_that_side() {
        let book = LiquidationClusterBook::new();
        book.record_liquidation("BTCUSDT", 0, 100.0, 1.0, true);
        assert!(book.hint_price_for_side("BTCUSDT", 0, 100.0, false).is_none());
    }
}
