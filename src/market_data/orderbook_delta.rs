// =============================================================================
// Orderbook delta book — best bid/ask depth, imbalance, and its change
// =============================================================================
//
// Tracks best bid/ask depth and imbalance per symbol, remembering the
// previous snapshot's imbalance so the entry pipeline can score the
// *change* in imbalance (imbalance_delta) rather than only its level.

use std::collections::HashMap;

use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, Default)]
pub struct OrderbookSnapshot {
    pub best_bid: f64,
    pub best_ask: f64,
    pub bid_depth: f64,
    pub ask_depth: f64,
    pub spread_bps: f64,
    pub imbalance: f64,
    pub imbalance_delta: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct BookState {
    best_bid: f64,
    best_ask: f64,
    bid_depth: f64,
    ask_depth: f64,
    prev_imbalance: f64,
    has_prev: bool,
}

pub struct OrderbookDeltaBook {
    books: RwLock<HashMap<String, BookState>>,
}

impl OrderbookDeltaBook {
    pub fn new() -> Self {
        Self { books: RwLock::new(HashMap::new()) }
    }

    pub fn update(&self, symbol: &str, best_bid: f64, best_ask: f64, bid_depth: f64, ask_depth: f64) {
        let mut map = self.books.write();
        let state = map.entry(symbol.to_string()).or_default();
        let imbalance = Self::compute_imbalance(bid_depth, ask_depth);

        state.prev_imbalance = if state.has_prev { Self::compute_imbalance(state.bid_depth, state.ask_depth) } else { imbalance };
        state.has_prev = true;
        state.best_bid = best_bid;
        state.best_ask = best_ask;
        state.bid_depth = bid_depth;
        state.ask_depth = ask_depth;
    }

    fn compute_imbalance(bid_depth: f64, ask_depth: f64) -> f64 {
        let total = bid_depth + ask_depth;
        if total <= 0.0 {
            0.0
        } else {
            (bid_depth - ask_depth) / total
        }
    }

    pub fn snapshot(&self, symbol: &str) -> Option<OrderbookSnapshot> {
        let map = self.books.read();
        let state = map.get(symbol)?;
        let imbalance = Self::compute_imbalance(state.bid_depth, state.ask_depth);
        let mid = (state.best_bid + state.best_ask) / 2.0;
        let spread_bps = if mid > 0.0 { (state.best_ask - state.best_bid) / mid * 10_000.0 } else { 0.0 };

        Some(OrderbookSnapshot {
            best_bid: state.best_bid,
            best_ask: state.best_ask,
            bid_depth: state.bid_depth,
            ask_depth: state.ask_depth,
            spread_bps,
            imbalance,
            imbalance_delta: imbalance - state.prev_imbalance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_book_has_zero_imbalance() {
        let book = OrderbookDeltaBook::new();
        book.update("BTCUSDT", 100.0, 100.1, 10.0, 10.0);
        let snap = book.snapshot("BTCUSDT").unwrap();
        assert_eq!(snap.imbalance, 0.0);
    }

    #[test]
    fn imbalance_delta_tracks_change_between_updates() {
        let book = OrderbookDeltaBook::new();
        book.update("BTCUSDT", 100.0, 100.1, 10.0, 10.0);
        book.update("BTCUSDT", 100.0, 100.1, 30.0, 10.0); // bids surge
        let snap = book.snapshot("BTCUSDT").unwrap();
        assert!(snap.imbalance > 0.0);
        assert!(snap.imbalance_delta > 0.0);
    }

    #[test]
    fn spread_bps_computed_from_mid() {
        let book = OrderbookDeltaBook::new();
        book.update("BTCUSDT", 99.9, 100.1, 5.0, 5.0);
        let snap = book.snapshot("BTCUSDT").unwrap();
        assert!((snap.spread_bps - 20.0).abs() < 1e-6);
    }

    #[test]
    fn unknown_symbol_returns_none() {
        let book = OrderbookDeltaBook::new();
        assert!(book.snapshot("NOSUCH").is_none());
    }
}
