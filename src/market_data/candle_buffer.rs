// =============================================================================
// Candle buffer — ring buffer of OHLCV bars per (symbol, interval)
// =============================================================================
//
// The control loop pulls candles from the broker adapter each tick and feeds
// them here; nothing in this module talks to a network. Historical candle
// persistence across restarts is out of scope — the buffer starts empty on
// every process start and is rebuilt from the adapter's own history within
// a few ticks.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A single OHLCV bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub is_closed: bool,
}

/// Composite key identifying a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    pub interval: String,
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

/// Thread-safe ring buffer keyed by `(symbol, interval)`. The live
/// (unclosed) candle is updated in place; closed candles accumulate up to
/// `max_candles` before the oldest is evicted.
pub struct CandleBuffer {
    buffers: RwLock<HashMap<CandleKey, VecDeque<Candle>>>,
    max_candles: usize,
}

impl CandleBuffer {
    pub fn new(max_candles: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            max_candles,
        }
    }

    pub fn update(&self, key: CandleKey, candle: Candle) {
        let mut map = self.buffers.write();
        let ring = map
            .entry(key)
            .or_insert_with(|| VecDeque::with_capacity(self.max_candles + 1));

        if let Some(last) = ring.back() {
            if !last.is_closed && last.open_time == candle.open_time {
                ring.pop_back();
            }
        }
        ring.push_back(candle);

        while ring.len() > self.max_candles {
            ring.pop_front();
        }
    }

    /// Replace the whole closed history for a key in one shot, as returned
    /// by an adapter's candle-history call. The in-progress candle (if any)
    /// is preserved.
    pub fn replace_closed(&self, key: CandleKey, candles: Vec<Candle>) {
        let mut map = self.buffers.write();
        let ring = map
            .entry(key)
            .or_insert_with(|| VecDeque::with_capacity(self.max_candles + 1));
        let in_progress = ring.back().filter(|c| !c.is_closed).cloned();
        ring.clear();
        for c in candles.into_iter().rev().take(self.max_candles).rev() {
            ring.push_back(c);
        }
        if let Some(c) = in_progress {
            ring.push_back(c);
        }
    }

    /// Most recent `count` **closed** candles, oldest-first.
    pub fn get_closed(&self, key: &CandleKey, count: usize) -> Vec<Candle> {
        let map = self.buffers.read();
        match map.get(key) {
            Some(ring) => {
                let closed: Vec<&Candle> = ring.iter().filter(|c| c.is_closed).collect();
                let start = closed.len().saturating_sub(count);
                closed[start..].iter().map(|c| (*c).clone()).collect()
            }
            None => Vec::new(),
        }
    }

    pub fn get_closes(&self, key: &CandleKey, count: usize) -> Vec<f64> {
        self.get_closed(key, count).iter().map(|c| c.close).collect()
    }

    pub fn last_closed(&self, key: &CandleKey) -> Option<Candle> {
        let map = self.buffers.read();
        map.get(key).and_then(|ring| ring.iter().rev().find(|c| c.is_closed).cloned())
    }

    pub fn count(&self, key: &CandleKey) -> usize {
        let map = self.buffers.read();
        map.get(key).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_candle(open_time: i64, close: f64, is_closed: bool) -> Candle {
        Candle {
            open_time,
            close_time: open_time + 59_999,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
            is_closed,
        }
    }

    fn make_key(sym: &str, iv: &str) -> CandleKey {
        CandleKey { symbol: sym.into(), interval: iv.into() }
    }

    #[test]
    fn ring_buffer_trimming() {
        let buf = CandleBuffer::new(3);
        let key = make_key("BTCUSDT", "1m");
        for i in 0..5 {
            buf.update(key.clone(), sample_candle(i * 60_000, 100.0 + i as f64, true));
        }
        assert_eq!(buf.count(&key), 3);
        assert_eq!(buf.get_closes(&key, 10), vec![102.0, 103.0, 104.0]);
    }

    #[test]
    fn in_progress_replacement() {
        let buf = CandleBuffer::new(10);
        let key = make_key("ETHUSDT", "5m");
        buf.update(key.clone(), sample_candle(0, 50.0, false));
        assert_eq!(buf.count(&key), 1);
        buf.update(key.clone(), sample_candle(0, 51.0, false));
        assert_eq!(buf.count(&key), 1);
        buf.update(key.clone(), sample_candle(0, 52.0, true));
        assert_eq!(buf.count(&key), 1);
        assert_eq!(buf.last_closed(&key).unwrap().close, 52.0);
    }

    #[test]
    fn get_closed_filters_out_in_progress() {
        let buf = CandleBuffer::new(10);
        let key = make_key("BTCUSDT", "1m");
        buf.update(key.clone(), sample_candle(0, 100.0, true));
        buf.update(key.clone(), sample_candle(60_000, 101.0, true));
        buf.update(key.clone(), sample_candle(120_000, 102.0, false));
        assert_eq!(buf.get_closed(&key, 10).len(), 2);
    }

    #[test]
    fn last_closed_empty_returns_none() {
        let buf = CandleBuffer::new(10);
        let key = make_key("XYZUSDT", "1h");
        assert!(buf.last_closed(&key).is_none());
    }
}
