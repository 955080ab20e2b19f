// =============================================================================
// Trade flow book — EMA-smoothed notional flow rate and its z-score
// =============================================================================
//
// Same RwLock<HashMap<symbol, _>> shape as the pressure book, but instead of
// holding raw fills it holds a running EMA mean/variance of the per-bucket
// flow rate, updated once per 5s bucket close. The z-score of the latest
// bucket against that running mean/variance is what the entry pipeline
// consumes (flow_rate_z, flow_accel_z).

use std::collections::HashMap;

use parking_lot::RwLock;

const WINDOW_SEC: i64 = 5;
const EMA_ALPHA: f64 = 0.08;

#[derive(Debug, Clone, Copy, Default)]
pub struct FlowSnapshot {
    pub rate_notional_per_sec: f64,
    pub rate_z: f64,
    pub accel_z: f64,
}

#[derive(Debug, Clone, Copy)]
struct FlowState {
    bucket_start_ms: i64,
    bucket_notional: f64,
    last_rate: f64,
    mean_rate: f64,
    var_rate: f64,
    mean_accel: f64,
    var_accel: f64,
    initialized: bool,
}

impl Default for FlowState {
    fn default() -> Self {
        Self {
            bucket_start_ms: 0,
            bucket_notional: 0.0,
            last_rate: 0.0,
            mean_rate: 0.0,
            var_rate: 0.0,
            mean_accel: 0.0,
            var_accel: 0.0,
            initialized: false,
        }
    }
}

pub struct TradeFlowBook {
    states: RwLock<HashMap<String, FlowState>>,
}

impl TradeFlowBook {
    pub fn new() -> Self {
        Self { states: RwLock::new(HashMap::new()) }
    }

    pub fn record_trade(&self, symbol: &str, ts_ms: i64, price: f64, qty: f64) {
        let notional = price * qty;
        let mut map = self.states.write();
        let state = map.entry(symbol.to_string()).or_default();

        if !state.initialized {
            state.bucket_start_ms = ts_ms;
            state.initialized = true;
        }

        while ts_ms - state.bucket_start_ms >= WINDOW_SEC * 1000 {
            Self::close_bucket(state);
            state.bucket_start_ms += WINDOW_SEC * 1000;
        }
        state.bucket_notional += notional;
    }

    fn close_bucket(state: &mut FlowState) {
        let rate = state.bucket_notional / WINDOW_SEC as f64;
        let accel = rate - state.last_rate;

        let rate_diff = rate - state.mean_rate;
        state.mean_rate += EMA_ALPHA * rate_diff;
        state.var_rate = (1.0 - EMA_ALPHA) * (state.var_rate + EMA_ALPHA * rate_diff * rate_diff);

        let accel_diff = accel - state.mean_accel;
        state.mean_accel += EMA_ALPHA * accel_diff;
        state.var_accel = (1.0 - EMA_ALPHA) * (state.var_accel + EMA_ALPHA * accel_diff * accel_diff);

        state.last_rate = rate;
        state.bucket_notional = 0.0;
    }

    /// Force-close any pending bucket up to `now_ms` and return the latest
    /// flow snapshot for `symbol`.
    pub fn snapshot(&self, symbol: &str, now_ms: i64) -> FlowSnapshot {
        let mut map = self.states.write();
        let Some(state) = map.get_mut(symbol) else {
            return FlowSnapshot::default();
        };

        if state.initialized {
            while now_ms - state.bucket_start_ms >= WINDOW_SEC * 1000 {
                Self::close_bucket(state);
                state.bucket_start_ms += WINDOW_SEC * 1000;
            }
        }

        let rate_sd = state.var_rate.sqrt();
        let accel_sd = state.var_accel.sqrt();
        let rate_z = if rate_sd > 1e-9 { (state.last_rate - state.mean_rate) / rate_sd } else { 0.0 };
        let accel = state.last_rate - state.mean_rate; // reuse latest closed rate as proxy when mid-bucket
        let accel_z = if accel_sd > 1e-9 { (accel - state.mean_accel) / accel_sd } else { 0.0 };

        FlowSnapshot { rate_notional_per_sec: state.last_rate, rate_z, accel_z }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_symbol_yields_zero_snapshot() {
        let book = TradeFlowBook::new();
        let snap = book.snapshot("BTCUSDT", 0);
        assert_eq!(snap.rate_notional_per_sec, 0.0);
        assert_eq!(snap.rate_z, 0.0);
    }

    #[test]
    fn steady_flow_converges_to_near_zero_z() {
        let book = TradeFlowBook::new();
        let mut ts = 0i64;
        for _ in 0..200 {
            book.record_trade("BTCUSDT", ts, 100.0, 10.0); // 1000 notional per bucket
            ts += WINDOW_SEC * 1000;
        }
        let snap = book.snapshot("BTCUSDT", ts);
        assert!(snap.rate_z.abs() < 1.0, "expected near-zero z for steady flow, got {}", snap.rate_z);
    }

    #[test]
    fn sudden_spike_produces_positive_rate_z() {
        let book = TradeFlowBook::new();
        let mut ts = 0i64;
        for _ in 0..50 {
            book.record_trade("BTCUSDT", ts, 100.0, 1.0); // 100 notional baseline
            ts += WINDOW_SEC * 1000;
        }
        book.record_trade("BTCUSDT", ts, 100.0, 500.0); // 50000 notional spike
        let snap = book.snapshot("BTCUSDT", ts + WINDOW_SEC * 1000);
        assert!(snap.rate_z > 1.0, "expected elevated z after spike, got {}", snap.rate_z);
    }
}
