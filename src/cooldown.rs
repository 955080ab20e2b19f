// =============================================================================
// Cooldown manager — exponential backoff per (symbol, failure category)
// =============================================================================
//
// Consumes the classification table in `errors.rs`. Each failed order
// bumps a per-(symbol, category) strike counter and sets a cooldown
// deadline; repeated failures of the same cause within the fail window
// multiply the backoff, capped at `max_sec`, and a deadline never moves
// earlier. A clean entry or exit fill resets the strike counter and can
// arm its own short quiet period before the symbol trades again.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;

use crate::errors::{classify, default_base_seconds, recommend_action, FailureCategory, RawFailure};

#[derive(Debug, Clone, Copy)]
struct CooldownState {
    category: FailureCategory,
    strikes: u32,
    cooldown_until_ms: i64,
    last_failure_ms: i64,
}

pub struct CooldownManager {
    states: RwLock<HashMap<String, CooldownState>>,
    backoff_mult: f64,
    max_sec: f64,
    fail_window_sec: f64,
    after_exit_fill_sec: f64,
    after_entry_fill_sec: f64,
}

/// One entry in the append-only cooldown history tape.
#[derive(Debug, Clone, Serialize)]
pub struct CooldownJournalEntry {
    pub symbol: String,
    pub category: &'static str,
    pub strikes: u32,
    pub cooldown_sec: f64,
    pub hint: &'static str,
    pub ts_ms: i64,
}

impl CooldownManager {
    pub fn new(backoff_mult: f64, max_sec: f64, fail_window_sec: f64, after_exit_fill_sec: f64, after_entry_fill_sec: f64) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            backoff_mult,
            max_sec,
            fail_window_sec,
            after_exit_fill_sec,
            after_entry_fill_sec,
        }
    }

    /// Register a failed order and return the journal entry describing the
    /// cooldown just imposed. `until_ms` only ever moves forward: a fresh
    /// failure never shortens a cooldown an earlier, longer failure already
    /// set.
    pub fn record_failure(&self, symbol: &str, raw: &RawFailure, now_ms: i64) -> CooldownJournalEntry {
        let category = classify(raw);
        let mut map = self.states.write();
        let entry = map.entry(symbol.to_string()).or_insert(CooldownState {
            category,
            strikes: 0,
            cooldown_until_ms: 0,
            last_failure_ms: now_ms,
        });

        let within_window = entry.category == category
            && (now_ms - entry.last_failure_ms) as f64 / 1000.0 <= self.fail_window_sec;

        entry.strikes = if within_window { entry.strikes + 1 } else { 1 };
        entry.category = category;
        entry.last_failure_ms = now_ms;

        let base = default_base_seconds(category);
        let cooldown_sec = (base * self.backoff_mult.powi((entry.strikes - 1) as i32)).min(self.max_sec);
        let candidate_until_ms = now_ms + (cooldown_sec * 1000.0) as i64;
        entry.cooldown_until_ms = entry.cooldown_until_ms.max(candidate_until_ms);

        CooldownJournalEntry {
            symbol: symbol.to_string(),
            category: category.as_str(),
            strikes: entry.strikes,
            cooldown_sec,
            hint: recommend_action(category),
            ts_ms: now_ms,
        }
    }

    /// A clean fill clears any standing failure-backoff state for the
    /// symbol. Kept for call sites that don't distinguish entry vs exit
    /// fills.
    pub fn record_success(&self, symbol: &str) {
        self.states.write().remove(symbol);
    }

    /// Clear failure strikes after an entry fill and, if configured, impose
    /// a short quiet period before the next entry on this symbol.
    pub fn on_entry_filled(&self, symbol: &str, now_ms: i64) {
        self.states.write().remove(symbol);
        if self.after_entry_fill_sec > 0.0 {
            self.arm_quiet_period(symbol, now_ms, self.after_entry_fill_sec);
        }
    }

    /// Clear failure strikes after an exit fill and, if configured, impose
    /// a quiet period before re-entering this symbol.
    pub fn on_exit_filled(&self, symbol: &str, now_ms: i64) {
        self.states.write().remove(symbol);
        if self.after_exit_fill_sec > 0.0 {
            self.arm_quiet_period(symbol, now_ms, self.after_exit_fill_sec);
        }
    }

    fn arm_quiet_period(&self, symbol: &str, now_ms: i64, quiet_sec: f64) {
        let mut map = self.states.write();
        map.insert(
            symbol.to_string(),
            CooldownState {
                category: FailureCategory::HttpError,
                strikes: 0,
                cooldown_until_ms: now_ms + (quiet_sec * 1000.0) as i64,
                last_failure_ms: now_ms,
            },
        );
    }

    pub fn is_on_cooldown(&self, symbol: &str, now_ms: i64) -> bool {
        self.states.read().get(symbol).is_some_and(|s| s.cooldown_until_ms > now_ms)
    }

    pub fn remaining_sec(&self, symbol: &str, now_ms: i64) -> f64 {
        match self.states.read().get(symbol) {
            Some(s) if s.cooldown_until_ms > now_ms => (s.cooldown_until_ms - now_ms) as f64 / 1000.0,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(status: u16) -> RawFailure {
        RawFailure { http_status: Some(status), code: None, message: String::new() }
    }

    fn mgr(backoff_mult: f64, max_sec: f64, fail_window_sec: f64) -> CooldownManager {
        CooldownManager::new(backoff_mult, max_sec, fail_window_sec, 0.0, 0.0)
    }

    #[test]
    fn first_failure_imposes_base_cooldown() {
        let mgr = mgr(2.0, 3600.0, 900.0);
        let entry = mgr.record_failure("BTCUSDT", &raw(429), 0);
        assert_eq!(entry.strikes, 1);
        assert_eq!(entry.cooldown_sec, 5.0);
        assert!(mgr.is_on_cooldown("BTCUSDT", 1000));
        assert!(!mgr.is_on_cooldown("BTCUSDT", 6000));
    }

    #[test]
    fn repeated_failure_within_window_doubles_backoff() {
        let mgr = mgr(2.0, 3600.0, 900.0);
        mgr.record_failure("BTCUSDT", &raw(429), 0);
        let second = mgr.record_failure("BTCUSDT", &raw(429), 1000);
        assert_eq!(second.strikes, 2);
        assert_eq!(second.cooldown_sec, 10.0);
    }

    #[test]
    fn failure_outside_window_resets_strikes() {
        let mgr = mgr(2.0, 3600.0, 10.0);
        mgr.record_failure("BTCUSDT", &raw(429), 0);
        let second = mgr.record_failure("BTCUSDT", &raw(429), 20_000);
        assert_eq!(second.strikes, 1);
    }

    #[test]
    fn backoff_is_capped_at_max_sec() {
        let mgr = mgr(10.0, 30.0, 900.0);
        mgr.record_failure("BTCUSDT", &raw(401), 0); // base 600s, would explode with mult
        let entry = mgr.record_failure("BTCUSDT", &raw(401), 1000);
        assert_eq!(entry.cooldown_sec, 30.0);
    }

    #[test]
    fn success_clears_cooldown() {
        let mgr = mgr(2.0, 3600.0, 900.0);
        mgr.record_failure("BTCUSDT", &raw(429), 0);
        mgr.record_success("BTCUSDT");
        assert!(!mgr.is_on_cooldown("BTCUSDT", 1000));
    }

    #[test]
    fn a_fresh_failure_never_shortens_an_outstanding_cooldown() {
        let mgr = mgr(1.0, 3600.0, 900.0);
        // -2015: unauthorized, 600s base.
        mgr.record_failure("BTCUSDT", &RawFailure { http_status: Some(401), code: None, message: String::new() }, 0);
        assert!(mgr.remaining_sec("BTCUSDT", 0) >= 599.0);
        // A new, unrelated short failure a moment later must not cut the
        // 600s unauthorized cooldown down to 5s.
        let before = mgr.remaining_sec("BTCUSDT", 100_000);
        mgr.record_failure("BTCUSDT", &raw(429), 100_000);
        assert!(mgr.remaining_sec("BTCUSDT", 100_000) >= before);
    }

    #[test]
    fn on_entry_filled_resets_strikes_and_arms_quiet_period() {
        let mgr = CooldownManager::new(2.0, 3600.0, 900.0, 0.0, 30.0);
        mgr.record_failure("BTCUSDT", &raw(429), 0);
        mgr.on_entry_filled("BTCUSDT", 1000);
        assert!(mgr.is_on_cooldown("BTCUSDT", 1000));
        assert!(!mgr.is_on_cooldown("BTCUSDT", 32_000));
        let next = mgr.record_failure("BTCUSDT", &raw(429), 40_000);
        assert_eq!(next.strikes, 1);
    }

    #[test]
    fn on_exit_filled_arms_configured_quiet_period() {
        let mgr = CooldownManager::new(2.0, 3600.0, 900.0, 45.0, 0.0);
        mgr.on_exit_filled("BTCUSDT", 0);
        assert!(mgr.is_on_cooldown("BTCUSDT", 1000));
        assert!(!mgr.is_on_cooldown("BTCUSDT", 46_000));
    }

    #[test]
    fn on_exit_filled_is_a_no_op_cooldown_when_disabled() {
        let mgr = mgr(2.0, 3600.0, 900.0);
        mgr.on_exit_filled("BTCUSDT", 0);
        assert!(!mgr.is_on_cooldown("BTCUSDT", 0));
    }
}
