// =============================================================================
// Engine state — shared handles the control loop ticks against
// =============================================================================
//
// One struct holding `Arc`s to every shared subsystem, built once at
// startup and cloned cheaply into every spawned task.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::adapter::BrokerAdapter;
use crate::cooldown::CooldownManager;
use crate::exit_manager::ExitManager;
use crate::market_data::{CandleBuffer, LiquidationClusterBook, OrderbookDeltaBook, TradeFlowBook, TradePressureBook};
use crate::position::PositionLedger;
use crate::risk_gate::RiskGate;
use crate::runtime_config::RuntimeConfig;

const MAX_RECENT_DECISIONS: usize = 200;
const MAX_RECENT_ERRORS: usize = 100;
pub const POSITIONS_PATH: &str = "state/positions_paper.json";

#[derive(Debug, Clone)]
pub struct RecentDecision {
    pub symbol: String,
    pub decision: String,
    pub reason: Option<String>,
    pub ts_ms: i64,
}

pub struct EngineState {
    pub state_version: AtomicU64,
    pub config: Arc<RwLock<RuntimeConfig>>,
    pub adapter: Arc<dyn BrokerAdapter>,

    pub candles: Arc<CandleBuffer>,
    pub pressure: Arc<TradePressureBook>,
    pub flow: Arc<TradeFlowBook>,
    pub orderbook: Arc<OrderbookDeltaBook>,
    pub liquidations: Arc<LiquidationClusterBook>,

    pub positions: Arc<PositionLedger>,
    pub risk_gate: Arc<RiskGate>,
    pub cooldown: Arc<CooldownManager>,
    pub exits: Arc<ExitManager>,

    recent_decisions: RwLock<VecDeque<RecentDecision>>,
    recent_errors: RwLock<VecDeque<String>>,
}

impl EngineState {
    pub fn new(config: RuntimeConfig, adapter: Arc<dyn BrokerAdapter>) -> Self {
        let risk_gate = Arc::new(RiskGate::new(
            config.max_daily_loss_pct,
            config.max_position_per_symbol,
            config.max_account_exposure_frac,
            config.max_total_exposure_frac,
            config.max_account_notional,
            config.max_total_notional,
        ));
        let cooldown = Arc::new(CooldownManager::new(
            config.cooldown.backoff_mult,
            config.cooldown.max_sec,
            config.cooldown.fail_window_sec,
            config.cooldown.after_exit_fill_sec,
            config.cooldown.after_entry_fill_sec,
        ));
        let exits = Arc::new(ExitManager::new(
            config.stop_loss_pct,
            config.trailing_stop_pct,
            config.take_profit_net_pct,
            config.fee_rate,
            config.slippage_rate,
        ));

        Self {
            state_version: AtomicU64::new(0),
            config: Arc::new(RwLock::new(config)),
            adapter,
            candles: Arc::new(CandleBuffer::new(500)),
            pressure: Arc::new(TradePressureBook::new(10_000.0)),
            flow: Arc::new(TradeFlowBook::new()),
            orderbook: Arc::new(OrderbookDeltaBook::new()),
            liquidations: Arc::new(LiquidationClusterBook::new()),
            positions: Arc::new(PositionLedger::with_persist_path(POSITIONS_PATH)),
            risk_gate,
            cooldown,
            exits,
            recent_decisions: RwLock::new(VecDeque::with_capacity(MAX_RECENT_DECISIONS)),
            recent_errors: RwLock::new(VecDeque::with_capacity(MAX_RECENT_ERRORS)),
        }
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn push_decision(&self, decision: RecentDecision) {
        let mut ring = self.recent_decisions.write();
        if ring.len() >= MAX_RECENT_DECISIONS {
            ring.pop_front();
        }
        ring.push_back(decision);
    }

    pub fn recent_decisions(&self) -> Vec<RecentDecision> {
        self.recent_decisions.read().iter().cloned().collect()
    }

    pub fn push_error(&self, message: impl Into<String>) {
        let mut ring = self.recent_errors.write();
        if ring.len() >= MAX_RECENT_ERRORS {
            ring.pop_front();
        }
        ring.push_back(message.into());
    }

    pub fn recent_errors(&self) -> Vec<String> {
        self.recent_errors.read().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::paper::PaperAdapter;

    #[test]
    fn new_state_starts_at_version_zero_and_increments() {
        let state = EngineState::new(RuntimeConfig::default(), Arc::new(PaperAdapter::new("paper", 1000.0)));
        assert_eq!(state.state_version.load(Ordering::SeqCst), 0);
        assert_eq!(state.increment_version(), 1);
        assert_eq!(state.increment_version(), 2);
    }

    #[test]
    fn recent_decisions_ring_evicts_oldest() {
        let state = EngineState::new(RuntimeConfig::default(), Arc::new(PaperAdapter::new("paper", 1000.0)));
        for i in 0..(MAX_RECENT_DECISIONS + 5) {
            state.push_decision(RecentDecision {
                symbol: "BTCUSDT".into(),
                decision: "hold".into(),
                reason: None,
                ts_ms: i as i64,
            });
        }
        let decisions = state.recent_decisions();
        assert_eq!(decisions.len(), MAX_RECENT_DECISIONS);
        assert_eq!(decisions[0].ts_ms, 5);
    }
}
