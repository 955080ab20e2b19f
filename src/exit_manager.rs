// =============================================================================
// Exit manager — trailing stop, hard stop, take profit, in priority order
// =============================================================================
//
// The running high/low-water mark lives on the position itself (maintained
// by `update_mark` and every fill in the position ledger), so this manager
// carries no state of its own: every check is a pure function of the
// position's current fields and the latest price, which means it survives
// a restart without replaying any history.
//
// Check order matters: trailing fires first since once a trade has run up
// it should protect gains ahead of the wider hard stop; the hard stop is
// checked next since a loss must never be allowed to run past it;
// take-profit is checked last.

use crate::position::{Position, PositionSide};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    TrailingStop,
    StopLoss,
    TakeProfit,
}

pub struct ExitManager {
    stop_loss_pct: f64,
    trailing_stop_pct: f64,
    take_profit_net_pct: f64,
    fee_rate: f64,
    slippage_rate: f64,
}

impl ExitManager {
    pub fn new(stop_loss_pct: f64, trailing_stop_pct: f64, take_profit_net_pct: f64, fee_rate: f64, slippage_rate: f64) -> Self {
        Self { stop_loss_pct, trailing_stop_pct, take_profit_net_pct, fee_rate, slippage_rate }
    }

    /// Check all three exit conditions for `position` against `last_price`,
    /// after the position's watermark has already been advanced for this
    /// tick. Returns the first exit that fires, in trailing -> stop ->
    /// take-profit priority, or `None` to hold.
    pub fn check_exit(&self, position: &Position, last_price: f64) -> Option<ExitReason> {
        let raw_return = match position.side {
            PositionSide::Long => (last_price - position.avg_entry_price) / position.avg_entry_price,
            PositionSide::Short => (position.avg_entry_price - last_price) / position.avg_entry_price,
        };

        if self.trailing_stop_pct > 0.0 {
            let trail_fires = match position.side {
                PositionSide::Long => position.high_water > 0.0 && last_price <= position.high_water * (1.0 - self.trailing_stop_pct),
                PositionSide::Short => position.low_water > 0.0 && last_price >= position.low_water * (1.0 + self.trailing_stop_pct),
            };
            if trail_fires {
                return Some(ExitReason::TrailingStop);
            }
        }

        if self.stop_loss_pct > 0.0 && raw_return <= -self.stop_loss_pct {
            return Some(ExitReason::StopLoss);
        }

        if self.take_profit_net_pct > 0.0 {
            let net_return = raw_return - 2.0 * self.fee_rate - 2.0 * self.slippage_rate;
            if net_return >= self.take_profit_net_pct {
                return Some(ExitReason::TakeProfit);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use crate::position::PositionLedger;

    fn long_at(entry: f64, high_water: f64) -> Position {
        let ledger = PositionLedger::new();
        ledger.apply_fill("BTCUSDT", Side::Buy, 1.0, entry, 0.0, 0);
        ledger.update_mark("BTCUSDT", high_water, 0);
        ledger.get("BTCUSDT").unwrap()
    }

    fn short_at(entry: f64, low_water: f64) -> Position {
        let ledger = PositionLedger::new();
        ledger.apply_fill("BTCUSDT", Side::Sell, 1.0, entry, 0.0, 0);
        ledger.update_mark("BTCUSDT", low_water, 0);
        ledger.get("BTCUSDT").unwrap()
    }

    #[test]
    fn stop_loss_fires_on_adverse_move() {
        let em = ExitManager::new(0.004, 0.003, 0.006, 0.0, 0.0);
        let pos = long_at(100.0, 100.0);
        assert_eq!(em.check_exit(&pos, 99.5), Some(ExitReason::StopLoss));
    }

    #[test]
    fn take_profit_fires_on_favorable_move_net_of_fees() {
        let em = ExitManager::new(0.004, 0.003, 0.006, 0.0004, 0.0002);
        let pos = long_at(100.0, 100.0);
        // raw_return = 0.90% ; net = 0.90% - 0.12% = 0.78% >= 0.6%
        assert_eq!(em.check_exit(&pos, 100.9), Some(ExitReason::TakeProfit));
    }

    #[test]
    fn take_profit_does_not_fire_when_fees_eat_the_margin() {
        let em = ExitManager::new(0.004, 0.003, 0.006, 0.0004, 0.0002);
        let pos = long_at(100.0, 100.0);
        // raw_return = 0.65% ; net = 0.65% - 0.12% = 0.53% < 0.6%
        assert_eq!(em.check_exit(&pos, 100.65), None);
    }

    #[test]
    fn trailing_stop_fires_once_price_retraces_from_the_watermark() {
        let em = ExitManager::new(0.004, 0.005, 5.0, 0.0, 0.0);
        let pos = long_at(50_000.0, 50_500.0);
        // trail_price = 50_500 * 0.995 = 50_247.5
        assert_eq!(em.check_exit(&pos, 50_246.0), Some(ExitReason::TrailingStop));
        assert_eq!(em.check_exit(&pos, 50_300.0), None);
    }

    #[test]
    fn short_side_exit_math_mirrors_long() {
        let em = ExitManager::new(0.004, 0.003, 0.006, 0.0, 0.0);
        let pos = short_at(100.0, 100.0);
        assert_eq!(em.check_exit(&pos, 100.5), Some(ExitReason::StopLoss));
    }

    #[test]
    fn short_trailing_stop_fires_on_a_bounce_off_the_low_water() {
        let em = ExitManager::new(0.004, 0.005, 5.0, 0.0, 0.0);
        let pos = short_at(50_000.0, 49_500.0);
        // trail_price = 49_500 * 1.005 = 49_747.5
        assert_eq!(em.check_exit(&pos, 49_750.0), Some(ExitReason::TrailingStop));
    }

    #[test]
    fn no_exit_within_bands() {
        let em = ExitManager::new(0.004, 0.003, 0.006, 0.0, 0.0);
        let pos = long_at(100.0, 100.05);
        assert_eq!(em.check_exit(&pos, 100.05), None);
    }

    #[test]
    fn disabled_trailing_stop_never_fires() {
        let em = ExitManager::new(0.004, 0.0, 0.006, 0.0, 0.0);
        let pos = long_at(100.0, 101.0);
        assert_eq!(em.check_exit(&pos, 99.9), None);
    }
}
