// =============================================================================
// Risk gate — five-step entry check with a daily-loss circuit breaker
// =============================================================================
//
// A single daily-loss circuit breaker plus symbol, account, and total
// exposure caps (both fractional and absolute). `maybe_reset_daily`
// compares today's date string cheaply under a read lock and only takes
// the write lock to actually reset, since this check runs on every tick
// and must stay cheap. The reset also snapshots `day_start_equity`, the
// fixed baseline the daily-loss breaker compares against for the rest of
// the UTC day — not whatever equity happens to be passed to the next
// `record_realized_pnl` call, which would let a mid-day equity swing shift
// the breaker's threshold.

use chrono::Utc;
use parking_lot::RwLock;

#[derive(Debug, Clone)]
struct Inner {
    day: String,
    day_start_equity: f64,
    realized_pnl_today: f64,
    daily_loss_tripped: bool,
}

impl Inner {
    fn fresh(day: String, day_start_equity: f64) -> Self {
        Self { day, day_start_equity, realized_pnl_today: 0.0, daily_loss_tripped: false }
    }
}

pub struct RiskGate {
    inner: RwLock<Inner>,
    max_daily_loss_pct: f64,
    max_position_per_symbol: f64,
    max_account_exposure_frac: f64,
    max_total_exposure_frac: f64,
    max_account_notional: f64,
    max_total_notional: f64,
}

/// Why an entry was refused, in priority order. `None` means the gate
/// approved the trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskVerdict {
    Approved,
    DailyLossStopTripped,
    SymbolCapExceeded,
    AccountNotionalCapExceeded,
    TotalNotionalCapExceeded,
    AccountExposureCapExceeded,
    TotalExposureCapExceeded,
}

impl RiskGate {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        max_daily_loss_pct: f64,
        max_position_per_symbol: f64,
        max_account_exposure_frac: f64,
        max_total_exposure_frac: f64,
        max_account_notional: f64,
        max_total_notional: f64,
    ) -> Self {
        Self {
            inner: RwLock::new(Inner::fresh(today_string(), 0.0)),
            max_daily_loss_pct,
            max_position_per_symbol,
            max_account_exposure_frac,
            max_total_exposure_frac,
            max_account_notional,
            max_total_notional,
        }
    }

    /// Rolls `Inner` over at the UTC day boundary, capturing `current_equity`
    /// as the new `day_start_equity` baseline. A no-op on every call within
    /// the same day bar the cheap date-string compare.
    fn maybe_reset_daily(&self, current_equity: f64) {
        let today = today_string();
        if self.inner.read().day == today {
            return;
        }
        let mut inner = self.inner.write();
        if inner.day != today {
            *inner = Inner::fresh(today, current_equity);
        }
    }

    /// Captures `day_start_equity` on the first equity observation of a day
    /// that didn't already get one from a rollover (e.g. the very first
    /// entry check after the gate is constructed). A no-op once set.
    fn ensure_day_start_equity(&self, current_equity: f64) {
        if current_equity <= 0.0 {
            return;
        }
        let mut inner = self.inner.write();
        if inner.day_start_equity <= 0.0 {
            inner.day_start_equity = current_equity;
        }
    }

    pub fn record_realized_pnl(&self, pnl: f64, equity_now: f64) {
        self.maybe_reset_daily(equity_now);
        self.ensure_day_start_equity(equity_now);
        let mut inner = self.inner.write();
        inner.realized_pnl_today += pnl;
        if inner.day_start_equity > 0.0 {
            let loss_pct = -inner.realized_pnl_today / inner.day_start_equity * 100.0;
            if loss_pct >= self.max_daily_loss_pct {
                inner.daily_loss_tripped = true;
            }
        }
    }

    /// Priority-ordered check. Exits are always allowed — tightening risk
    /// should never trap the engine in a position it can no longer close.
    pub fn check_entry(
        &self,
        is_exit: bool,
        symbol_position_notional: f64,
        account_equity: f64,
        account_notional: f64,
        total_notional: f64,
    ) -> RiskVerdict {
        if is_exit {
            return RiskVerdict::Approved;
        }

        self.maybe_reset_daily(account_equity);
        self.ensure_day_start_equity(account_equity);
        if self.inner.read().daily_loss_tripped {
            return RiskVerdict::DailyLossStopTripped;
        }

        if account_equity > 0.0 && symbol_position_notional / account_equity > self.max_position_per_symbol {
            return RiskVerdict::SymbolCapExceeded;
        }

        if self.max_account_notional > 0.0 && account_notional > self.max_account_notional {
            return RiskVerdict::AccountNotionalCapExceeded;
        }

        if self.max_total_notional > 0.0 && total_notional > self.max_total_notional {
            return RiskVerdict::TotalNotionalCapExceeded;
        }

        if account_equity > 0.0 && account_notional / account_equity > self.max_account_exposure_frac {
            return RiskVerdict::AccountExposureCapExceeded;
        }

        if account_equity > 0.0 && total_notional / account_equity > self.max_total_exposure_frac {
            return RiskVerdict::TotalExposureCapExceeded;
        }

        RiskVerdict::Approved
    }

    pub fn is_daily_loss_tripped(&self) -> bool {
        self.inner.read().daily_loss_tripped
    }
}

fn today_string() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}
