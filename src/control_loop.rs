// =============================================================================
// Control loop — the per-symbol tick that ties every subsystem together
// =============================================================================
//
// A tokio::time::interval drives one tick per symbol, each tick reading
// all the shared state once, making a single entry-or-exit decision, and
// writing back the day's books. Market-data ingestion (kline/trade/depth
// feeds into the feature books) happens upstream of this module, which
// covers only the decision-making tick itself.
//
// Step order per tick:
//   1. Pull the closed-candle window and compute RSI.
//   2. Snapshot the four rolling feature books.
//   3. If a position is already open: advance its watermark, then check
//      exits, always allowed.
//   4. Otherwise: query cooldown and the concurrent-position cap; if
//      clear, run the twelve-filter entry pipeline.
//   5. On approval: size the order against exchange rules, then run the
//      risk gate against the intended notional.
//   6. Submit through the IOC ladder.
//   7. Apply the resulting fill to the position ledger, the shared
//      exposure store, and the journal.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::adapter::{BrokerAdapter, Capability};
use crate::app_state::{EngineState, RecentDecision};
use crate::entry::{self, EntryContext};
use crate::errors::EngineError;
use crate::execution::{ExecutionEngine, ExecutionOutcome};
use crate::exposure_store;
use crate::indicators::bollinger::calculate_bollinger;
use crate::indicators::rsi::calculate_rsi;
use crate::journal::{self, BotSnapshot};
use crate::market_data::CandleKey;
use crate::position::PositionSide;
use crate::types::{OrderMeta, OrderRequest, OrderType, Side};

pub struct TickPaths<'a> {
    pub bot_snapshots_dir: &'a str,
}

pub async fn tick(state: &EngineState, symbol: &str, venue: &str, now_ms: i64, paths: &TickPaths<'_>) -> Result<(), EngineError> {
    let candle_key = CandleKey { symbol: symbol.to_string(), interval: state.config.read().entry_tf.clone() };
    let candles = state.candles.get_closed(&candle_key, 200);

    let (decision_label, hold_reason, score) = run_tick_logic(state, symbol, venue, now_ms, &candles).await?;

    let position = state.positions.get(symbol);
    let last_price = candles.last().map_or(0.0, |c| c.close);
    let snapshot = BotSnapshot {
        venue: venue.to_string(),
        symbol: symbol.to_string(),
        trading_mode: format!("{:?}", state.config.read().trading_mode),
        last_decision: decision_label.clone(),
        hold_reason: hold_reason.clone(),
        open_side: position.as_ref().map(|p| format!("{:?}", p.side)),
        open_qty: position.as_ref().map_or(0.0, |p| p.qty),
        avg_entry_price: position.as_ref().map_or(0.0, |p| p.avg_entry_price),
        unrealized_pnl: state.positions.unrealized_pnl(symbol, last_price),
        composite_score: score,
        ts_ms: now_ms,
    };
    if let Err(err) = journal::write_bot_snapshot(paths.bot_snapshots_dir, &snapshot) {
        warn!(symbol, error = %err, "failed to write bot snapshot");
    }

    state.push_decision(RecentDecision { symbol: symbol.to_string(), decision: decision_label, reason: hold_reason, ts_ms: now_ms });
    Ok(())
}

async fn run_tick_logic(
    state: &EngineState,
    symbol: &str,
    venue: &str,
    now_ms: i64,
    candles: &[crate::market_data::Candle],
) -> Result<(String, Option<String>, f64), EngineError> {
    if candles.len() < 20 {
        return Ok(("hold".to_string(), None, 0.0));
    }

    let config = state.config.read().clone();
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let rsi_series = calculate_rsi(&closes, config.scalp_filters.rsi_period as usize);
    let (rsi, rsi_prev) = match rsi_series.len() {
        0 => (50.0, 50.0),
        1 => (rsi_series[0], rsi_series[0]),
        n => (rsi_series[n - 1], rsi_series[n - 2]),
    };
    let bollinger = calculate_bollinger(&closes, config.scalp_filters.bollinger_period as usize, config.scalp_filters.bollinger_std);
    if let Some(b) = &bollinger {
        debug!(symbol, upper = b.upper, lower = b.lower, "bollinger bands");
    }

    let last_candle = candles.last().unwrap().clone();
    let last_price = last_candle.close;
    let sma5_volume = {
        let window: Vec<f64> = candles.iter().rev().take(5).map(|c| c.volume).collect();
        window.iter().sum::<f64>() / window.len() as f64
    };

    let ob = state.orderbook.snapshot(symbol);
    let pressure = state.pressure.snapshot(symbol, now_ms);
    let flow = state.flow.snapshot(symbol, now_ms);
    let liq = state.liquidations.snapshot(symbol, now_ms, last_price);

    if let Some(mut position) = state.positions.get(symbol) {
        state.positions.update_mark(symbol, last_price, now_ms);
        position = state.positions.get(symbol).unwrap_or(position);
        if let Some(reason) = state.exits.check_exit(&position, last_price) {
            info!(symbol, ?reason, "exit triggered");
            let order_side = match position.side {
                PositionSide::Long => Side::Sell,
                PositionSide::Short => Side::Buy,
            };
            close_position(state, symbol, venue, order_side, position.qty, last_price, now_ms).await?;
            return Ok(("exit".to_string(), None, 0.0));
        }
        return Ok(("hold_open".to_string(), None, 0.0));
    }

    if state.cooldown.is_on_cooldown(symbol, now_ms) {
        return Ok(("hold".to_string(), Some("on_cooldown".to_string()), 0.0));
    }
    if state.positions.all().len() as u32 >= config.max_concurrent_positions {
        return Ok(("hold".to_string(), Some("max_concurrent_positions".to_string()), 0.0));
    }

    let ctx = EntryContext {
        has_open_position: false,
        candle: &last_candle,
        sma5_volume,
        orderbook: ob,
        pressure,
        flow_rate_z: flow.rate_z,
        flow_accel_z: flow.accel_z,
        liquidation: liq,
        rsi,
        rsi_prev,
        filters: &config.scalp_filters,
    };

    let (approval, components) = match entry::evaluate(&ctx) {
        Ok(ok) => ok,
        Err(reason) => return Ok(("hold".to_string(), Some(reason.as_str().to_string()), 0.0)),
    };
    let score = components.composite();

    open_position(state, symbol, venue, approval.order_side, last_price, now_ms).await?;
    Ok(("enter".to_string(), None, score))
}

async fn open_position(state: &EngineState, symbol: &str, venue: &str, side: Side, last_price: f64, now_ms: i64) -> Result<(), EngineError> {
    let config = state.config.read().clone();

    // A SELL here always means opening a short (an exit SELL never reaches
    // this function). Venues that can't short (spot) must drop the signal
    // before sizing, not reject it after money has already been committed.
    if side == Side::Sell && !state.adapter.supports(Capability::ShortSelling) {
        warn!(symbol, venue, "dropping short-open signal: venue does not support short selling");
        return Ok(());
    }

    let equity = state.adapter.get_equity().await.unwrap_or(0.0);

    let rules = state
        .adapter
        .get_symbol_rules(symbol)
        .await
        .unwrap_or(crate::types::SymbolRules { qty_step: 0.001, min_qty: 0.001, max_qty: 1000.0, min_notional: Some(5.0) });

    let intended_notional_for_mode = match config.order_sizing_mode {
        crate::types::OrderSizingMode::Fixed => config.intended_notional,
        crate::types::OrderSizingMode::EquityPct => equity * config.trade_equity_frac * config.leverage,
    };
    let inputs = crate::sizing::SizingInputs {
        equity,
        price: last_price,
        intended_notional: intended_notional_for_mode,
        leverage: config.leverage,
        min_notional_buffer_frac: config.min_notional_buffer_frac,
        max_over_margin_frac: config.max_over_margin_frac,
        max_equity_frac: config.max_equity_frac,
        policy: config.min_notional_policy,
    };

    let outcome = crate::sizing::compute_size(symbol, &rules, &inputs);
    let qty = match outcome {
        crate::sizing::SizingOutcome::Accept { qty, .. } => qty,
        crate::sizing::SizingOutcome::Skip { ref reason } => {
            warn!(symbol, reason, "sizing skipped entry");
            let record = outcome.to_record(symbol, intended_notional_for_mode, 0.0);
            if let Err(err) = crate::sizing::record_sizing_decision("state/sizing_history.jsonl", &record) {
                warn!(symbol, error = %err, "failed to append sizing history");
            }
            return Ok(());
        }
    };
    let intended_notional = qty * last_price;
    {
        let record = outcome.to_record(symbol, intended_notional_for_mode, qty);
        if let Err(err) = crate::sizing::record_sizing_decision("state/sizing_history.jsonl", &record) {
            warn!(symbol, error = %err, "failed to append sizing history");
        }
    }

    let exposure = exposure_store::read_exposure(&config.global_risk_path);
    let (account_equity_shared, total_notional) = exposure.aggregate(&config.account_tag, now_ms, config.exposure_max_age_sec);
    let account_equity = if account_equity_shared > 0.0 { account_equity_shared } else { equity };
    let own_existing_notional = state.positions.get(symbol).map_or(0.0, |p| p.qty.abs() * last_price);

    let verdict = state.risk_gate.check_entry(
        false,
        own_existing_notional + intended_notional,
        account_equity,
        total_notional + intended_notional,
        total_notional + intended_notional,
    );
    if verdict != crate::risk_gate::RiskVerdict::Approved {
        warn!(symbol, ?verdict, "risk gate rejected entry");
        return Ok(());
    }

    let hint_price = state.liquidations.hint_price_for_side(symbol, now_ms, last_price, side == Side::Buy);
    submit(state, symbol, venue, side, qty, last_price, now_ms, false, hint_price).await
}

async fn close_position(state: &EngineState, symbol: &str, venue: &str, side: Side, qty: f64, last_price: f64, now_ms: i64) -> Result<(), EngineError> {
    submit(state, symbol, venue, side, qty, last_price, now_ms, true, None).await
}

#[allow(clippy::too_many_arguments)]
async fn submit(
    state: &EngineState,
    symbol: &str,
    venue: &str,
    side: Side,
    qty: f64,
    last_price: f64,
    now_ms: i64,
    is_exit: bool,
    hint_price: Option<f64>,
) -> Result<(), EngineError> {
    let config = state.config.read().clone();
    let execution = ExecutionEngine::new(Arc::clone(&state.adapter), config.ioc_price_pad_bps, config.ioc_max_chase_bps);
    let request = OrderRequest {
        venue: venue.to_string(),
        symbol: symbol.to_string(),
        side,
        order_type: OrderType::Market,
        qty,
        price: None,
        client_order_id: None,
        meta: OrderMeta::default(),
    };

    match execution.execute_ioc_ladder_with_hint(&request, last_price, hint_price).await {
        ExecutionOutcome::Filled(update) => {
            if is_exit {
                state.cooldown.on_exit_filled(symbol, now_ms);
            } else {
                state.cooldown.on_entry_filled(symbol, now_ms);
            }
            let fill = state.positions.apply_fill(
                symbol,
                side,
                update.filled_qty,
                update.avg_fill_price.unwrap_or(last_price),
                update.fee.unwrap_or(0.0),
                now_ms,
            );
            let equity_now = state.adapter.get_equity().await.unwrap_or(0.0);
            if fill.closed {
                state.risk_gate.record_realized_pnl(fill.realized_pnl, equity_now);
            }
            let own_notional = state.positions.get(symbol).map_or(0.0, |p| p.qty.abs() * last_price);
            let tag = format!("{}#{}", config.account_tag, symbol);
            let _ = exposure_store::update_exposure(&config.global_risk_path, &tag, equity_now, own_notional, now_ms);
            let _ = journal::append_fill("state/fills.jsonl", &update);
            let _ = journal::append_equity_mark(
                "state/equity_history.jsonl",
                &journal::EquityMark { ts_ms: now_ms, equity: equity_now, realized_pnl_today: fill.realized_pnl },
            );
            Ok(())
        }
        ExecutionOutcome::Rejected { category, hint } => {
            warn!(symbol, category, hint, "order rejected");
            let raw = crate::errors::RawFailure { http_status: None, code: None, message: category.to_string() };
            let entry = state.cooldown.record_failure(symbol, &raw, now_ms);
            if let Err(err) = journal::append_cooldown_entry("state/cooldown_history.jsonl", &entry) {
                warn!(symbol, error = %err, "failed to append cooldown history");
            }
            Ok(())
        }
    }
}
