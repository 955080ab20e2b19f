// =============================================================================
// Entry decision pipeline — market-condition filter chain + direction pick
// =============================================================================
//
// Twelve cheap checks run in a fixed order, each returning early with a
// reason on the first failure. None of them are direction-aware by
// themselves — they gate on whether the market is even worth looking at
// (enough volume, tight enough spread, a live enough tape). Direction is
// decided afterward by combining the RSI regime with the sign of the
// pressure/imbalance readings. The composite score is attached to the
// approval for journaling only — it never rejects a setup on its own.

use crate::market_data::{Candle, LiquidationSnapshot, OrderbookSnapshot, PressureSnapshot};
use crate::position::PositionSide;
use crate::runtime_config::ScalpFilterParams;
use crate::scoring::{direction_aligned_z, liq_component, ratio_component, ScoreComponents};
use crate::types::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldReason {
    InPosition,
    TradeValueTooLow,
    OrderbookDepthTooThin,
    VolumeSurgeTooLow,
    SpreadTooWide,
    RangeTooWide,
    BodyTooWide,
    PressureNotionalTooLow,
    PressureRatioTooLow,
    ImbalanceTooLow,
    ImbalanceDeltaTooLow,
    FlowOrTapeTooThin,
    RsiRegimeMismatch,
    DirectionAmbiguous,
    ReversalCandleMismatch,
}

impl HoldReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InPosition => "in_position",
            Self::TradeValueTooLow => "trade_value_too_low",
            Self::OrderbookDepthTooThin => "orderbook_depth_too_thin",
            Self::VolumeSurgeTooLow => "volume_surge_too_low",
            Self::SpreadTooWide => "spread_too_wide",
            Self::RangeTooWide => "range_too_wide",
            Self::BodyTooWide => "body_too_wide",
            Self::PressureNotionalTooLow => "pressure_notional_too_low",
            Self::PressureRatioTooLow => "pressure_ratio_too_low",
            Self::ImbalanceTooLow => "imbalance_too_low",
            Self::ImbalanceDeltaTooLow => "imbalance_delta_too_low",
            Self::FlowOrTapeTooThin => "flow_or_tape_too_thin",
            Self::RsiRegimeMismatch => "rsi_regime_mismatch",
            Self::DirectionAmbiguous => "direction_ambiguous",
            Self::ReversalCandleMismatch => "reversal_candle_mismatch",
        }
    }
}

pub struct EntryContext<'a> {
    pub has_open_position: bool,
    pub candle: &'a Candle,
    pub sma5_volume: f64,
    pub orderbook: Option<OrderbookSnapshot>,
    pub pressure: PressureSnapshot,
    pub flow_rate_z: f64,
    pub flow_accel_z: f64,
    pub liquidation: LiquidationSnapshot,
    pub rsi: f64,
    pub rsi_prev: f64,
    pub filters: &'a ScalpFilterParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryApproval {
    pub side: PositionSide,
    pub order_side: Side,
}

fn pressure_ratio(pressure: &PressureSnapshot) -> f64 {
    let total = pressure.total_notional();
    if total <= 0.0 {
        0.0
    } else {
        ((pressure.buy_notional - pressure.sell_notional) / total).clamp(-1.0, 1.0)
    }
}

fn rsi_long_ok(f: &ScalpFilterParams, rsi: f64, rsi_prev: f64) -> bool {
    if f.use_rsi_cross {
        rsi_prev < f.rsi_long_trigger && rsi >= f.rsi_long_trigger
    } else {
        rsi <= f.rsi_long_trigger
    }
}

fn rsi_short_ok(f: &ScalpFilterParams, rsi: f64, rsi_prev: f64) -> bool {
    if f.use_rsi_cross {
        rsi_prev > f.rsi_short_max && rsi >= f.rsi_short_min && rsi <= f.rsi_short_max
    } else {
        rsi >= f.rsi_short_min && rsi <= f.rsi_short_max
    }
}

/// Run the twelve-filter chain, then pick a direction. `Ok` carries the
/// chosen side plus the composite score breakdown for journaling; `Err`
/// carries the first failing reason.
pub fn evaluate(ctx: &EntryContext) -> Result<(EntryApproval, ScoreComponents), HoldReason> {
    if ctx.has_open_position {
        return Err(HoldReason::InPosition);
    }
    let f = ctx.filters;
    let candle = ctx.candle;
    let ob = ctx.orderbook.unwrap_or_default();

    if f.min_1m_trade_value > 0.0 && candle.volume * candle.close < f.min_1m_trade_value {
        return Err(HoldReason::TradeValueTooLow);
    }
    if f.min_orderbook_notional > 0.0 && ob.bid_depth + ob.ask_depth < f.min_orderbook_notional {
        return Err(HoldReason::OrderbookDepthTooThin);
    }
    let vol_surge = if ctx.sma5_volume > 0.0 { candle.volume / ctx.sma5_volume } else { 0.0 };
    if vol_surge < f.min_vol_surge {
        return Err(HoldReason::VolumeSurgeTooLow);
    }
    if ob.spread_bps > f.max_spread_bps {
        return Err(HoldReason::SpreadTooWide);
    }
    if candle.close > 0.0 && (candle.high - candle.low) / candle.close > f.max_1m_range_pct {
        return Err(HoldReason::RangeTooWide);
    }
    if candle.open > 0.0 && (candle.close - candle.open).abs() / candle.open > f.max_1m_body_pct {
        return Err(HoldReason::BodyTooWide);
    }
    if f.min_pressure_notional > 0.0 && ctx.pressure.total_notional() < f.min_pressure_notional {
        return Err(HoldReason::PressureNotionalTooLow);
    }
    let pressure = pressure_ratio(&ctx.pressure);
    if pressure.abs() < f.trade_pressure_threshold {
        return Err(HoldReason::PressureRatioTooLow);
    }
    if ob.imbalance.abs() < f.ob_imbalance_threshold {
        return Err(HoldReason::ImbalanceTooLow);
    }
    if f.min_ob_imb_delta > 0.0 && ob.imbalance_delta.abs() < f.min_ob_imb_delta {
        return Err(HoldReason::ImbalanceDeltaTooLow);
    }
    if f.min_flow_rate_z > 0.0 && ctx.flow_rate_z.abs() < f.min_flow_rate_z {
        return Err(HoldReason::FlowOrTapeTooThin);
    }
    if f.min_trade_count > 0.0 && (ctx.pressure.trade_count as f64) < f.min_trade_count {
        return Err(HoldReason::FlowOrTapeTooThin);
    }
    if f.min_large_share > 0.0 && ctx.pressure.large_share() < f.min_large_share {
        return Err(HoldReason::FlowOrTapeTooThin);
    }

    let rsi_long = rsi_long_ok(f, ctx.rsi, ctx.rsi_prev);
    let rsi_short = rsi_short_ok(f, ctx.rsi, ctx.rsi_prev);
    if !rsi_long && !rsi_short {
        return Err(HoldReason::RsiRegimeMismatch);
    }

    let long_pressure_ok = pressure >= f.trade_pressure_threshold
        && ob.imbalance >= f.ob_imbalance_threshold
        && (f.min_ob_imb_delta <= 0.0 || ob.imbalance_delta >= f.min_ob_imb_delta)
        && (f.min_flow_rate_z <= 0.0 || ctx.flow_accel_z >= f.min_flow_rate_z);
    let short_pressure_ok = pressure <= -f.trade_pressure_threshold
        && ob.imbalance <= -f.ob_imbalance_threshold
        && (f.min_ob_imb_delta <= 0.0 || ob.imbalance_delta <= -f.min_ob_imb_delta)
        && (f.min_flow_rate_z <= 0.0 || ctx.flow_accel_z <= -f.min_flow_rate_z);

    let side = if rsi_long && long_pressure_ok {
        PositionSide::Long
    } else if rsi_short && short_pressure_ok {
        PositionSide::Short
    } else {
        return Err(HoldReason::DirectionAmbiguous);
    };

    if f.require_reversal_candle {
        let ok = match side {
            PositionSide::Long => candle.close >= candle.open,
            PositionSide::Short => candle.close <= candle.open,
        };
        if !ok {
            return Err(HoldReason::ReversalCandleMismatch);
        }
    }

    let is_long = side == PositionSide::Long;
    let components = ScoreComponents {
        tp: ratio_component(pressure, f.trade_pressure_threshold),
        ob: ratio_component(ob.imbalance, f.ob_imbalance_threshold),
        ob_delta: ratio_component(ob.imbalance_delta, f.min_ob_imb_delta),
        flow_rate: ratio_component(ctx.flow_rate_z, f.min_flow_rate_z),
        flow_accel: ratio_component(ctx.flow_accel_z, f.min_flow_rate_z),
        trade_count: ratio_component(ctx.pressure.trade_count as f64, f.min_trade_count),
        large_share: ratio_component(ctx.pressure.large_share(), f.min_large_share),
        rate_z: direction_aligned_z(ctx.flow_rate_z, is_long),
        accel_z: direction_aligned_z(ctx.flow_accel_z, is_long),
        liq: liq_component(ctx.liquidation.buy_side_notional, ctx.liquidation.sell_side_notional, is_long),
    };

    let order_side = match side {
        PositionSide::Long => Side::Buy,
        PositionSide::Short => Side::Sell,
    };

    Ok((EntryApproval { side, order_side }, components))
}
