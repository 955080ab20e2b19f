// =============================================================================
// Runtime configuration — hot-reloadable engine settings with atomic save
// =============================================================================
//
// Every tunable parameter lives here so the engine can be reconfigured
// without a restart. Persistence uses an atomic tmp + rename pattern to
// prevent corruption on crash. All fields carry a serde default so adding
// new fields never breaks loading an older config file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::sizing::MinNotionalPolicy;
use crate::types::{AccountMode, OrderSizingMode, TradingMode};

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".to_string(), "ETHUSDT".to_string(), "SOLUSDT".to_string()]
}

fn default_poll_sec() -> u64 {
    5
}

fn default_entry_tf() -> String {
    "1m".to_string()
}

fn default_leverage() -> f64 {
    5.0
}

fn default_trade_equity_frac() -> f64 {
    0.02
}

fn default_min_notional_buffer_frac() -> f64 {
    0.05
}

fn default_max_over_margin_frac() -> f64 {
    0.25
}

fn default_max_equity_frac() -> f64 {
    0.5
}

fn default_min_notional_policy() -> MinNotionalPolicy {
    MinNotionalPolicy::Auto
}

fn default_intended_notional() -> f64 {
    0.0
}

fn default_stop_loss_pct() -> f64 {
    0.004
}

fn default_trailing_stop_pct() -> f64 {
    0.003
}

fn default_take_profit_net_pct() -> f64 {
    0.006
}

fn default_fee_rate() -> f64 {
    0.0004
}

fn default_slippage_rate() -> f64 {
    0.0002
}

fn default_ioc_price_pad_bps() -> f64 {
    2.0
}

fn default_ioc_max_chase_bps() -> f64 {
    15.0
}

fn default_rsi_period() -> u32 {
    14
}

fn default_rsi_overbought() -> f64 {
    70.0
}

fn default_rsi_oversold() -> f64 {
    30.0
}

fn default_bollinger_period() -> u32 {
    20
}

fn default_bollinger_std() -> f64 {
    2.0
}

fn default_min_vol_surge() -> f64 {
    1.5
}

fn default_max_spread_bps() -> f64 {
    10.0
}

fn default_max_1m_range_pct() -> f64 {
    0.02
}

fn default_max_1m_body_pct() -> f64 {
    0.015
}

fn default_trade_pressure_threshold() -> f64 {
    0.2
}

fn default_ob_imbalance_threshold() -> f64 {
    0.15
}

fn default_rsi_long_trigger() -> f64 {
    30.0
}

fn default_rsi_short_min() -> f64 {
    65.0
}

fn default_rsi_short_max() -> f64 {
    80.0
}

fn default_max_concurrent_positions() -> u32 {
    3
}

fn default_max_daily_loss_pct() -> f64 {
    3.0
}

fn default_max_account_exposure_frac() -> f64 {
    0.5
}

fn default_max_total_exposure_frac() -> f64 {
    1.0
}

fn default_max_position_per_symbol() -> f64 {
    0.5
}

fn default_max_account_notional() -> f64 {
    0.0
}

fn default_max_total_notional() -> f64 {
    0.0
}

fn default_exposure_max_age_sec() -> f64 {
    120.0
}

fn default_cooldown_backoff_mult() -> f64 {
    2.0
}

fn default_cooldown_max_sec() -> f64 {
    3600.0
}

fn default_cooldown_fail_window_sec() -> f64 {
    900.0
}

fn default_after_exit_fill_sec() -> f64 {
    0.0
}

fn default_after_entry_fill_sec() -> f64 {
    0.0
}

fn default_account_tag() -> String {
    "default".to_string()
}

fn default_global_risk_path() -> String {
    "state/exposure.json".to_string()
}

/// Scalp-entry filter thresholds and RSI zone parameters, grouped apart
/// from the risk/execution knobs because they are tuned together. A
/// threshold of `0.0` disables the filter it gates, per the "if configured"
/// convention used throughout the entry pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalpFilterParams {
    #[serde(default = "default_rsi_period")]
    pub rsi_period: u32,
    #[serde(default = "default_rsi_overbought")]
    pub rsi_overbought: f64,
    #[serde(default = "default_rsi_oversold")]
    pub rsi_oversold: f64,
    #[serde(default = "default_bollinger_period")]
    pub bollinger_period: u32,
    #[serde(default = "default_bollinger_std")]
    pub bollinger_std: f64,

    /// `last_1m_volume * close >= min_1m_trade_value`. 0 disables.
    #[serde(default)]
    pub min_1m_trade_value: f64,
    /// Top-of-book depth notional (bid + ask) must clear this. 0 disables.
    #[serde(default)]
    pub min_orderbook_notional: f64,
    /// `volume / SMA5(volume) >= min_vol_surge`.
    #[serde(default = "default_min_vol_surge")]
    pub min_vol_surge: f64,
    /// `(ask - bid) / mid * 10000 <= max_spread_bps`.
    #[serde(default = "default_max_spread_bps")]
    pub max_spread_bps: f64,
    /// `(high - low) / close <= max_1m_range_pct`.
    #[serde(default = "default_max_1m_range_pct")]
    pub max_1m_range_pct: f64,
    /// `|close - open| / open <= max_1m_body_pct`.
    #[serde(default = "default_max_1m_body_pct")]
    pub max_1m_body_pct: f64,
    /// Minimum in-window taker notional before pressure is trusted. 0 disables.
    #[serde(default)]
    pub min_pressure_notional: f64,
    /// `|pressure| >= trade_pressure_threshold`, also the directional gate `T_p`.
    #[serde(default = "default_trade_pressure_threshold")]
    pub trade_pressure_threshold: f64,
    /// `|imbalance| >= ob_imbalance_threshold`, also the directional gate `T_ob`.
    #[serde(default = "default_ob_imbalance_threshold")]
    pub ob_imbalance_threshold: f64,
    /// `|imbalance_delta| >= min_ob_imb_delta`. 0 disables.
    #[serde(default)]
    pub min_ob_imb_delta: f64,
    /// Minimum direction-aligned flow-rate z-score. 0 disables.
    #[serde(default)]
    pub min_flow_rate_z: f64,
    /// Minimum in-window trade count. 0 disables.
    #[serde(default)]
    pub min_trade_count: f64,
    /// Minimum large-trade share of the window. 0 disables.
    #[serde(default)]
    pub min_large_share: f64,

    #[serde(default)]
    pub use_rsi_cross: bool,
    #[serde(default = "default_rsi_long_trigger")]
    pub rsi_long_trigger: f64,
    #[serde(default = "default_rsi_short_min")]
    pub rsi_short_min: f64,
    #[serde(default = "default_rsi_short_max")]
    pub rsi_short_max: f64,
    #[serde(default)]
    pub require_reversal_candle: bool,
}

impl Default for ScalpFilterParams {
    fn default() -> Self {
        Self {
            rsi_period: default_rsi_period(),
            rsi_overbought: default_rsi_overbought(),
            rsi_oversold: default_rsi_oversold(),
            bollinger_period: default_bollinger_period(),
            bollinger_std: default_bollinger_std(),
            min_1m_trade_value: 0.0,
            min_orderbook_notional: 0.0,
            min_vol_surge: default_min_vol_surge(),
            max_spread_bps: default_max_spread_bps(),
            max_1m_range_pct: default_max_1m_range_pct(),
            max_1m_body_pct: default_max_1m_body_pct(),
            min_pressure_notional: 0.0,
            trade_pressure_threshold: default_trade_pressure_threshold(),
            ob_imbalance_threshold: default_ob_imbalance_threshold(),
            min_ob_imb_delta: 0.0,
            min_flow_rate_z: 0.0,
            min_trade_count: 0.0,
            min_large_share: 0.0,
            use_rsi_cross: false,
            rsi_long_trigger: default_rsi_long_trigger(),
            rsi_short_min: default_rsi_short_min(),
            rsi_short_max: default_rsi_short_max(),
            require_reversal_candle: false,
        }
    }
}

/// Per-cause cooldown backoff knobs, consumed by the cooldown manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownParams {
    #[serde(default = "default_cooldown_backoff_mult")]
    pub backoff_mult: f64,
    #[serde(default = "default_cooldown_max_sec")]
    pub max_sec: f64,
    #[serde(default = "default_cooldown_fail_window_sec")]
    pub fail_window_sec: f64,
    /// Quiet period imposed after a clean exit fill, separate from the
    /// failure-backoff cooldown (0 disables).
    #[serde(default = "default_after_exit_fill_sec")]
    pub after_exit_fill_sec: f64,
    /// Quiet period imposed after a clean entry fill (0 disables).
    #[serde(default = "default_after_entry_fill_sec")]
    pub after_entry_fill_sec: f64,
}

impl Default for CooldownParams {
    fn default() -> Self {
        Self {
            backoff_mult: default_cooldown_backoff_mult(),
            max_sec: default_cooldown_max_sec(),
            fail_window_sec: default_cooldown_fail_window_sec(),
            after_exit_fill_sec: default_after_exit_fill_sec(),
            after_entry_fill_sec: default_after_entry_fill_sec(),
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Operational modes ---------------------------------------------
    #[serde(default)]
    pub trading_mode: TradingMode,
    #[serde(default)]
    pub account_mode: AccountMode,
    #[serde(default = "default_true")]
    pub trading_enabled: bool,

    // --- Universe & cadence ---------------------------------------------
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    #[serde(default = "default_poll_sec")]
    pub poll_sec: u64,
    #[serde(default = "default_entry_tf")]
    pub entry_tf: String,

    // --- Sizing -----------------------------------------------------------
    #[serde(default)]
    pub order_sizing_mode: OrderSizingMode,
    /// Used when `order_sizing_mode == Fixed`; ignored otherwise.
    #[serde(default = "default_intended_notional")]
    pub intended_notional: f64,
    #[serde(default = "default_trade_equity_frac")]
    pub trade_equity_frac: f64,
    #[serde(default = "default_leverage")]
    pub leverage: f64,
    #[serde(default = "default_min_notional_buffer_frac")]
    pub min_notional_buffer_frac: f64,
    #[serde(default = "default_max_over_margin_frac")]
    pub max_over_margin_frac: f64,
    #[serde(default = "default_max_equity_frac")]
    pub max_equity_frac: f64,
    #[serde(default = "default_min_notional_policy")]
    pub min_notional_policy: MinNotionalPolicy,

    // --- Exits --------------------------------------------------------
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    #[serde(default = "default_trailing_stop_pct")]
    pub trailing_stop_pct: f64,
    #[serde(default = "default_take_profit_net_pct")]
    pub take_profit_net_pct: f64,
    #[serde(default = "default_fee_rate")]
    pub fee_rate: f64,
    #[serde(default = "default_slippage_rate")]
    pub slippage_rate: f64,

    // --- Execution ------------------------------------------------------
    #[serde(default = "default_true")]
    pub entry_use_ioc: bool,
    #[serde(default = "default_true")]
    pub exit_use_ioc: bool,
    #[serde(default = "default_ioc_price_pad_bps")]
    pub ioc_price_pad_bps: f64,
    #[serde(default = "default_ioc_max_chase_bps")]
    pub ioc_max_chase_bps: f64,

    // --- Scalp filters ----------------------------------------------------
    #[serde(default)]
    pub scalp_filters: ScalpFilterParams,

    // --- Risk -------------------------------------------------------------
    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: u32,
    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: f64,
    /// Fraction of account equity a single symbol's notional may reach.
    #[serde(default = "default_max_position_per_symbol")]
    pub max_position_per_symbol: f64,
    #[serde(default = "default_max_account_exposure_frac")]
    pub max_account_exposure_frac: f64,
    #[serde(default = "default_max_total_exposure_frac")]
    pub max_total_exposure_frac: f64,
    /// Absolute account-notional ceiling in quote currency. 0 disables.
    #[serde(default = "default_max_account_notional")]
    pub max_account_notional: f64,
    /// Absolute total-notional ceiling across all tracked tags. 0 disables.
    #[serde(default = "default_max_total_notional")]
    pub max_total_notional: f64,
    #[serde(default = "default_account_tag")]
    pub account_tag: String,
    #[serde(default = "default_global_risk_path")]
    pub global_risk_path: String,
    /// Shared exposure-store entries older than this are excluded from
    /// account/total notional aggregation.
    #[serde(default = "default_exposure_max_age_sec")]
    pub exposure_max_age_sec: f64,

    // --- Cooldown -----------------------------------------------------
    #[serde(default)]
    pub cooldown: CooldownParams,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Paused,
            account_mode: AccountMode::Demo,
            trading_enabled: true,
            symbols: default_symbols(),
            poll_sec: default_poll_sec(),
            entry_tf: default_entry_tf(),
            order_sizing_mode: OrderSizingMode::default(),
            intended_notional: default_intended_notional(),
            trade_equity_frac: default_trade_equity_frac(),
            leverage: default_leverage(),
            min_notional_buffer_frac: default_min_notional_buffer_frac(),
            max_over_margin_frac: default_max_over_margin_frac(),
            max_equity_frac: default_max_equity_frac(),
            min_notional_policy: default_min_notional_policy(),
            stop_loss_pct: default_stop_loss_pct(),
            trailing_stop_pct: default_trailing_stop_pct(),
            take_profit_net_pct: default_take_profit_net_pct(),
            fee_rate: default_fee_rate(),
            slippage_rate: default_slippage_rate(),
            entry_use_ioc: true,
            exit_use_ioc: true,
            ioc_price_pad_bps: default_ioc_price_pad_bps(),
            ioc_max_chase_bps: default_ioc_max_chase_bps(),
            scalp_filters: ScalpFilterParams::default(),
            max_concurrent_positions: default_max_concurrent_positions(),
            max_daily_loss_pct: default_max_daily_loss_pct(),
            max_position_per_symbol: default_max_position_per_symbol(),
            max_account_exposure_frac: default_max_account_exposure_frac(),
            max_total_exposure_frac: default_max_total_exposure_frac(),
            max_account_notional: default_max_account_notional(),
            max_total_notional: default_max_total_notional(),
            account_tag: default_account_tag(),
            global_risk_path: default_global_risk_path(),
            exposure_max_age_sec: default_exposure_max_age_sec(),
            cooldown: CooldownParams::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;
        info!(path = %path.display(), symbols = ?config.symbols, trading_mode = %config.trading_mode, "runtime config loaded");
        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).context("failed to serialise runtime config to JSON")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;
        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.account_mode, AccountMode::Demo);
        assert_eq!(cfg.symbols.len(), 3);
        assert_eq!(cfg.max_concurrent_positions, 3);
        assert!((cfg.scalp_filters.rsi_oversold - 30.0).abs() < f64::EPSILON);
        assert!((cfg.stop_loss_pct - 0.004).abs() < f64::EPSILON);
        assert_eq!(cfg.order_sizing_mode, OrderSizingMode::EquityPct);
        assert_eq!(cfg.min_notional_policy, MinNotionalPolicy::Auto);
        assert_eq!(cfg.max_account_notional, 0.0);
        assert_eq!(cfg.max_total_notional, 0.0);
        assert!((cfg.max_position_per_symbol - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.poll_sec, 5);
        assert!(cfg.entry_use_ioc);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "trading_mode": "Live", "symbols": ["ETHUSDT"] }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Live);
        assert_eq!(cfg.symbols, vec!["ETHUSDT"]);
        assert_eq!(cfg.max_concurrent_positions, 3);
        assert!((cfg.scalp_filters.trade_pressure_threshold - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.leverage, cfg2.leverage);
        assert_eq!(cfg.trading_mode, cfg2.trading_mode);
    }

    #[test]
    fn nested_cooldown_params_survive_partial_override() {
        let json = r#"{ "cooldown": { "max_sec": 7200.0 } }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.cooldown.max_sec, 7200.0);
        assert_eq!(cfg.cooldown.backoff_mult, 2.0);
    }
}
