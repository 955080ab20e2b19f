// =============================================================================
// Exchange-rules sizing — turn an intended notional into a valid order qty
// =============================================================================
//
// Every venue rounds quantity to a step size and refuses orders below a
// minimum notional. This module turns "I want to risk $200 on this symbol"
// into a quantity that will actually be accepted, using one of three
// policies when the rounded quantity falls short of the minimum notional.
// Every decision is appended to a debug tape (state/sizing_history.jsonl)
// in the append-only style the cooldown and fills journals use, so a human
// can replay exactly why a trade was skipped or bumped.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::SymbolRules;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinNotionalPolicy {
    /// Skip the trade outright if rounded notional is below the minimum.
    Skip,
    /// Always bump quantity up to clear the minimum, bounded by the cap.
    Bump,
    /// Bump if the increase stays within the cap, otherwise skip.
    Auto,
}

#[derive(Debug, Clone)]
pub struct SizingInputs {
    pub equity: f64,
    pub price: f64,
    /// The notional the caller wants to open, before exchange-rules
    /// rounding. Computed upstream from `order_sizing_mode` — either a
    /// fixed dollar figure or `equity * trade_equity_frac * leverage`.
    pub intended_notional: f64,
    pub leverage: f64,
    pub min_notional_buffer_frac: f64,
    /// `auto` policy: how far the margin a bump would require may exceed
    /// the originally intended margin before the trade is rejected.
    pub max_over_margin_frac: f64,
    /// `auto` policy: the hard ceiling on required margin as a fraction of
    /// total equity, independent of how it compares to the intended margin.
    pub max_equity_frac: f64,
    pub policy: MinNotionalPolicy,
}

#[derive(Debug, Clone, Serialize)]
pub struct SizingRecord {
    pub symbol: String,
    pub intended_notional: f64,
    pub rounded_qty: f64,
    pub final_qty: f64,
    pub bumped: bool,
    pub skip_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub enum SizingOutcome {
    Accept { qty: f64, bumped: bool },
    Skip { reason: String },
}

fn round_down_to_step(qty: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return qty;
    }
    (qty / step).floor() * step
}

fn round_up_to_step(qty: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return qty;
    }
    (qty / step).ceil() * step
}

/// Compute an order quantity for `symbol` given `rules`, applying the
/// configured minimum-notional policy when the naive quantity falls short.
pub fn compute_size(symbol: &str, rules: &SymbolRules, inputs: &SizingInputs) -> SizingOutcome {
    if inputs.price <= 0.0 {
        return SizingOutcome::Skip { reason: "non_positive_price".to_string() };
    }

    let intended_notional = inputs.intended_notional;
    let intended_margin = intended_notional / inputs.leverage.max(f64::EPSILON);
    let naive_qty = intended_notional / inputs.price;
    let mut qty = round_down_to_step(naive_qty, rules.qty_step).max(rules.min_qty);
    let mut bumped = false;

    let min_notional = rules.min_notional.unwrap_or(0.0) * (1.0 + inputs.min_notional_buffer_frac);
    let notional = qty * inputs.price;
    if notional < min_notional {
        let target = min_notional;
        let needed_qty = round_up_to_step(target / inputs.price, rules.qty_step).max(rules.min_qty);

        match inputs.policy {
            MinNotionalPolicy::Skip => {
                debug!(symbol, intended_notional, min_notional, "sizing skipped: below minimum notional");
                return SizingOutcome::Skip { reason: format!("MIN_NOTIONAL<{min_notional}") };
            }
            MinNotionalPolicy::Bump => {
                qty = needed_qty;
                bumped = true;
            }
            MinNotionalPolicy::Auto => {
                let req_margin = target / inputs.leverage;
                let over_intended = req_margin > intended_margin * (1.0 + inputs.max_over_margin_frac);
                let over_equity = req_margin > inputs.equity * inputs.max_equity_frac;
                if over_intended || over_equity {
                    debug!(symbol, req_margin, intended_margin, "sizing skipped: bump would require excess margin");
                    return SizingOutcome::Skip { reason: format!("MIN_NOTIONAL<{min_notional}") };
                }
                qty = needed_qty;
                bumped = true;
            }
        }
    }

    if qty > rules.max_qty {
        return SizingOutcome::Skip { reason: "QTY_ABOVE_MAX".to_string() };
    }

    SizingOutcome::Accept { qty, bumped }
}

/// Append a sizing decision to the debug tape.
pub fn record_sizing_decision(path: impl AsRef<Path>, record: &SizingRecord) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let line = serde_json::to_string(record).context("failed to serialise sizing record")?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open sizing history at {}", path.display()))?;
    writeln!(file, "{line}").with_context(|| format!("failed to append to sizing history at {}", path.display()))?;
    Ok(())
}

impl SizingOutcome {
    pub fn to_record(&self, symbol: &str, intended_notional: f64, rounded_qty: f64) -> SizingRecord {
        match self {
            SizingOutcome::Accept { qty, bumped } => SizingRecord {
                symbol: symbol.to_string(),
                intended_notional,
                rounded_qty,
                final_qty: *qty,
                bumped: *bumped,
                skip_reason: None,
            },
            SizingOutcome::Skip { reason } => SizingRecord {
                symbol: symbol.to_string(),
                intended_notional,
                rounded_qty,
                final_qty: 0.0,
                bumped: false,
                skip_reason: Some(reason.clone()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> SymbolRules {
        SymbolRules { qty_step: 0.001, min_qty: 0.001, max_qty: 100.0, min_notional: Some(5.0) }
    }

    fn inputs(policy: MinNotionalPolicy) -> SizingInputs {
        SizingInputs {
            equity: 1000.0,
            price: 100.0,
            intended_notional: 0.5, // 1000 * 0.0005 * 1.0 — deliberately tiny to trigger min-notional bump
            leverage: 1.0,
            min_notional_buffer_frac: 0.0,
            max_over_margin_frac: 0.25,
            max_equity_frac: 0.5,
            policy,
        }
    }

    #[test]
    fn happy_path_produces_a_qty() {
        let out = compute_size("BTCUSDT", &rules(), &SizingInputs { intended_notional: 20.0, ..inputs(MinNotionalPolicy::Auto) });
        match out {
            SizingOutcome::Accept { qty, bumped } => {
                assert!(qty > 0.0);
                assert!(!bumped);
            }
            SizingOutcome::Skip { .. } => panic!("expected accept"),
        }
    }

    #[test]
    fn skip_policy_rejects_below_min_notional() {
        let out = compute_size("BTCUSDT", &rules(), &inputs(MinNotionalPolicy::Skip));
        assert!(matches!(out, SizingOutcome::Skip { reason } if reason.starts_with("MIN_NOTIONAL")));
    }

    #[test]
    fn bump_policy_bumps_regardless_of_margin_cost() {
        let out = compute_size("BTCUSDT", &rules(), &inputs(MinNotionalPolicy::Bump));
        match out {
            SizingOutcome::Accept { qty, bumped } => {
                assert!(bumped);
                assert!(qty * 100.0 >= 5.0);
            }
            SizingOutcome::Skip { .. } => panic!("expected bump to succeed"),
        }
    }

    #[test]
    fn below_min_qty_is_raised_rather_than_skipped() {
        let tiny_rules = SymbolRules { qty_step: 1.0, min_qty: 1.0, max_qty: 100.0, min_notional: Some(5.0) };
        let wide_margin = SizingInputs { max_over_margin_frac: 50.0, max_equity_frac: 1.0, ..inputs(MinNotionalPolicy::Auto) };
        let out = compute_size("BTCUSDT", &tiny_rules, &wide_margin);
        match out {
            SizingOutcome::Accept { qty, .. } => assert_eq!(qty, 1.0),
            SizingOutcome::Skip { reason } => panic!("expected accept, got skip: {reason}"),
        }
    }

    #[test]
    fn auto_policy_accepts_when_required_margin_stays_within_both_caps() {
        // intended_margin = 1000*0.004 = 4; bumping to min_notional=5 needs req_margin=5,
        // which is within 4*(1+0.25)=5 and well under 1000*0.5=500.
        let generous = SizingInputs { intended_notional: 4.0, ..inputs(MinNotionalPolicy::Auto) };
        let out = compute_size("BTCUSDT", &rules(), &generous);
        match out {
            SizingOutcome::Accept { bumped, .. } => assert!(bumped),
            SizingOutcome::Skip { .. } => panic!("expected the bump to clear both margin caps"),
        }
    }

    #[test]
    fn auto_policy_rejects_when_bump_would_exceed_the_over_margin_cap() {
        // intended_margin = 1000*0.0005 = 0.5; req_margin to reach min_notional=5 is 5,
        // far past 0.5*(1+0.25)=0.625.
        let out = compute_size("BTCUSDT", &rules(), &inputs(MinNotionalPolicy::Auto));
        assert!(matches!(out, SizingOutcome::Skip { reason } if reason.starts_with("MIN_NOTIONAL")));
    }

    #[test]
    fn auto_policy_rejects_when_bump_would_exceed_the_equity_cap() {
        let tight_equity_cap = SizingInputs { max_over_margin_frac: 50.0, max_equity_frac: 0.001, ..inputs(MinNotionalPolicy::Auto) };
        let out = compute_size("BTCUSDT", &rules(), &tight_equity_cap);
        assert!(matches!(out, SizingOutcome::Skip { reason } if reason.starts_with("MIN_NOTIONAL")));
    }

    #[test]
    fn qty_above_exchange_max_is_rejected() {
        let tiny_max = SymbolRules { qty_step: 0.001, min_qty: 0.001, max_qty: 0.001, min_notional: Some(5.0) };
        let generous = SizingInputs { intended_notional: 5000.0, leverage: 10.0, ..inputs(MinNotionalPolicy::Auto) };
        let out = compute_size("BTCUSDT", &tiny_max, &generous);
        assert!(matches!(out, SizingOutcome::Skip { reason } if reason == "QTY_ABOVE_MAX"));
    }
}
