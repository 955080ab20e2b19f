// =============================================================================
// Composite setup score — fixed-weight blend of the rolling feature books
// =============================================================================
//
// Every component and its weight is pinned, because the set of inputs is
// exactly the four feature books the control loop already maintains. The
// score does not gate entry on its own — the twelve-filter pipeline does
// that — it is attached to the journal so an operator can see how
// convinced the blend was of a setup it took (or skipped).

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ScoreComponents {
    pub tp: f64,
    pub ob: f64,
    pub ob_delta: f64,
    pub flow_rate: f64,
    pub flow_accel: f64,
    pub trade_count: f64,
    pub large_share: f64,
    pub rate_z: f64,
    pub accel_z: f64,
    pub liq: f64,
}

struct Weight {
    tp: f64,
    ob: f64,
    ob_delta: f64,
    flow_rate: f64,
    flow_accel: f64,
    trade_count: f64,
    large_share: f64,
    rate_z: f64,
    accel_z: f64,
    liq: f64,
}

const WEIGHTS: Weight = Weight {
    tp: 0.80,
    ob: 0.80,
    ob_delta: 0.35,
    flow_rate: 0.35,
    flow_accel: 0.35,
    trade_count: 0.25,
    large_share: 0.20,
    rate_z: 0.30,
    accel_z: 0.30,
    liq: 0.25,
};

/// Normalize a magnitude against its own gating threshold into `[0, 1]`:
/// a ratio clamp when the threshold is configured, or a soft `tanh` curve
/// when the filter it gates is disabled (threshold `0.0`).
pub fn ratio_component(magnitude: f64, threshold: f64) -> f64 {
    if threshold <= 0.0 {
        (magnitude.abs() / 0.25).tanh()
    } else {
        (magnitude.abs() / threshold.max(1e-9)).clamp(0.0, 1.0)
    }
}

/// Direction-aligned z-score component: only the z-score's contribution in
/// the candidate's own direction counts, squashed by `tanh(z/3)`.
pub fn direction_aligned_z(z: f64, is_long: bool) -> f64 {
    let z_dir = if is_long { z } else { -z };
    (z_dir.max(0.0) / 3.0).tanh()
}

/// Liquidation-cluster bias component: forced buys (short liquidations)
/// favor longs, forced sells (long liquidations) favor shorts.
pub fn liq_component(buy_notional: f64, sell_notional: f64, is_long: bool) -> f64 {
    let total = buy_notional + sell_notional;
    if total <= 0.0 {
        return 0.0;
    }
    let bias = (buy_notional - sell_notional) / total;
    let bias_dir = if is_long { bias } else { -bias };
    (bias_dir.max(0.0) / 0.6).clamp(0.0, 1.0)
}

impl ScoreComponents {
    /// Weighted sum of the ten normalized components. Unbounded above;
    /// a fully-aligned extreme setup lands well past 1.0 (see the worked
    /// flow-spike example), since this is a confidence blend, not a
    /// probability.
    pub fn composite(&self) -> f64 {
        self.tp * WEIGHTS.tp
            + self.ob * WEIGHTS.ob
            + self.ob_delta * WEIGHTS.ob_delta
            + self.flow_rate * WEIGHTS.flow_rate
            + self.flow_accel * WEIGHTS.flow_accel
            + self.trade_count * WEIGHTS.trade_count
            + self.large_share * WEIGHTS.large_share
            + self.rate_z * WEIGHTS.rate_z
            + self.accel_z * WEIGHTS.accel_z
            + self.liq * WEIGHTS.liq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_zero_components_score_zero() {
        let c = ScoreComponents::default();
        assert_eq!(c.composite(), 0.0);
    }

    #[test]
    fn ratio_component_clamps_at_one_when_above_threshold() {
        assert_eq!(ratio_component(0.4, 0.2), 1.0);
    }

    #[test]
    fn ratio_component_scales_linearly_below_threshold() {
        assert!((ratio_component(0.1, 0.2) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn ratio_component_falls_back_to_tanh_when_threshold_disabled() {
        let c = ratio_component(0.25, 0.0);
        assert!((c - 0.25_f64.tanh()).abs() < 1e-9);
    }

    #[test]
    fn direction_aligned_z_rewards_only_matching_direction() {
        assert!(direction_aligned_z(4.0, true) > 0.9);
        assert_eq!(direction_aligned_z(4.0, false), 0.0);
    }

    #[test]
    fn liq_component_flips_sign_with_direction() {
        let long_component = liq_component(800.0, 200.0, true);
        let short_component = liq_component(800.0, 200.0, false);
        assert!(long_component > 0.0);
        assert_eq!(short_component, 0.0);
    }

    #[test]
    fn flow_spike_long_composite_matches_worked_example() {
        let c = ScoreComponents {
            tp: ratio_component(0.4, 0.2),
            ob: ratio_component(0.3, 0.15),
            ob_delta: ratio_component(0.10, 0.10),
            flow_rate: ratio_component(4.0, 4.0),
            flow_accel: ratio_component(4.0, 4.0),
            trade_count: ratio_component(1.0, 1.0),
            large_share: ratio_component(0.5, 0.5),
            rate_z: direction_aligned_z(4.0, true),
            accel_z: direction_aligned_z(4.0, true),
            liq: liq_component(900.0, 100.0, true),
        };
        assert!((c.composite() - 3.95).abs() < 0.05);
    }
}
