// =============================================================================
// Execution engine — IOC ladder protocol against a broker adapter
// =============================================================================
//
// Any adapter error is turned into a synthetic rejection rather than
// propagated raw. A ladder of IOC limit attempts walks the price further
// from the touch on each rejection, falling back to a market order once
// the chase budget (ioc_max_chase_bps) is exhausted. Every rung's fill is
// confirmed with a bounded retry/backoff poll before moving to the next
// rung, since a fill can arrive slightly after the initial response on a
// loaded venue.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::adapter::BrokerAdapter;
use crate::errors::{classify, EngineError, RawFailure};
use crate::types::{OrderRequest, OrderStatus, OrderType, OrderUpdate, Side};

/// Bounds the placement-retry loop (backoff `2^attempt`) and, separately,
/// the post-trade confirmation poll (backoff `1 + 0.75*attempt`). Both
/// loops share the same budget and base sleep; they address different
/// failure modes (the venue rejecting the call vs. the venue accepting it
/// but reporting the fill late) so they're kept as distinct loops.
const CONFIRM_MAX_ATTEMPTS: u32 = 3;
const CONFIRM_BASE_SLEEP_SEC: f64 = 0.5;

#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Filled(OrderUpdate),
    Rejected { category: &'static str, hint: &'static str },
}

pub struct ExecutionEngine {
    adapter: Arc<dyn BrokerAdapter>,
    price_pad_bps: f64,
    max_chase_bps: f64,
}

impl ExecutionEngine {
    pub fn new(adapter: Arc<dyn BrokerAdapter>, price_pad_bps: f64, max_chase_bps: f64) -> Self {
        Self { adapter, price_pad_bps, max_chase_bps }
    }

    /// Construct the ladder of limit prices to try: three rungs at
    /// `pad_bps`, the midpoint between `pad_bps` and `max_chase_bps`, and
    /// `max_chase_bps` itself, walking away from the touch price so an IOC
    /// order has a chance of crossing the spread. Buys walk up, sells walk
    /// down. `hint_price`, when present, pushes each rung further in the
    /// same direction — a liquidation cluster price a long entry wants to
    /// clear, or one a short wants to clear on the way down. Consecutive
    /// duplicate rungs (e.g. when `pad_bps == max_chase_bps`) collapse to
    /// one.
    fn ladder_prices(&self, side: Side, touch_price: f64, hint_price: Option<f64>) -> Vec<f64> {
        let pads = [self.price_pad_bps, (self.price_pad_bps + self.max_chase_bps) / 2.0, self.max_chase_bps];

        let mut prices: Vec<f64> = Vec::new();
        for pad in pads {
            let offset = touch_price * pad / 10_000.0;
            let mut price = match side {
                Side::Buy => touch_price + offset,
                Side::Sell => touch_price - offset,
            };
            if let Some(hint) = hint_price {
                price = match side {
                    Side::Buy => price.max(hint),
                    Side::Sell => price.min(hint),
                };
            }
            if prices.last() != Some(&price) {
                prices.push(price);
            }
        }
        prices
    }

    /// Run the IOC ladder, then fall back to a market order if any quantity
    /// remains unfilled after every rung.
    pub async fn execute_ioc_ladder(&self, base_request: &OrderRequest, touch_price: f64) -> ExecutionOutcome {
        self.execute_ioc_ladder_with_hint(base_request, touch_price, None).await
    }

    /// Same as [`execute_ioc_ladder`](Self::execute_ioc_ladder), but lets
    /// the caller supply a liquidation-cluster limit-price hint.
    ///
    /// Walks the ladder submitting an IOC order for whatever quantity still
    /// `remaining` after the prior rung, aggregating every partial fill's
    /// quantity and (qty-weighted) price. Any quantity still unfilled after
    /// the last rung is swept with a single market order. The synthesized
    /// `OrderUpdate`'s `order_id` joins every leg's id with `+`, and
    /// `avg_fill_price` is the qty-weighted average across all legs that
    /// filled anything. A ladder where nothing filled at all — including
    /// the market sweep — surfaces as `Rejected`, using the last leg's
    /// classified failure if one exists.
    pub async fn execute_ioc_ladder_with_hint(&self, base_request: &OrderRequest, touch_price: f64, hint_price: Option<f64>) -> ExecutionOutcome {
        let mut remaining = base_request.qty;
        let mut filled_total = 0.0;
        let mut wsum = 0.0;
        let mut fee_total = 0.0;
        let mut leg_ids: Vec<String> = Vec::new();
        let mut last_ts_ms = 0i64;
        let mut last_rejection: Option<ExecutionOutcome> = None;

        for price in self.ladder_prices(base_request.side, touch_price, hint_price) {
            if remaining <= 0.0 {
                break;
            }
            let mut request = base_request.clone();
            request.order_type = OrderType::Limit;
            request.qty = remaining;
            request.price = Some(price);
            request.client_order_id = Some(uuid::Uuid::new_v4().to_string());
            request.meta.time_in_force = Some("IOC".to_string());

            match self.place_and_confirm(&request).await {
                Ok(update) if update.is_successful_fill() => {
                    debug!(symbol = %request.symbol, price, filled_qty = update.filled_qty, "ioc rung filled");
                    let fill_price = update.avg_fill_price.unwrap_or(price);
                    remaining -= update.filled_qty;
                    filled_total += update.filled_qty;
                    wsum += fill_price * update.filled_qty;
                    fee_total += update.fee.unwrap_or(0.0);
                    last_ts_ms = update.ts_ms;
                    leg_ids.push(update.order_id);
                }
                Ok(update) => {
                    debug!(symbol = %request.symbol, price, "ioc rung unfilled, trying next rung");
                    if !update.order_id.is_empty() {
                        leg_ids.push(update.order_id);
                    }
                }
                Err(outcome) => last_rejection = Some(outcome),
            }
        }

        if remaining > 0.0 {
            match self.execute_market_fallback_leg(base_request, remaining).await {
                Ok(update) => {
                    let fill_price = update.avg_fill_price.unwrap_or(touch_price);
                    if update.filled_qty > 0.0 {
                        remaining -= update.filled_qty;
                        filled_total += update.filled_qty;
                        wsum += fill_price * update.filled_qty;
                        fee_total += update.fee.unwrap_or(0.0);
                        last_ts_ms = update.ts_ms;
                    }
                    if !update.order_id.is_empty() {
                        leg_ids.push(update.order_id);
                    }
                    warn!(symbol = %base_request.symbol, "ioc ladder exhausted, fell back to market order");
                }
                Err(outcome) => last_rejection = Some(outcome),
            }
        }

        if filled_total <= 0.0 {
            return last_rejection.unwrap_or(ExecutionOutcome::Rejected {
                category: "ladder_exhausted",
                hint: "every ioc rung and the market fallback went unfilled",
            });
        }

        let status = if remaining > 1e-9 { OrderStatus::PartiallyFilled } else { OrderStatus::Filled };
        let synthetic = OrderUpdate {
            venue: base_request.venue.clone(),
            order_id: leg_ids.join("+"),
            client_order_id: base_request.client_order_id.clone(),
            symbol: base_request.symbol.clone(),
            status,
            filled_qty: filled_total,
            avg_fill_price: Some(wsum / filled_total),
            fee: Some(fee_total),
            ts_ms: last_ts_ms,
            raw: None,
        };
        info!(symbol = %base_request.symbol, filled_total, status = ?synthetic.status, "ioc ladder completed");
        ExecutionOutcome::Filled(synthetic)
    }

    async fn execute_market_fallback_leg(&self, base_request: &OrderRequest, qty: f64) -> Result<OrderUpdate, ExecutionOutcome> {
        let mut request = base_request.clone();
        request.order_type = OrderType::Market;
        request.qty = qty;
        request.price = None;
        request.client_order_id = Some(uuid::Uuid::new_v4().to_string());

        self.place_and_confirm(&request).await
    }

    /// Place an order, retrying placement itself with `2^attempt` backoff on
    /// adapter error, then run post-trade confirmation polling on success.
    async fn place_and_confirm(&self, request: &OrderRequest) -> Result<OrderUpdate, ExecutionOutcome> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.adapter.place_order(request).await {
                Ok(update) => return Ok(self.confirm_fill(request, update).await),
                Err(err) if attempt >= CONFIRM_MAX_ATTEMPTS => return Err(self.classify_rejection(&err)),
                Err(err) => {
                    debug!(symbol = %request.symbol, attempt, error = %err, "order attempt failed, retrying");
                    let sleep_sec = CONFIRM_BASE_SLEEP_SEC * 2f64.powi(attempt as i32 - 1);
                    tokio::time::sleep(Duration::from_secs_f64(sleep_sec)).await;
                }
            }
        }
    }

    /// Some adapters report `status=NEW, filled_qty=0` immediately after a
    /// fill has actually landed on the venue. When the placement response
    /// looks unresolved and carries an order id, poll `get_order_update` a
    /// bounded number of times before trusting it at face value. Adapters
    /// that don't implement `get_order_update` (`EngineError::Unsupported`)
    /// skip the poll entirely.
    async fn confirm_fill(&self, request: &OrderRequest, update: OrderUpdate) -> OrderUpdate {
        let unresolved = update.filled_qty == 0.0
            && !matches!(update.status, OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected)
            && !update.order_id.is_empty();
        if !unresolved {
            return update;
        }

        for attempt in 0..CONFIRM_MAX_ATTEMPTS {
            let sleep_sec = CONFIRM_BASE_SLEEP_SEC * (1.0 + 0.75 * attempt as f64);
            tokio::time::sleep(Duration::from_secs_f64(sleep_sec)).await;

            match self.adapter.get_order_update(&update.order_id).await {
                Ok(polled) if polled.filled_qty > 0.0 || matches!(polled.status, OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected) => {
                    debug!(symbol = %request.symbol, order_id = %update.order_id, attempt, "confirmation poll found a meaningful update");
                    return polled;
                }
                Ok(_) => continue,
                Err(EngineError::Unsupported(_)) => break,
                Err(err) => {
                    debug!(symbol = %request.symbol, order_id = %update.order_id, error = %err, "confirmation poll failed, keeping original update");
                    break;
                }
            }
        }
        update
    }

    fn classify_rejection(&self, err: &EngineError) -> ExecutionOutcome {
        let raw = RawFailure { http_status: None, code: None, message: err.to_string() };
        let category = classify(&raw);
        ExecutionOutcome::Rejected {
            category: category.as_str(),
            hint: crate::errors::recommend_action(category),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::paper::PaperAdapter;
    use crate::types::OrderMeta;

    fn sample_request(side: Side) -> OrderRequest {
        OrderRequest {
            venue: "paper".into(),
            symbol: "BTCUSDT".into(),
            side,
            order_type: OrderType::Market,
            qty: 1.0,
            price: None,
            client_order_id: None,
            meta: OrderMeta::default(),
        }
    }

    #[test]
    fn ladder_prices_walk_away_from_touch_for_buys() {
        let engine = ExecutionEngine::new(Arc::new(PaperAdapter::new("paper", 1000.0)), 2.0, 6.0);
        let prices = engine.ladder_prices(Side::Buy, 100.0, None);
        assert_eq!(prices.len(), 3);
        assert!(prices[0] < prices[1]);
        assert!(prices[1] < prices[2]);
        assert!(prices.iter().all(|p| *p > 100.0));
    }

    #[test]
    fn ladder_prices_walk_down_for_sells() {
        let engine = ExecutionEngine::new(Arc::new(PaperAdapter::new("paper", 1000.0)), 2.0, 6.0);
        let prices = engine.ladder_prices(Side::Sell, 100.0, None);
        assert!(prices.iter().all(|p| *p < 100.0));
    }

    #[test]
    fn buy_ladder_is_pushed_up_to_clear_a_liquidation_hint_above_it() {
        let engine = ExecutionEngine::new(Arc::new(PaperAdapter::new("paper", 1000.0)), 2.0, 6.0);
        let prices = engine.ladder_prices(Side::Buy, 100.0, Some(101.5));
        assert!(prices.iter().all(|p| *p >= 101.5));
    }

    #[test]
    fn sell_ladder_is_pushed_down_to_clear_a_liquidation_hint_below_it() {
        let engine = ExecutionEngine::new(Arc::new(PaperAdapter::new("paper", 1000.0)), 2.0, 6.0);
        let prices = engine.ladder_prices(Side::Sell, 100.0, Some(98.5));
        assert!(prices.iter().all(|p| *p <= 98.5));
    }

    #[test]
    fn hint_weaker_than_the_rung_does_not_pull_the_price_back() {
        let engine = ExecutionEngine::new(Arc::new(PaperAdapter::new("paper", 1000.0)), 2.0, 6.0);
        let plain = engine.ladder_prices(Side::Buy, 100.0, None);
        let hinted = engine.ladder_prices(Side::Buy, 100.0, Some(100.01));
        assert_eq!(plain, hinted);
    }

    #[tokio::test]
    async fn ioc_ladder_fills_on_first_rung_against_paper_adapter() {
        let adapter = Arc::new(PaperAdapter::new("paper", 1000.0));
        adapter.set_price("BTCUSDT", 100.0);
        let engine = ExecutionEngine::new(adapter, 2.0, 6.0);
        let outcome = engine.execute_ioc_ladder(&sample_request(Side::Buy), 100.0).await;
        assert!(matches!(outcome, ExecutionOutcome::Filled(_)));
    }

    struct AlwaysRejectAdapter;

    #[async_trait::async_trait]
    impl BrokerAdapter for AlwaysRejectAdapter {
        fn venue(&self) -> &str {
            "mock"
        }

        async fn place_order(&self, _request: &OrderRequest) -> Result<OrderUpdate, EngineError> {
            Err(EngineError::ExchangeFilter("MIN_NOTIONAL filter failure".to_string()))
        }

        async fn get_last_price(&self, _symbol: &str) -> Result<f64, EngineError> {
            Ok(100.0)
        }

        async fn get_equity(&self) -> Result<f64, EngineError> {
            Ok(1000.0)
        }

        async fn get_positions(&self) -> Result<Vec<(String, f64)>, EngineError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn persistent_rejection_falls_through_to_rejected_outcome() {
        let engine = ExecutionEngine::new(Arc::new(AlwaysRejectAdapter), 2.0, 6.0);
        let outcome = engine.execute_ioc_ladder(&sample_request(Side::Buy), 100.0).await;
        assert!(matches!(outcome, ExecutionOutcome::Rejected { .. }));
    }

    fn mock_update(order_id: &str, filled_qty: f64, status: OrderStatus, avg_fill_price: f64) -> OrderUpdate {
        OrderUpdate {
            venue: "mock".into(),
            order_id: order_id.into(),
            client_order_id: None,
            symbol: "BTCUSDT".into(),
            status,
            filled_qty,
            avg_fill_price: Some(avg_fill_price),
            fee: None,
            ts_ms: 0,
            raw: None,
        }
    }

    #[tokio::test]
    async fn partial_fills_across_rungs_and_market_fallback_aggregate_into_one_update() {
        use crate::adapter::mock::MockAdapter;

        let adapter = Arc::new(MockAdapter::new("mock"));
        // Rung 1 fills 3, rung 2 fills 4, rung 3 goes unfilled, market sweep fills the last 3.
        adapter.push_order_response(Ok(mock_update("r1", 3.0, OrderStatus::PartiallyFilled, 100.0)));
        adapter.push_order_response(Ok(mock_update("r2", 4.0, OrderStatus::PartiallyFilled, 101.0)));
        adapter.push_order_response(Ok(mock_update("r3", 0.0, OrderStatus::Rejected, 0.0)));
        adapter.push_order_response(Ok(mock_update("r4", 3.0, OrderStatus::Filled, 102.0)));

        let engine = ExecutionEngine::new(adapter, 2.0, 6.0);
        let mut request = sample_request(Side::Buy);
        request.qty = 10.0;
        let outcome = engine.execute_ioc_ladder(&request, 100.0).await;

        match outcome {
            ExecutionOutcome::Filled(update) => {
                assert_eq!(update.status, OrderStatus::Filled);
                assert_eq!(update.filled_qty, 10.0);
                assert_eq!(update.order_id, "r1+r2+r3+r4");
                assert!((update.avg_fill_price.unwrap() - 101.0).abs() < 1e-9);
            }
            ExecutionOutcome::Rejected { .. } => panic!("expected an aggregated fill"),
        }
    }

    #[tokio::test]
    async fn ladder_with_no_fills_anywhere_surfaces_as_rejected() {
        use crate::adapter::mock::MockAdapter;

        let adapter = Arc::new(MockAdapter::new("mock"));
        for id in ["r1", "r2", "r3", "r4"] {
            adapter.push_order_response(Ok(mock_update(id, 0.0, OrderStatus::Rejected, 0.0)));
        }
        let engine = ExecutionEngine::new(adapter, 2.0, 6.0);
        let outcome = engine.execute_ioc_ladder(&sample_request(Side::Buy), 100.0).await;
        assert!(matches!(outcome, ExecutionOutcome::Rejected { category: "ladder_exhausted", .. }));
    }

    #[tokio::test]
    async fn unresolved_fill_is_confirmed_via_get_order_update_poll() {
        use crate::adapter::mock::MockAdapter;

        let adapter = Arc::new(MockAdapter::new("mock"));
        // Placement reports NEW/0 filled; the poll then finds the real fill.
        adapter.push_order_response(Ok(mock_update("r1", 0.0, OrderStatus::New, 0.0)));
        adapter.push_order_update(Ok(mock_update("r1", 1.0, OrderStatus::Filled, 100.0)));

        let engine = ExecutionEngine::new(adapter, 2.0, 6.0);
        let outcome = engine.execute_ioc_ladder(&sample_request(Side::Buy), 100.0).await;
        match outcome {
            ExecutionOutcome::Filled(update) => {
                assert_eq!(update.filled_qty, 1.0);
                assert_eq!(update.order_id, "r1");
            }
            ExecutionOutcome::Rejected { .. } => panic!("expected the poll to surface the confirmed fill"),
        }
    }
}
