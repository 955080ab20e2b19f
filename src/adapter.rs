// =============================================================================
// Broker adapter — the venue-agnostic boundary the control loop talks to
// =============================================================================
//
// Nothing upstream of this trait knows which exchange it is trading on.
// An async trait lets paper trading, a test double, and a real venue
// client all satisfy the same interface. Capability negotiation
// (`supports`) lets the control loop skip optional behavior — hedge-mode
// position sides, leverage control — on adapters that don't implement it
// rather than erroring.

use async_trait::async_trait;

use crate::errors::EngineError;
use crate::types::{OrderRequest, OrderUpdate, SymbolRules};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    CancelOrder,
    ListOpenOrders,
    SetLeverage,
    DualSidePosition,
    SyncTime,
    /// The venue allows opening a short position (selling without an
    /// existing long to close). Spot venues don't; futures/perp venues do.
    ShortSelling,
}

#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    fn venue(&self) -> &str;

    /// Capability negotiation. Default: none of the optional behaviors are
    /// supported; concrete adapters override per capability they implement.
    fn supports(&self, _cap: Capability) -> bool {
        false
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderUpdate, EngineError>;

    async fn get_last_price(&self, symbol: &str) -> Result<f64, EngineError>;

    async fn get_equity(&self) -> Result<f64, EngineError>;

    async fn get_positions(&self) -> Result<Vec<(String, f64)>, EngineError>;

    // --- Optional methods; default to Unsupported ------------------------

    async fn get_order_update(&self, _venue_order_id: &str) -> Result<OrderUpdate, EngineError> {
        Err(EngineError::Unsupported("get_order_update"))
    }

    async fn get_symbol_rules(&self, _symbol: &str) -> Result<SymbolRules, EngineError> {
        Err(EngineError::Unsupported("get_symbol_rules"))
    }

    async fn cancel_order(&self, _venue_order_id: &str) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("cancel_order"))
    }

    async fn list_open_orders(&self, _symbol: &str) -> Result<Vec<OrderUpdate>, EngineError> {
        Err(EngineError::Unsupported("list_open_orders"))
    }

    async fn set_leverage(&self, _symbol: &str, _leverage: f64) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("set_leverage"))
    }

    async fn sync_time(&self) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("sync_time"))
    }
}

pub mod paper {
    use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

    use async_trait::async_trait;
    use parking_lot::RwLock;
    use std::collections::HashMap;

    use super::*;
    use crate::types::{OrderStatus, OrderType, Side};

    /// A deterministic fill-at-requested-price adapter for paper trading and
    /// tests. Market orders fill immediately at the last price pushed via
    /// `set_price`; limit orders fill immediately at their own limit price.
    pub struct PaperAdapter {
        venue: String,
        equity: RwLock<f64>,
        last_prices: RwLock<HashMap<String, f64>>,
        positions: RwLock<HashMap<String, f64>>,
        next_order_id: AtomicU64,
        clock_ms: AtomicI64,
    }

    impl PaperAdapter {
        pub fn new(venue: impl Into<String>, starting_equity: f64) -> Self {
            Self {
                venue: venue.into(),
                equity: RwLock::new(starting_equity),
                last_prices: RwLock::new(HashMap::new()),
                positions: RwLock::new(HashMap::new()),
                next_order_id: AtomicU64::new(1),
                clock_ms: AtomicI64::new(0),
            }
        }

        pub fn set_price(&self, symbol: &str, price: f64) {
            self.last_prices.write().insert(symbol.to_string(), price);
        }

        pub fn set_clock_ms(&self, ms: i64) {
            self.clock_ms.store(ms, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl BrokerAdapter for PaperAdapter {
        fn venue(&self) -> &str {
            &self.venue
        }

        /// Paper trading emulates a futures/perp venue, so shorting is
        /// allowed; everything else optional stays unsupported.
        fn supports(&self, cap: Capability) -> bool {
            matches!(cap, Capability::ShortSelling)
        }

        async fn place_order(&self, request: &OrderRequest) -> Result<OrderUpdate, EngineError> {
            let fill_price = match request.order_type {
                OrderType::Market => *self
                    .last_prices
                    .read()
                    .get(&request.symbol)
                    .ok_or_else(|| EngineError::Internal(format!("no price for {}", request.symbol)))?,
                OrderType::Limit => request
                    .price
                    .ok_or_else(|| EngineError::Internal("limit order missing price".to_string()))?,
            };

            let delta = match request.side {
                Side::Buy => request.qty,
                Side::Sell => -request.qty,
            };
            *self.positions.write().entry(request.symbol.clone()).or_insert(0.0) += delta;

            let order_id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
            Ok(OrderUpdate {
                venue: self.venue.clone(),
                order_id: order_id.to_string(),
                client_order_id: request.client_order_id.clone(),
                symbol: request.symbol.clone(),
                status: OrderStatus::Filled,
                filled_qty: request.qty,
                avg_fill_price: Some(fill_price),
                fee: None,
                ts_ms: self.clock_ms.load(Ordering::SeqCst),
                raw: None,
            })
        }

        async fn get_last_price(&self, symbol: &str) -> Result<f64, EngineError> {
            self.last_prices
                .read()
                .get(symbol)
                .copied()
                .ok_or_else(|| EngineError::Internal(format!("no price for {symbol}")))
        }

        async fn get_equity(&self) -> Result<f64, EngineError> {
            Ok(*self.equity.read())
        }

        async fn get_positions(&self) -> Result<Vec<(String, f64)>, EngineError> {
            Ok(self.positions.read().iter().map(|(k, v)| (k.clone(), *v)).collect())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn market_order_fills_at_last_price() {
            let adapter = PaperAdapter::new("paper", 1000.0);
            adapter.set_price("BTCUSDT", 100.0);
            let request = OrderRequest {
                venue: "paper".into(),
                symbol: "BTCUSDT".into(),
                side: Side::Buy,
                order_type: OrderType::Market,
                qty: 1.0,
                price: None,
                client_order_id: None,
                meta: Default::default(),
            };
            let update = adapter.place_order(&request).await.unwrap();
            assert_eq!(update.status, OrderStatus::Filled);
            assert_eq!(update.avg_fill_price, Some(100.0));
        }

        #[tokio::test]
        async fn missing_price_errors_on_market_order() {
            let adapter = PaperAdapter::new("paper", 1000.0);
            let request = OrderRequest {
                venue: "paper".into(),
                symbol: "ETHUSDT".into(),
                side: Side::Buy,
                order_type: OrderType::Market,
                qty: 1.0,
                price: None,
                client_order_id: None,
                meta: Default::default(),
            };
            assert!(adapter.place_order(&request).await.is_err());
        }

        #[tokio::test]
        async fn unsupported_capability_returns_unsupported_error() {
            let adapter = PaperAdapter::new("paper", 1000.0);
            assert!(!adapter.supports(Capability::SetLeverage));
            let err = adapter.set_leverage("BTCUSDT", 5.0).await.unwrap_err();
            assert!(matches!(err, EngineError::Unsupported(_)));
        }
    }
}

pub mod mock {
    //! A scripted broker double for exercising the control loop and
    //! execution engine without a paper venue's fill simulation. Queue up
    //! responses ahead of time with `push_order_response`/`push_order_update`
    //! and each call pops the next one.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicI64, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;

    pub struct MockAdapter {
        venue: String,
        order_responses: Mutex<VecDeque<Result<OrderUpdate, EngineError>>>,
        order_update_responses: Mutex<VecDeque<Result<OrderUpdate, EngineError>>>,
        last_price: Mutex<f64>,
        equity: Mutex<f64>,
        capabilities: Mutex<Vec<Capability>>,
        clock_ms: AtomicI64,
    }

    impl MockAdapter {
        pub fn new(venue: impl Into<String>) -> Self {
            Self {
                venue: venue.into(),
                order_responses: Mutex::new(VecDeque::new()),
                order_update_responses: Mutex::new(VecDeque::new()),
                last_price: Mutex::new(0.0),
                equity: Mutex::new(0.0),
                capabilities: Mutex::new(Vec::new()),
                clock_ms: AtomicI64::new(0),
            }
        }

        /// Queue a response for the next `place_order` call.
        pub fn push_order_response(&self, response: Result<OrderUpdate, EngineError>) {
            self.order_responses.lock().push_back(response);
        }

        /// Queue a response for the next `get_order_update` call.
        pub fn push_order_update(&self, response: Result<OrderUpdate, EngineError>) {
            self.order_update_responses.lock().push_back(response);
        }

        pub fn set_last_price(&self, price: f64) {
            *self.last_price.lock() = price;
        }

        pub fn set_equity(&self, equity: f64) {
            *self.equity.lock() = equity;
        }

        pub fn set_clock_ms(&self, ms: i64) {
            self.clock_ms.store(ms, Ordering::SeqCst);
        }

        pub fn set_capability(&self, cap: Capability, supported: bool) {
            let mut caps = self.capabilities.lock();
            caps.retain(|c| *c != cap);
            if supported {
                caps.push(cap);
            }
        }

        pub fn pending_order_responses(&self) -> usize {
            self.order_responses.lock().len()
        }
    }

    #[async_trait]
    impl BrokerAdapter for MockAdapter {
        fn venue(&self) -> &str {
            &self.venue
        }

        fn supports(&self, cap: Capability) -> bool {
            self.capabilities.lock().contains(&cap)
        }

        async fn place_order(&self, _request: &OrderRequest) -> Result<OrderUpdate, EngineError> {
            self.order_responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| panic!("MockAdapter::place_order called with an empty response queue"))
        }

        async fn get_last_price(&self, _symbol: &str) -> Result<f64, EngineError> {
            Ok(*self.last_price.lock())
        }

        async fn get_equity(&self) -> Result<f64, EngineError> {
            Ok(*self.equity.lock())
        }

        async fn get_positions(&self) -> Result<Vec<(String, f64)>, EngineError> {
            Ok(Vec::new())
        }

        async fn get_order_update(&self, _venue_order_id: &str) -> Result<OrderUpdate, EngineError> {
            self.order_update_responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| panic!("MockAdapter::get_order_update called with an empty response queue"))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::types::{OrderStatus, OrderType, Side};

        fn sample_update(filled_qty: f64, status: OrderStatus) -> OrderUpdate {
            OrderUpdate {
                venue: "mock".into(),
                order_id: "1".into(),
                client_order_id: None,
                symbol: "BTCUSDT".into(),
                status,
                filled_qty,
                avg_fill_price: Some(100.0),
                fee: None,
                ts_ms: 0,
                raw: None,
            }
        }

        fn sample_request() -> OrderRequest {
            OrderRequest {
                venue: "mock".into(),
                symbol: "BTCUSDT".into(),
                side: Side::Buy,
                order_type: OrderType::Market,
                qty: 1.0,
                price: None,
                client_order_id: None,
                meta: Default::default(),
            }
        }

        #[tokio::test]
        async fn place_order_returns_queued_responses_in_order() {
            let adapter = MockAdapter::new("mock");
            adapter.push_order_response(Ok(sample_update(1.0, OrderStatus::Filled)));
            adapter.push_order_response(Err(EngineError::Internal("boom".to_string())));

            assert!(adapter.place_order(&sample_request()).await.unwrap().is_successful_fill());
            assert!(adapter.place_order(&sample_request()).await.is_err());
        }

        #[tokio::test]
        async fn capability_flags_are_configurable() {
            let adapter = MockAdapter::new("mock");
            assert!(!adapter.supports(Capability::ShortSelling));
            adapter.set_capability(Capability::ShortSelling, true);
            assert!(adapter.supports(Capability::ShortSelling));
        }

        #[tokio::test]
        async fn get_order_update_returns_queued_confirmation() {
            let adapter = MockAdapter::new("mock");
            adapter.push_order_update(Ok(sample_update(1.0, OrderStatus::Filled)));
            let update = adapter.get_order_update("1").await.unwrap();
            assert_eq!(update.filled_qty, 1.0);
        }

        #[tokio::test]
        #[should_panic(expected = "empty response queue")]
        async fn place_order_panics_on_empty_queue() {
            let adapter = MockAdapter::new("mock");
            let _ = adapter.place_order(&sample_request()).await;
        }
    }
}
