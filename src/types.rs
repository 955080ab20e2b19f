// =============================================================================
// Shared types used across the scalping engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Whether the engine is actively trading, paused, or killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Live,
    Paused,
    Killed,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paused
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Paused => write!(f, "Paused"),
            Self::Killed => write!(f, "Killed"),
        }
    }
}

/// Whether we are running against real funds, paper, or demo money.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountMode {
    Demo,
    Paper,
    Live,
}

impl Default for AccountMode {
    fn default() -> Self {
        Self::Demo
    }
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Demo => write!(f, "Demo"),
            Self::Paper => write!(f, "Paper"),
            Self::Live => write!(f, "Live"),
        }
    }
}

/// How an order's intended notional is derived before sizing rounds it to
/// exchange rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSizingMode {
    /// `intended_notional` is a fixed dollar figure from config.
    Fixed,
    /// `equity * trade_equity_frac * leverage`, recomputed every entry.
    EquityPct,
}

impl Default for OrderSizingMode {
    fn default() -> Self {
        Self::EquityPct
    }
}

impl std::fmt::Display for OrderSizingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed => write!(f, "Fixed"),
            Self::EquityPct => write!(f, "EquityPct"),
        }
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

/// Status of an order as reported by a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

/// Extra per-order flags threaded through to the adapter uninterpreted by
/// the control loop (e.g. hedge-mode position side).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderMeta {
    #[serde(default)]
    pub time_in_force: Option<String>,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub position_side: Option<String>,
}

/// A request to place an order on a venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub venue: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub qty: f64,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub client_order_id: Option<String>,
    #[serde(default)]
    pub meta: OrderMeta,
}

/// The normalized result of placing (or polling) an order, regardless of
/// which venue produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub venue: String,
    pub order_id: String,
    #[serde(default)]
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub status: OrderStatus,
    pub filled_qty: f64,
    #[serde(default)]
    pub avg_fill_price: Option<f64>,
    #[serde(default)]
    pub fee: Option<f64>,
    pub ts_ms: i64,
    #[serde(default)]
    pub raw: Option<serde_json::Value>,
}

impl OrderUpdate {
    pub fn is_successful_fill(&self) -> bool {
        self.filled_qty > 0.0 && !matches!(self.status, OrderStatus::Rejected)
    }
}

/// An exchange's lot-size / notional rules for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolRules {
    pub qty_step: f64,
    #[serde(default)]
    pub min_qty: f64,
    pub max_qty: f64,
    #[serde(default)]
    pub min_notional: Option<f64>,
}
