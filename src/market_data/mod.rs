pub mod candle_buffer;
pub mod liquidation;
pub mod orderbook_delta;
pub mod trade_flow;
pub mod trade_pressure;

pub use candle_buffer::{Candle, CandleBuffer, CandleKey};
pub use liquidation::{LiquidationClusterBook, LiquidationSnapshot};
pub use orderbook_delta::{OrderbookDeltaBook, OrderbookSnapshot};
pub use trade_flow::{FlowSnapshot, TradeFlowBook};
pub use trade_pressure::{PressureSnapshot, TradePressureBook};
