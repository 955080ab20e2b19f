pub mod ledger;

pub use ledger::{FillOutcome, Position, PositionLedger, PositionSide};
