// Decision cycle: candle supply, order gating, sizing and the controller
pub mod candle_feed;
pub mod controller;
pub mod order_gate;
pub mod sizing;

#[cfg(test)]
pub(crate) mod test_support;

pub use candle_feed::{HistoricalDataProvider, RetryPolicy};
pub use controller::{CycleOutcome, ExitReason, SymbolState, TickSummary, TradingController};
pub use order_gate::OrderGate;
pub use sizing::{calculate_dynamic_quantity, floor_to_step, QuantitySizing};
