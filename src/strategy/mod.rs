// Trading strategy module
pub mod price_action;
pub mod validation;

pub use price_action::{PriceActionStrategy, StrategyParams};
pub use validation::validate_candles;

use crate::models::{Action, Candle, Position};
use crate::Result;

/// Volatility bands computed from the trailing candle window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceBands {
    pub moving_average: f64,
    pub atr: f64,
    pub dynamic_buy_price: f64,
    pub dynamic_sell_price: f64,
}

/// Non-fatal conditions attached to a HOLD decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    InsufficientData { have: usize, need: usize },
}

/// Output of a strategy evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub action: Action,
    /// None when there was not enough data to compute the bands
    pub bands: Option<PriceBands>,
    pub latest_close: Option<f64>,
    pub diagnostic: Option<Diagnostic>,
}

impl Decision {
    pub fn insufficient_data(have: usize, need: usize, latest_close: Option<f64>) -> Self {
        Self {
            action: Action::Hold,
            bands: None,
            latest_close,
            diagnostic: Some(Diagnostic::InsufficientData { have, need }),
        }
    }
}

/// Base trait for trading strategies
///
/// Implementations must be pure: the same candles, position and parameters
/// always produce the same decision.
pub trait Strategy: Send + Sync {
    /// Decide BUY / SELL / HOLD for the given candles and current position
    fn decide(&self, candles: &[Candle], position: &Position) -> Result<Decision>;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum candles required for this strategy
    fn min_candles_required(&self) -> usize;
}
