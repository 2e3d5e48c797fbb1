// Technical indicators module
// Implements MA and ATR for the price-action bands

pub mod atr;
pub mod moving_average;

pub use atr::{calculate_atr, true_range};
pub use moving_average::calculate_sma;
