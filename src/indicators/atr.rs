/// Average True Range (ATR) indicator
///
/// Measures market volatility as the arithmetic mean of true ranges over the
/// trailing `period` candles. True Range is the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)

use crate::models::Candle;

/// True range of `current` given the previous candle's close
pub fn true_range(current: &Candle, prev_close: f64) -> f64 {
    (current.high - current.low)
        .max((current.high - prev_close).abs())
        .max((current.low - prev_close).abs())
}

/// Calculate ATR over the trailing `period` candles
///
/// Returns None if there are fewer than `period + 1` candles (each true range
/// needs the previous close) or if `period` is zero.
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let start = candles.len() - period;
    let sum: f64 = (start..candles.len())
        .map(|i| true_range(&candles[i], candles[i - 1].close))
        .sum();

    Some(sum / period as f64)
}
