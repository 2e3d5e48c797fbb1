use crate::error::TradingError;
use crate::models::Candle;
use crate::Result;

/// Validate a candle series before any indicator touches it
///
/// Rejects non-finite or non-positive prices, negative volume, broken OHLC
/// relationships and timestamps that are not strictly increasing.
pub fn validate_candles(candles: &[Candle]) -> Result<()> {
    for (i, candle) in candles.iter().enumerate() {
        validate_prices(i, candle)?;
        validate_ohlc_relationship(i, candle)?;
    }

    for (i, window) in candles.windows(2).enumerate() {
        if window[1].open_time <= window[0].open_time {
            return Err(TradingError::DataIntegrity(format!(
                "candles not in ascending time order at index {}: {} follows {}",
                i + 1,
                window[1].open_time,
                window[0].open_time
            )));
        }
    }

    Ok(())
}

fn validate_prices(index: usize, candle: &Candle) -> Result<()> {
    let fields = [
        ("open", candle.open),
        ("high", candle.high),
        ("low", candle.low),
        ("close", candle.close),
    ];

    for (name, value) in fields {
        if !value.is_finite() || value <= 0.0 {
            return Err(TradingError::DataIntegrity(format!(
                "invalid {} price {} at index {}",
                name, value, index
            )));
        }
    }

    // Volume can be 0.0 on quiet candles
    if !candle.volume.is_finite() || candle.volume < 0.0 {
        return Err(TradingError::DataIntegrity(format!(
            "invalid volume {} at index {}",
            candle.volume, index
        )));
    }

    Ok(())
}

fn validate_ohlc_relationship(index: usize, candle: &Candle) -> Result<()> {
    if candle.high < candle.low {
        return Err(TradingError::DataIntegrity(format!(
            "high ({}) is less than low ({}) at index {}",
            candle.high, candle.low, index
        )));
    }

    let body_high = candle.open.max(candle.close);
    let body_low = candle.open.min(candle.close);
    if candle.high < body_high || candle.low > body_low {
        return Err(TradingError::DataIntegrity(format!(
            "open/close outside high-low range at index {}",
            index
        )));
    }

    Ok(())
}
