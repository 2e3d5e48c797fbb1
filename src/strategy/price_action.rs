use super::{validate_candles, Decision, PriceBands, Strategy};
use crate::error::TradingError;
use crate::indicators::{calculate_atr, calculate_sma};
use crate::models::{Action, Candle, Position, PositionStatus};
use crate::Result;

/// Parameters of the volatility-aware price-action strategy
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyParams {
    pub ma_period: usize,
    pub atr_period: usize,
    /// Margin above the MA required before selling (0.05 = 5%)
    pub sell_margin_pct: f64,
    /// ATR multiplier subtracted from the MA for the buy band
    pub k_buy: f64,
    /// ATR multiplier added on top of the sell band
    pub k_sell: f64,
    /// Stop-loss distance below the buy price, set at buy time
    pub stop_loss_pct: f64,
    /// Take-profit distance above the buy price, set at buy time
    pub take_profit_pct: f64,
    /// Exit once the close falls this far below the highest close since
    /// entry; 0 disables the trailing stop
    pub trailing_stop_pct: f64,
}

impl StrategyParams {
    /// ATR period and the volatility multipliers have no sensible defaults and
    /// must always be supplied.
    pub fn new(atr_period: usize, k_buy: f64, k_sell: f64) -> Self {
        Self {
            ma_period: 10,
            atr_period,
            sell_margin_pct: 0.05,
            k_buy,
            k_sell,
            stop_loss_pct: 0.02,
            take_profit_pct: 0.03,
            trailing_stop_pct: 0.0,
        }
    }

    pub fn with_ma_period(mut self, ma_period: usize) -> Self {
        self.ma_period = ma_period;
        self
    }

    pub fn with_sell_margin(mut self, sell_margin_pct: f64) -> Self {
        self.sell_margin_pct = sell_margin_pct;
        self
    }

    pub fn with_exit_levels(mut self, stop_loss_pct: f64, take_profit_pct: f64) -> Self {
        self.stop_loss_pct = stop_loss_pct;
        self.take_profit_pct = take_profit_pct;
        self
    }

    pub fn with_trailing_stop(mut self, trailing_stop_pct: f64) -> Self {
        self.trailing_stop_pct = trailing_stop_pct;
        self
    }

    /// Candles needed: every TR in the ATR window needs a previous close
    pub fn min_candles(&self) -> usize {
        self.ma_period.max(self.atr_period) + 1
    }

    pub fn validate(&self) -> Result<()> {
        if self.ma_period == 0 || self.atr_period == 0 {
            return Err(TradingError::Configuration(
                "ma_period and atr_period must be at least 1".to_string(),
            ));
        }
        if !(self.k_buy >= 0.0 && self.k_sell >= 0.0) {
            return Err(TradingError::Configuration(format!(
                "volatility multipliers must be >= 0 (k_buy={}, k_sell={})",
                self.k_buy, self.k_sell
            )));
        }
        if !(self.sell_margin_pct > 0.0) {
            return Err(TradingError::Configuration(format!(
                "sell_margin_pct must be > 0, got {}",
                self.sell_margin_pct
            )));
        }
        if !(self.stop_loss_pct > 0.0 && self.stop_loss_pct < 1.0) {
            return Err(TradingError::Configuration(format!(
                "stop_loss_pct must be in (0, 1), got {}",
                self.stop_loss_pct
            )));
        }
        if !(self.take_profit_pct > 0.0) {
            return Err(TradingError::Configuration(format!(
                "take_profit_pct must be > 0, got {}",
                self.take_profit_pct
            )));
        }
        if !(self.trailing_stop_pct >= 0.0 && self.trailing_stop_pct < 1.0) {
            return Err(TradingError::Configuration(format!(
                "trailing_stop_pct must be in [0, 1), got {}",
                self.trailing_stop_pct
            )));
        }
        Ok(())
    }

    /// Trailing exit level under `highest_price`, if the trailing stop is on
    pub fn trailing_stop_price(&self, highest_price: f64) -> Option<f64> {
        (self.trailing_stop_pct > 0.0 && highest_price > 0.0)
            .then(|| highest_price * (1.0 - self.trailing_stop_pct))
    }

    /// Stop-loss price recorded when buying at `buy_price`
    pub fn stop_loss_price(&self, buy_price: f64) -> f64 {
        buy_price * (1.0 - self.stop_loss_pct)
    }

    /// Take-profit price recorded when buying at `buy_price`
    pub fn take_profit_price(&self, buy_price: f64) -> f64 {
        buy_price * (1.0 + self.take_profit_pct)
    }
}

/// Volatility-aware price-action strategy
///
/// Buys when the latest close dips below `MA - k_buy * ATR` and sells a held
/// position once the close clears `MA * (1 + margin) + k_sell * ATR`.
#[derive(Debug, Clone)]
pub struct PriceActionStrategy {
    params: StrategyParams,
}

impl PriceActionStrategy {
    pub fn new(params: StrategyParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &StrategyParams {
        &self.params
    }

    /// Compute the buy/sell bands from the trailing window
    pub fn compute_bands(&self, candles: &[Candle]) -> Option<PriceBands> {
        let closes = Self::extract_closes(candles);
        let moving_average = calculate_sma(&closes, self.params.ma_period)?;
        let atr = calculate_atr(candles, self.params.atr_period)?;

        Some(PriceBands {
            moving_average,
            atr,
            dynamic_buy_price: moving_average - self.params.k_buy * atr,
            dynamic_sell_price: moving_average * (1.0 + self.params.sell_margin_pct)
                + self.params.k_sell * atr,
        })
    }

    fn extract_closes(candles: &[Candle]) -> Vec<f64> {
        candles.iter().map(|c| c.close).collect()
    }
}

impl Strategy for PriceActionStrategy {
    fn decide(&self, candles: &[Candle], position: &Position) -> Result<Decision> {
        validate_candles(candles)?;

        let latest_close = candles.last().map(|c| c.close);
        let need = self.min_candles_required();
        if candles.len() < need {
            return Ok(Decision::insufficient_data(candles.len(), need, latest_close));
        }

        let (bands, close) = match (self.compute_bands(candles), latest_close) {
            (Some(bands), Some(close)) => (bands, close),
            _ => return Ok(Decision::insufficient_data(candles.len(), need, latest_close)),
        };

        let action = match position.status {
            PositionStatus::None if close <= bands.dynamic_buy_price => Action::Buy,
            PositionStatus::Holding if close >= bands.dynamic_sell_price => Action::Sell,
            _ => Action::Hold,
        };

        Ok(Decision {
            action,
            bands: Some(bands),
            latest_close: Some(close),
            diagnostic: None,
        })
    }

    fn name(&self) -> &str {
        "PriceActionStrategy"
    }

    fn min_candles_required(&self) -> usize {
        self.params.min_candles()
    }
}
