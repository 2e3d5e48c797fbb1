pub mod binance;

pub use binance::BinanceClient;

use crate::models::{Candle, OrderAck, OrderSide, SymbolFilters};
use crate::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Exchange operations the trading engine depends on
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Candles for `symbol` covering the last `lookback_hours`, oldest first
    async fn get_candles(
        &self,
        symbol: &str,
        interval: &str,
        lookback_hours: u64,
    ) -> Result<Vec<Candle>>;

    /// Free balance of `asset`
    async fn get_balance(&self, asset: &str) -> Result<f64>;

    /// Submit a market order
    async fn submit_order(&self, symbol: &str, side: OrderSide, quantity: Decimal)
        -> Result<OrderAck>;

    /// Whether an order for `symbol` is still open on the exchange
    async fn has_active_order(&self, symbol: &str) -> Result<bool>;

    /// Lot size and minimum notional constraints for `symbol`
    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters>;
}
