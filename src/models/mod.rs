use crate::error::TradingError;
use crate::Result;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// OHLCV candlestick data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Trading action decided for a symbol
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Exchange-side status of a submitted order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    Other(String),
}

impl OrderStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "NEW" => OrderStatus::New,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" => OrderStatus::Canceled,
            "REJECTED" => OrderStatus::Rejected,
            "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Expired,
            other => OrderStatus::Other(other.to_string()),
        }
    }

    /// Order is still working on the book
    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::PartiallyFilled)
    }
}

/// Acknowledgement returned by the exchange after order submission
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: String,
    pub status: OrderStatus,
    /// Base-asset quantity actually received (BUY) or given up (SELL), net of
    /// any commission charged in the base asset
    pub executed_qty: Decimal,
    /// Average execution price, when the exchange reports fills
    pub avg_price: Option<f64>,
}

/// LOT_SIZE / NOTIONAL constraints for a symbol
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolFilters {
    pub step_size: Decimal,
    pub min_qty: Decimal,
    pub min_notional: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PositionStatus {
    None,
    Holding,
}

/// Position in a symbol (at most one per symbol)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub status: PositionStatus,
    pub buy_price: f64,
    pub quantity: Decimal,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    /// Highest close seen since entry, for the trailing stop
    #[serde(default)]
    pub highest_price: f64,
    pub last_updated: DateTime<Utc>,
}

impl Position {
    /// Flat position for a symbol with nothing held
    pub fn none(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            status: PositionStatus::None,
            buy_price: 0.0,
            quantity: Decimal::ZERO,
            stop_loss_price: 0.0,
            take_profit_price: 0.0,
            highest_price: 0.0,
            last_updated: Utc::now(),
        }
    }

    /// Held position; fails unless price and quantity are positive
    pub fn holding(
        symbol: &str,
        buy_price: f64,
        quantity: Decimal,
        stop_loss_price: f64,
        take_profit_price: f64,
    ) -> Result<Self> {
        let position = Self {
            symbol: symbol.to_string(),
            status: PositionStatus::Holding,
            buy_price,
            quantity,
            stop_loss_price,
            take_profit_price,
            highest_price: buy_price,
            last_updated: Utc::now(),
        };
        position.ensure_consistent()?;
        Ok(position)
    }

    pub fn is_holding(&self) -> bool {
        self.status == PositionStatus::Holding
    }

    /// HOLDING implies a positive buy price and quantity
    pub fn is_consistent(&self) -> bool {
        match self.status {
            PositionStatus::Holding => {
                self.buy_price.is_finite() && self.buy_price > 0.0 && self.quantity > Decimal::ZERO
            }
            PositionStatus::None => true,
        }
    }

    pub fn ensure_consistent(&self) -> Result<()> {
        if self.is_consistent() {
            return Ok(());
        }
        Err(TradingError::DataIntegrity(format!(
            "inconsistent {} position: {:?} with buy price {} and quantity {}",
            self.symbol, self.status, self.buy_price, self.quantity
        )))
    }

    /// Raise the trailing high-water mark; returns true if it moved
    pub fn track_high(&mut self, price: f64) -> bool {
        if self.is_holding() && price > self.highest_price {
            self.highest_price = price;
            self.last_updated = Utc::now();
            return true;
        }
        false
    }

    /// Realized P&L if `quantity` of the position were closed at `exit_price`
    pub fn pnl_at(&self, exit_price: f64, quantity: Decimal) -> f64 {
        (exit_price - self.buy_price) * quantity.to_f64().unwrap_or(0.0)
    }
}

/// One executed order, kept as trade history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: f64,
    /// Set on SELL only
    pub realized_pnl: Option<f64>,
    pub order_id: String,
    pub executed_at: DateTime<Utc>,
}
