// Position persistence backends
pub mod file;
pub mod postgres;

pub use file::FilePositionStore;
pub use postgres::PostgresPositionStore;

use crate::error::TradingError;
use crate::models::{Position, TradeRecord};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Durable per-symbol position record
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Load the position for `symbol`, or a flat (NONE) position if absent
    async fn load_position(&self, symbol: &str) -> Result<Position>;

    async fn save_position(&self, position: &Position) -> Result<()>;

    /// Append an executed order to the trade history
    async fn record_trade(&self, trade: &TradeRecord) -> Result<()>;

    /// Recorded trades for `symbol`, oldest first
    async fn trade_history(&self, symbol: &str) -> Result<Vec<TradeRecord>>;
}

/// Reject a stored record that breaks the HOLDING invariants
pub(crate) fn verify_loaded(position: Position) -> Result<Position> {
    match position.ensure_consistent() {
        Ok(()) => Ok(position),
        Err(e) => Err(TradingError::Persistence(format!("stored record rejected: {}", e))),
    }
}

/// Non-durable store for tests and dry runs
#[derive(Default)]
pub struct InMemoryPositionStore {
    positions: RwLock<HashMap<String, Position>>,
    trades: RwLock<Vec<TradeRecord>>,
}

impl InMemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_positions(positions: Vec<Position>) -> Self {
        Self {
            positions: RwLock::new(
                positions
                    .into_iter()
                    .map(|p| (p.symbol.clone(), p))
                    .collect(),
            ),
            trades: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PositionStore for InMemoryPositionStore {
    async fn load_position(&self, symbol: &str) -> Result<Position> {
        match self.positions.read().await.get(symbol) {
            Some(position) => verify_loaded(position.clone()),
            None => Ok(Position::none(symbol)),
        }
    }

    async fn save_position(&self, position: &Position) -> Result<()> {
        self.positions
            .write()
            .await
            .insert(position.symbol.clone(), position.clone());
        Ok(())
    }

    async fn record_trade(&self, trade: &TradeRecord) -> Result<()> {
        self.trades.write().await.push(trade.clone());
        Ok(())
    }

    async fn trade_history(&self, symbol: &str) -> Result<Vec<TradeRecord>> {
        Ok(self
            .trades
            .read()
            .await
            .iter()
            .filter(|t| t.symbol == symbol)
            .cloned()
            .collect())
    }
}
