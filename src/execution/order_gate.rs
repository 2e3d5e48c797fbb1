use crate::api::Exchange;
use crate::models::OrderSide;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Prevents a second order for a symbol while one is still outstanding
///
/// The exchange's open-order list is authoritative. A local pending flag
/// remembers the side of an acknowledged but unfilled order so the symbol's
/// state can be reported without another request; it is dropped as soon as
/// the exchange reports no open order.
pub struct OrderGate {
    exchange: Arc<dyn Exchange>,
    pending: Mutex<HashMap<String, OrderSide>>,
}

impl OrderGate {
    pub fn new(exchange: Arc<dyn Exchange>) -> Self {
        Self {
            exchange,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub async fn has_active_order(&self, symbol: &str) -> Result<bool> {
        let on_exchange = self.exchange.has_active_order(symbol).await?;
        let mut pending = self.pending.lock().await;

        if on_exchange {
            return Ok(true);
        }

        if let Some(side) = pending.remove(symbol) {
            tracing::info!(symbol = %symbol, "Pending {} order no longer open, clearing", side.as_str());
        }

        Ok(false)
    }

    pub async fn mark_pending(&self, symbol: &str, side: OrderSide) {
        self.pending.lock().await.insert(symbol.to_string(), side);
    }

    pub async fn pending_side(&self, symbol: &str) -> Option<OrderSide> {
        self.pending.lock().await.get(symbol).copied()
    }
}
