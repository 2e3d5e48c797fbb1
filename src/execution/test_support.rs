//! In-memory exchange and notifier doubles for unit tests
use crate::api::Exchange;
use crate::error::TradingError;
use crate::models::{Candle, OrderAck, OrderSide, OrderStatus, SymbolFilters};
use crate::notify::Notifier;
use crate::Result;
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

/// Candles with the given closes, one minute apart, each spanning close ± 1
pub fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
    let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Candle {
            open_time: start + Duration::minutes(i as i64),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
        })
        .collect()
}

pub struct MockExchange {
    candles: Mutex<Vec<Candle>>,
    candle_failures: AtomicU32,
    pub candle_calls: AtomicU32,
    balance: Mutex<f64>,
    filters: SymbolFilters,
    active_order: AtomicBool,
    fail_submissions: AtomicBool,
    ack_status: Mutex<OrderStatus>,
    avg_price: Mutex<Option<f64>>,
    executed_qty: Mutex<Option<Decimal>>,
    pub orders: Mutex<Vec<(String, OrderSide, Decimal)>>,
}

impl MockExchange {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self {
            candles: Mutex::new(candles),
            candle_failures: AtomicU32::new(0),
            candle_calls: AtomicU32::new(0),
            balance: Mutex::new(1000.0),
            filters: SymbolFilters {
                step_size: Decimal::new(1, 3),
                min_qty: Decimal::new(1, 3),
                min_notional: 5.0,
            },
            active_order: AtomicBool::new(false),
            fail_submissions: AtomicBool::new(false),
            ack_status: Mutex::new(OrderStatus::Filled),
            avg_price: Mutex::new(None),
            executed_qty: Mutex::new(None),
            orders: Mutex::new(Vec::new()),
        }
    }

    pub fn set_candles(&self, candles: Vec<Candle>) {
        *self.candles.lock().unwrap() = candles;
    }

    /// Fail the next `n` candle fetches
    pub fn fail_candle_fetches(&self, n: u32) {
        self.candle_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_balance(&self, balance: f64) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn set_active_order(&self, active: bool) {
        self.active_order.store(active, Ordering::SeqCst);
    }

    pub fn fail_submissions(&self, fail: bool) {
        self.fail_submissions.store(fail, Ordering::SeqCst);
    }

    pub fn set_ack(&self, status: OrderStatus, avg_price: Option<f64>) {
        *self.ack_status.lock().unwrap() = status;
        *self.avg_price.lock().unwrap() = avg_price;
    }

    /// Report `executed` instead of the requested quantity on later acks
    pub fn set_executed_qty(&self, executed: Option<Decimal>) {
        *self.executed_qty.lock().unwrap() = executed;
    }

    pub fn submitted(&self) -> Vec<(String, OrderSide, Decimal)> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn get_candles(&self, symbol: &str, _interval: &str, _lookback_hours: u64) -> Result<Vec<Candle>> {
        self.candle_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.candle_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.candle_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TradingError::Exchange(format!("connection reset fetching {}", symbol)));
        }
        Ok(self.candles.lock().unwrap().clone())
    }

    async fn get_balance(&self, _asset: &str) -> Result<f64> {
        Ok(*self.balance.lock().unwrap())
    }

    async fn submit_order(&self, symbol: &str, side: OrderSide, quantity: Decimal) -> Result<OrderAck> {
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(TradingError::Exchange("request timed out".to_string()));
        }
        let mut orders = self.orders.lock().unwrap();
        orders.push((symbol.to_string(), side, quantity));
        Ok(OrderAck {
            order_id: orders.len().to_string(),
            status: self.ack_status.lock().unwrap().clone(),
            executed_qty: self.executed_qty.lock().unwrap().unwrap_or(quantity),
            avg_price: *self.avg_price.lock().unwrap(),
        })
    }

    async fn has_active_order(&self, _symbol: &str) -> Result<bool> {
        Ok(self.active_order.load(Ordering::SeqCst))
    }

    async fn symbol_filters(&self, _symbol: &str) -> Result<SymbolFilters> {
        Ok(self.filters.clone())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_buy(&self, symbol: &str, price: f64, quantity: Decimal) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push(format!("BUY {} {} {}", symbol, quantity, price));
        Ok(())
    }

    async fn notify_sell(&self, symbol: &str, price: f64, quantity: Decimal, realized_pnl: f64) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push(format!("SELL {} {} {} {}", symbol, quantity, price, realized_pnl));
        Ok(())
    }

    async fn notify_alert(&self, message: &str) -> Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}
