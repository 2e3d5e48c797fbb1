// Trade notifications
pub mod telegram;

pub use telegram::TelegramNotifier;

use crate::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

/// Outbound trade alerts
///
/// Delivery is best-effort: callers log failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_buy(&self, symbol: &str, price: f64, quantity: Decimal) -> Result<()>;

    async fn notify_sell(
        &self,
        symbol: &str,
        price: f64,
        quantity: Decimal,
        realized_pnl: f64,
    ) -> Result<()>;

    /// Free-form operational alert (startup, shutdown, aborted cycles)
    async fn notify_alert(&self, message: &str) -> Result<()>;
}

pub(crate) fn format_buy(symbol: &str, price: f64, quantity: Decimal) -> String {
    format!("🟢 BUY {} {} @ {:.4}", quantity, symbol, price)
}

pub(crate) fn format_sell(symbol: &str, price: f64, quantity: Decimal, realized_pnl: f64) -> String {
    let marker = if realized_pnl >= 0.0 { "✅" } else { "🔻" };
    format!(
        "🔴 SELL {} {} @ {:.4}\n{} PnL: {:+.4}",
        quantity, symbol, price, marker, realized_pnl
    )
}

/// Writes notifications to the log only (used when Telegram is not configured)
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_buy(&self, symbol: &str, price: f64, quantity: Decimal) -> Result<()> {
        tracing::info!("📣 {}", format_buy(symbol, price, quantity));
        Ok(())
    }

    async fn notify_sell(
        &self,
        symbol: &str,
        price: f64,
        quantity: Decimal,
        realized_pnl: f64,
    ) -> Result<()> {
        tracing::info!("📣 {}", format_sell(symbol, price, quantity, realized_pnl));
        Ok(())
    }

    async fn notify_alert(&self, message: &str) -> Result<()> {
        tracing::warn!("📣 {}", message);
        Ok(())
    }
}

/// Sends notifications on background tasks so a slow or failing channel
/// never holds up a trading cycle
///
/// Failures are logged from the task. `flush` waits for everything still in
/// flight (call it before shutdown).
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    in_flight: Mutex<JoinSet<()>>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            in_flight: Mutex::new(JoinSet::new()),
        }
    }

    pub async fn buy(&self, symbol: &str, price: f64, quantity: Decimal) {
        let notifier = self.notifier.clone();
        let symbol = symbol.to_string();
        self.spawn(async move { notifier.notify_buy(&symbol, price, quantity).await })
            .await;
    }

    pub async fn sell(&self, symbol: &str, price: f64, quantity: Decimal, realized_pnl: f64) {
        let notifier = self.notifier.clone();
        let symbol = symbol.to_string();
        self.spawn(async move {
            notifier
                .notify_sell(&symbol, price, quantity, realized_pnl)
                .await
        })
        .await;
    }

    pub async fn alert(&self, message: String) {
        let notifier = self.notifier.clone();
        self.spawn(async move { notifier.notify_alert(&message).await })
            .await;
    }

    async fn spawn<F>(&self, send: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let mut in_flight = self.in_flight.lock().await;
        while in_flight.try_join_next().is_some() {}

        in_flight.spawn(async move {
            if let Err(e) = send.await {
                tracing::warn!(kind = e.kind(), "Notification failed: {}", e);
            }
        });
    }

    /// Wait for every pending notification to finish
    pub async fn flush(&self) {
        let mut pending = std::mem::take(&mut *self.in_flight.lock().await);
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("Notification task failed: {}", e);
            }
        }
    }
}
