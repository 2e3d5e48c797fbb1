use super::{format_buy, format_sell, Notifier};
use crate::error::TradingError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API notifier
pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .map_err(|e| TradingError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: TELEGRAM_API_BASE.to_string(),
            bot_token,
            chat_id,
        })
    }

    /// Override the API host (used by tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn send(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);

        let response = self
            .client
            .post(&url)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text,
            })
            .send()
            .await
            .map_err(|e| TradingError::Notification(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TradingError::Notification(format!(
                "Telegram error {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify_buy(&self, symbol: &str, price: f64, quantity: Decimal) -> Result<()> {
        self.send(&format_buy(symbol, price, quantity)).await
    }

    async fn notify_sell(
        &self,
        symbol: &str,
        price: f64,
        quantity: Decimal,
        realized_pnl: f64,
    ) -> Result<()> {
        self.send(&format_sell(symbol, price, quantity, realized_pnl))
            .await
    }

    async fn notify_alert(&self, message: &str) -> Result<()> {
        self.send(&format!("⚠️ {}", message)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_buy_posts_to_chat() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/botTOKEN/sendMessage")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "chat_id": "42",
            })))
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let notifier = TelegramNotifier::new("TOKEN".into(), "42".into())
            .unwrap()
            .with_base_url(server.url());
        notifier
            .notify_buy("BTCUSDT", 50000.0, Decimal::new(2, 2))
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_api_error_is_notification_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/botTOKEN/sendMessage")
            .with_status(401)
            .with_body(r#"{"ok":false,"description":"Unauthorized"}"#)
            .create_async()
            .await;

        let notifier = TelegramNotifier::new("TOKEN".into(), "42".into())
            .unwrap()
            .with_base_url(server.url());
        let result = notifier.notify_alert("hello").await;

        assert!(matches!(result, Err(TradingError::Notification(_))));
    }
}
