use crate::api::Exchange;
use crate::error::TradingError;
use crate::models::Candle;
use crate::persistence::CandleCache;
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_RETRY_DELAY_SECS: u64 = 2;

/// Fixed-delay retry for live candle fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// Supplies candle series per symbol, cache first, live fetch on miss or expiry
pub struct HistoricalDataProvider {
    exchange: Arc<dyn Exchange>,
    cache: Arc<dyn CandleCache>,
    interval: String,
    lookback_hours: u64,
    ttl: chrono::Duration,
    retry: RetryPolicy,
}

impl HistoricalDataProvider {
    /// # Arguments
    /// * `interval` - Candle interval, e.g. "1m"
    /// * `lookback_hours` - How much history to fetch on a miss
    /// * `cache_ttl_secs` - Maximum age of a usable cache entry
    pub fn new(
        exchange: Arc<dyn Exchange>,
        cache: Arc<dyn CandleCache>,
        interval: impl Into<String>,
        lookback_hours: u64,
        cache_ttl_secs: u64,
    ) -> Self {
        Self {
            exchange,
            cache,
            interval: interval.into(),
            lookback_hours,
            ttl: chrono::Duration::seconds(cache_ttl_secs as i64),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn get_candles(&self, symbol: &str) -> Result<Vec<Candle>> {
        self.get_candles_at(symbol, Utc::now()).await
    }

    /// Same as `get_candles`, evaluating freshness against `now`
    pub async fn get_candles_at(&self, symbol: &str, now: DateTime<Utc>) -> Result<Vec<Candle>> {
        match self.cache.load(symbol).await {
            Ok(Some(entry)) if entry.is_fresh(now, self.ttl) => {
                tracing::debug!(
                    symbol = %symbol,
                    "Cache hit ({} candles, {}s old)",
                    entry.candles.len(),
                    entry.age(now).num_seconds()
                );
                return Ok(entry.candles);
            }
            Ok(Some(entry)) => {
                tracing::debug!(
                    symbol = %symbol,
                    "Cache entry expired ({}s old), fetching live",
                    entry.age(now).num_seconds()
                );
            }
            Ok(None) => {
                tracing::debug!(symbol = %symbol, "Cache miss, fetching live");
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, "Cache read failed, fetching live: {}", e);
            }
        }

        let candles = self.fetch_with_retry(symbol).await?;

        if let Err(e) = self.cache.store(symbol, &candles, now).await {
            tracing::warn!(symbol = %symbol, "Failed to cache candles: {}", e);
        }

        Ok(candles)
    }

    async fn fetch_with_retry(&self, symbol: &str) -> Result<Vec<Candle>> {
        let attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self
                .exchange
                .get_candles(symbol, &self.interval, self.lookback_hours)
                .await
            {
                Ok(candles) => {
                    if attempt > 1 {
                        tracing::info!(symbol = %symbol, "Candle fetch succeeded on attempt {}", attempt);
                    }
                    return Ok(candles);
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < attempts {
                        tracing::warn!(
                            symbol = %symbol,
                            "Candle fetch failed: {}, retrying in {:?} (attempt {}/{})",
                            e,
                            self.retry.delay,
                            attempt,
                            attempts
                        );
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
            }
        }

        Err(TradingError::TransientFetch {
            symbol: symbol.to_string(),
            attempts,
            reason: last_error,
        })
    }
}
