use super::{CachedCandles, CandleCache};
use crate::error::TradingError;
use crate::models::Candle;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

/// Redis-backed candle cache
///
/// Each symbol's series is stored as one JSON document under `candles:{symbol}`.
/// Keys expire after twice the freshness TTL so stale series do not pile up;
/// freshness itself is decided by the reader from `stored_at`.
pub struct RedisCandleCache {
    conn: ConnectionManager,
    expiry_secs: u64,
}

impl RedisCandleCache {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    /// * `ttl_secs` - Cache freshness TTL in seconds
    pub async fn new(redis_url: &str, ttl_secs: u64) -> Result<Self> {
        let client = Client::open(redis_url)?;

        // Add 5 second timeout to connection attempt
        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| TradingError::Cache("Redis connection timeout after 5 seconds".into()))??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            conn,
            expiry_secs: ttl_secs.saturating_mul(2).max(1),
        })
    }

    fn key(symbol: &str) -> String {
        format!("candles:{}", symbol)
    }
}

#[async_trait]
impl CandleCache for RedisCandleCache {
    async fn load(&self, symbol: &str) -> Result<Option<CachedCandles>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(Self::key(symbol)).await?;

        match value {
            Some(json) => {
                let entry: CachedCandles = serde_json::from_str(&json)
                    .map_err(|e| TradingError::Cache(format!("corrupt entry for {}: {}", symbol, e)))?;
                tracing::debug!(
                    "Loaded {} cached candles for {} from Redis",
                    entry.candles.len(),
                    symbol
                );
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    async fn store(
        &self,
        symbol: &str,
        candles: &[Candle],
        stored_at: DateTime<Utc>,
    ) -> Result<()> {
        let entry = CachedCandles {
            stored_at,
            candles: candles.to_vec(),
        };
        let json = serde_json::to_string(&entry).map_err(|e| TradingError::Cache(e.to_string()))?;

        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(Self::key(symbol), json, self.expiry_secs)
            .await?;

        tracing::debug!("Saved {} candles for {} to Redis", candles.len(), symbol);

        Ok(())
    }
}
