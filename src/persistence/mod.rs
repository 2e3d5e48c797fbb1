// Candle cache backends
pub mod redis_cache;

pub use redis_cache::RedisCandleCache;

use crate::models::Candle;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A cached candle series plus the time it was stored
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedCandles {
    pub stored_at: DateTime<Utc>,
    pub candles: Vec<Candle>,
}

impl CachedCandles {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.stored_at
    }

    /// Entry is usable while its age does not exceed `ttl`
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.age(now) <= ttl
    }
}

/// Time-bounded candle cache keyed by symbol
#[async_trait]
pub trait CandleCache: Send + Sync {
    async fn load(&self, symbol: &str) -> Result<Option<CachedCandles>>;

    async fn store(&self, symbol: &str, candles: &[Candle], stored_at: DateTime<Utc>)
        -> Result<()>;
}

/// Process-local cache, used when no Redis is configured
#[derive(Default)]
pub struct InMemoryCandleCache {
    entries: RwLock<HashMap<String, CachedCandles>>,
}

impl InMemoryCandleCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CandleCache for InMemoryCandleCache {
    async fn load(&self, symbol: &str) -> Result<Option<CachedCandles>> {
        Ok(self.entries.read().await.get(symbol).cloned())
    }

    async fn store(
        &self,
        symbol: &str,
        candles: &[Candle],
        stored_at: DateTime<Utc>,
    ) -> Result<()> {
        self.entries.write().await.insert(
            symbol.to_string(),
            CachedCandles {
                stored_at,
                candles: candles.to_vec(),
            },
        );
        Ok(())
    }
}
