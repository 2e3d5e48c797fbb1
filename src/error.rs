use thiserror::Error;

/// Errors raised by the trading engine and its collaborators.
///
/// Each per-symbol error is handled once, at the controller boundary. Only
/// `Configuration` is fatal, and only at startup.
#[derive(Debug, Error)]
pub enum TradingError {
    /// Candle retrieval failed after all retry attempts
    #[error("failed to fetch candles for {symbol} after {attempts} attempts: {reason}")]
    TransientFetch {
        symbol: String,
        attempts: u32,
        reason: String,
    },

    /// Candle data is malformed (non-monotonic, NaN, negative prices)
    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    /// Sized order falls below the exchange minimum notional
    #[error("insufficient funds for {symbol}: notional {notional:.4} below minimum {min_notional:.4}")]
    InsufficientFunds {
        symbol: String,
        notional: f64,
        min_notional: f64,
    },

    /// Order submission was refused or failed
    #[error("order for {symbol} rejected by exchange: {reason}")]
    ExchangeRejectedOrder { symbol: String, reason: String },

    /// Any other exchange request failure (balance, filters, open orders)
    #[error("exchange request failed: {0}")]
    Exchange(String),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("candle cache failure: {0}")]
    Cache(String),

    #[error("notification failed: {0}")]
    Notification(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl TradingError {
    /// Short label used in structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            TradingError::TransientFetch { .. } => "TransientFetchError",
            TradingError::DataIntegrity(_) => "DataIntegrityError",
            TradingError::InsufficientFunds { .. } => "InsufficientFundsError",
            TradingError::ExchangeRejectedOrder { .. } => "ExchangeRejectedOrderError",
            TradingError::Exchange(_) => "ExchangeError",
            TradingError::Persistence(_) => "PersistenceError",
            TradingError::Cache(_) => "CacheError",
            TradingError::Notification(_) => "NotificationError",
            TradingError::Configuration(_) => "ConfigurationError",
        }
    }
}

impl From<reqwest::Error> for TradingError {
    fn from(e: reqwest::Error) -> Self {
        TradingError::Exchange(e.to_string())
    }
}

impl From<sqlx::Error> for TradingError {
    fn from(e: sqlx::Error) -> Self {
        TradingError::Persistence(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for TradingError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        TradingError::Persistence(e.to_string())
    }
}

impl From<redis::RedisError> for TradingError {
    fn from(e: redis::RedisError) -> Self {
        TradingError::Cache(e.to_string())
    }
}

impl From<::config::ConfigError> for TradingError {
    fn from(e: ::config::ConfigError) -> Self {
        TradingError::Configuration(e.to_string())
    }
}
