use crate::error::TradingError;
use crate::execution::RetryPolicy;
use crate::strategy::StrategyParams;
use crate::Result;
use ::config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "spotbot.toml";
const ENV_PREFIX: &str = "SPOTBOT";

const SUPPORTED_INTERVALS: &[&str] = &["1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "1d"];

/// Runtime settings, layered from an optional TOML file and `SPOTBOT__*`
/// environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub api_key: String,
    pub api_secret: String,
    #[serde(default = "default_true")]
    pub use_testnet: bool,
    pub symbols: Vec<String>,
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,

    #[serde(default = "default_candle_interval")]
    pub candle_interval: String,
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u64,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_seconds: u64,
    #[serde(default = "default_retry_attempts")]
    pub fetch_retry_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub fetch_retry_delay_seconds: u64,

    // Strategy
    #[serde(default = "default_ma_period")]
    pub ma_period: usize,
    pub atr_period: usize,
    #[serde(default = "default_sell_margin")]
    pub sell_margin_pct: f64,
    pub allocation_fraction: f64,
    pub k_buy: f64,
    pub k_sell: f64,
    #[serde(default = "default_stop_loss")]
    pub stop_loss_pct: f64,
    #[serde(default = "default_take_profit")]
    pub take_profit_pct: f64,
    #[serde(default = "default_trailing_stop")]
    pub trailing_stop_pct: f64,

    // Backends
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_position_file")]
    pub position_file: PathBuf,
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,

    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_true() -> bool {
    true
}
fn default_quote_asset() -> String {
    "USDT".to_string()
}
fn default_candle_interval() -> String {
    "1m".to_string()
}
fn default_lookback_hours() -> u64 {
    24
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_tick_interval() -> u64 {
    60
}
fn default_retry_attempts() -> u32 {
    5
}
fn default_retry_delay() -> u64 {
    2
}
fn default_ma_period() -> usize {
    10
}
fn default_sell_margin() -> f64 {
    0.05
}
fn default_stop_loss() -> f64 {
    0.02
}
fn default_take_profit() -> f64 {
    0.03
}
fn default_trailing_stop() -> f64 {
    0.02
}
fn default_position_file() -> PathBuf {
    PathBuf::from("data/positions.json")
}
fn default_log_filter() -> String {
    "spotbot=info".to_string()
}

impl Settings {
    /// Load settings from `path` (or `spotbot.toml` if it exists) plus the
    /// environment, then validate them
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("symbols")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(TradingError::Configuration(msg));

        if self.api_key.trim().is_empty() || self.api_secret.trim().is_empty() {
            return invalid("api_key and api_secret must be set".to_string());
        }
        if self.symbols.is_empty() || self.symbols.iter().any(|s| s.trim().is_empty()) {
            return invalid("symbols must list at least one trading pair".to_string());
        }
        if !SUPPORTED_INTERVALS.contains(&self.candle_interval.as_str()) {
            return invalid(format!(
                "unsupported candle_interval '{}' (expected one of {})",
                self.candle_interval,
                SUPPORTED_INTERVALS.join(", ")
            ));
        }
        if !(self.allocation_fraction > 0.0 && self.allocation_fraction <= 1.0) {
            return invalid(format!(
                "allocation_fraction must be in (0, 1], got {}",
                self.allocation_fraction
            ));
        }
        if self.lookback_hours == 0 || self.tick_interval_seconds == 0 {
            return invalid("lookback_hours and tick_interval_seconds must be positive".to_string());
        }
        if self.fetch_retry_attempts == 0 {
            return invalid("fetch_retry_attempts must be at least 1".to_string());
        }
        if self.telegram_bot_token.is_some() != self.telegram_chat_id.is_some() {
            return invalid("telegram_bot_token and telegram_chat_id must be set together".to_string());
        }

        self.strategy_params().validate()
    }

    pub fn strategy_params(&self) -> StrategyParams {
        StrategyParams::new(self.atr_period, self.k_buy, self.k_sell)
            .with_ma_period(self.ma_period)
            .with_sell_margin(self.sell_margin_pct)
            .with_exit_levels(self.stop_loss_pct, self.take_profit_pct)
            .with_trailing_stop(self.trailing_stop_pct)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.fetch_retry_attempts,
            Duration::from_secs(self.fetch_retry_delay_seconds),
        )
    }

    pub fn symbols(&self) -> Vec<String> {
        self.symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .collect()
    }
}
