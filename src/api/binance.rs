use super::Exchange;
use crate::error::TradingError;
use crate::models::{Candle, OrderAck, OrderSide, OrderStatus, SymbolFilters};
use crate::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

// Binance Spot REST API
// Docs: https://developers.binance.com/docs/binance-spot-api-docs/rest-api
const BINANCE_API_BASE: &str = "https://api.binance.com";
const BINANCE_TESTNET_BASE: &str = "https://testnet.binance.vision";
const KLINES_PAGE_LIMIT: usize = 1000;
const RECV_WINDOW_MS: u64 = 5000;
const RATE_LIMIT_RPM: u32 = 600; // Well under the 6000 weight/min IP limit

type HmacSha256 = Hmac<Sha256>;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Binance spot REST client
///
/// Cloneable; all clones share the rate limiter and the symbol filter cache.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    filters: Arc<RwLock<HashMap<String, SymbolFilters>>>,
    base_assets: Arc<RwLock<HashMap<String, String>>>,
    rate_limiter: Arc<BinanceRateLimiter>,
}

/// Error body returned by Binance on 4xx responses
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    asset: String,
    free: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: u64,
    status: String,
    #[serde(default)]
    executed_qty: Option<String>,
    #[serde(default)]
    cummulative_quote_qty: Option<String>,
    #[serde(default)]
    fills: Vec<OrderFill>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderFill {
    commission: String,
    commission_asset: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    base_asset: Option<String>,
    filters: Vec<serde_json::Value>,
}

/// Why a request failed: transport problem or an API-level refusal
#[derive(Debug)]
enum RequestFailure {
    Transport(String),
    Api { status: u16, code: Option<i64>, msg: String },
}

impl std::fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestFailure::Transport(e) => write!(f, "{}", e),
            RequestFailure::Api { status, code: Some(code), msg } => {
                write!(f, "HTTP {} (code {}): {}", status, code, msg)
            }
            RequestFailure::Api { status, code: None, msg } => write!(f, "HTTP {}: {}", status, msg),
        }
    }
}

impl BinanceClient {
    pub fn new(api_key: String, api_secret: String, use_testnet: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| TradingError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        let quota = Quota::per_minute(NonZeroU32::new(RATE_LIMIT_RPM).unwrap_or(NonZeroU32::MIN));

        let base_url = if use_testnet {
            BINANCE_TESTNET_BASE
        } else {
            BINANCE_API_BASE
        };

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            api_key,
            api_secret,
            filters: Arc::new(RwLock::new(HashMap::new())),
            base_assets: Arc::new(RwLock::new(HashMap::new())),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// Point the client at a different host (used by tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// HMAC-SHA256 signature of a query string, hex encoded
    fn sign(&self, query: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| TradingError::Configuration(format!("Invalid API secret: {}", e)))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn encode_params(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    async fn public_get(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> std::result::Result<reqwest::Response, RequestFailure> {
        let url = format!("{}{}?{}", self.base_url, path, Self::encode_params(params));
        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RequestFailure::Transport(e.to_string()))?;

        Self::check_status(response).await
    }

    async fn signed_request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> std::result::Result<reqwest::Response, RequestFailure> {
        let mut params = params.to_vec();
        params.push(("recvWindow", RECV_WINDOW_MS.to_string()));
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));

        let query = Self::encode_params(&params);
        let signature = self
            .sign(&query)
            .map_err(|e| RequestFailure::Transport(e.to_string()))?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| RequestFailure::Transport(e.to_string()))?;

        Self::check_status(response).await
    }

    async fn check_status(
        response: reqwest::Response,
    ) -> std::result::Result<reqwest::Response, RequestFailure> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(err) => Err(RequestFailure::Api {
                status: status.as_u16(),
                code: Some(err.code),
                msg: err.msg,
            }),
            Err(_) => Err(RequestFailure::Api {
                status: status.as_u16(),
                code: None,
                msg: body,
            }),
        }
    }

    fn parse_kline(row: &[serde_json::Value]) -> Result<Candle> {
        if row.len() < 6 {
            return Err(TradingError::Exchange(format!(
                "kline row has {} fields, expected at least 6",
                row.len()
            )));
        }

        let open_time_ms = row[0]
            .as_i64()
            .ok_or_else(|| TradingError::Exchange("kline open time is not an integer".into()))?;
        let open_time = Utc
            .timestamp_millis_opt(open_time_ms)
            .single()
            .ok_or_else(|| TradingError::Exchange(format!("invalid kline time {}", open_time_ms)))?;

        Ok(Candle {
            open_time,
            open: Self::parse_number(&row[1])?,
            high: Self::parse_number(&row[2])?,
            low: Self::parse_number(&row[3])?,
            close: Self::parse_number(&row[4])?,
            volume: Self::parse_number(&row[5])?,
        })
    }

    /// Binance encodes decimals as JSON strings
    fn parse_number(value: &serde_json::Value) -> Result<f64> {
        match value {
            serde_json::Value::String(s) => s
                .parse::<f64>()
                .map_err(|e| TradingError::Exchange(format!("invalid number '{}': {}", s, e))),
            serde_json::Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| TradingError::Exchange(format!("invalid number {}", n))),
            other => Err(TradingError::Exchange(format!("expected number, got {}", other))),
        }
    }

    fn parse_decimal(value: Option<&str>) -> Decimal {
        value
            .and_then(|v| Decimal::from_str(v).ok())
            .unwrap_or(Decimal::ZERO)
    }

    /// Quantity received by a BUY: executed minus commission paid in the base asset
    async fn net_executed_qty(&self, symbol: &str, side: OrderSide, response: &OrderResponse) -> Decimal {
        let executed = Self::parse_decimal(response.executed_qty.as_deref());
        if side == OrderSide::Sell {
            return executed;
        }

        let base_assets = self.base_assets.read().await;
        let Some(base_asset) = base_assets.get(symbol) else {
            return executed;
        };
        let commission: Decimal = response
            .fills
            .iter()
            .filter(|f| &f.commission_asset == base_asset)
            .map(|f| Self::parse_decimal(Some(f.commission.as_str())))
            .sum();

        (executed - commission).max(Decimal::ZERO)
    }

    fn parse_filters(info: &SymbolInfo) -> Result<SymbolFilters> {
        let find = |filter_type: &str| {
            info.filters
                .iter()
                .find(|f| f.get("filterType").and_then(|t| t.as_str()) == Some(filter_type))
        };
        let field = |filter: &serde_json::Value, name: &str| -> Result<String> {
            filter
                .get(name)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| TradingError::Exchange(format!("filter field {} missing", name)))
        };
        let decimal = |s: String| {
            Decimal::from_str(&s)
                .map_err(|e| TradingError::Exchange(format!("invalid decimal '{}': {}", s, e)))
        };

        let lot_size = find("LOT_SIZE").ok_or_else(|| {
            TradingError::Exchange(format!("no LOT_SIZE filter for {}", info.symbol))
        })?;
        let step_size = decimal(field(lot_size, "stepSize")?)?.normalize();
        let min_qty = decimal(field(lot_size, "minQty")?)?.normalize();

        // Newer symbols publish NOTIONAL, older ones MIN_NOTIONAL
        let min_notional = match find("NOTIONAL").or_else(|| find("MIN_NOTIONAL")) {
            Some(filter) => Self::parse_number(
                filter
                    .get("minNotional")
                    .unwrap_or(&serde_json::Value::String("0".to_string())),
            )?,
            None => 0.0,
        };

        Ok(SymbolFilters {
            step_size,
            min_qty,
            min_notional,
        })
    }
}

#[async_trait]
impl Exchange for BinanceClient {
    async fn get_candles(
        &self,
        symbol: &str,
        interval: &str,
        lookback_hours: u64,
    ) -> Result<Vec<Candle>> {
        let now_ms = Utc::now().timestamp_millis();
        let mut start_ms = now_ms - (lookback_hours as i64) * 3_600_000;
        let mut candles: Vec<Candle> = Vec::new();

        loop {
            let params = [
                ("symbol", symbol.to_string()),
                ("interval", interval.to_string()),
                ("startTime", start_ms.to_string()),
                ("limit", KLINES_PAGE_LIMIT.to_string()),
            ];

            let rows: Vec<Vec<serde_json::Value>> = self
                .public_get("/api/v3/klines", &params)
                .await
                .map_err(|e| TradingError::Exchange(format!("klines for {}: {}", symbol, e)))?
                .json()
                .await?;

            let page_len = rows.len();
            for row in &rows {
                candles.push(Self::parse_kline(row)?);
            }

            match candles.last() {
                Some(last) if page_len == KLINES_PAGE_LIMIT => {
                    start_ms = last.open_time.timestamp_millis() + 1;
                    if start_ms >= now_ms {
                        break;
                    }
                }
                _ => break,
            }
        }

        tracing::debug!("Fetched {} {} candles for {}", candles.len(), interval, symbol);

        Ok(candles)
    }

    async fn get_balance(&self, asset: &str) -> Result<f64> {
        let account: AccountResponse = self
            .signed_request(Method::GET, "/api/v3/account", &[])
            .await
            .map_err(|e| TradingError::Exchange(format!("account: {}", e)))?
            .json()
            .await?;

        match account.balances.iter().find(|b| b.asset == asset) {
            Some(balance) => balance
                .free
                .parse::<f64>()
                .map_err(|e| TradingError::Exchange(format!("invalid {} balance: {}", asset, e))),
            None => Ok(0.0),
        }
    }

    async fn submit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderAck> {
        let client_order_id = uuid::Uuid::new_v4().simple().to_string();
        let params = [
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.normalize().to_string()),
            ("newOrderRespType", "FULL".to_string()),
            ("newClientOrderId", client_order_id),
        ];

        let rejected = |reason: String| TradingError::ExchangeRejectedOrder {
            symbol: symbol.to_string(),
            reason,
        };

        let response: OrderResponse = self
            .signed_request(Method::POST, "/api/v3/order", &params)
            .await
            .map_err(|e| rejected(e.to_string()))?
            .json()
            .await
            .map_err(|e| rejected(format!("unreadable order response: {}", e)))?;

        let status = OrderStatus::parse(&response.status);
        if matches!(status, OrderStatus::Rejected | OrderStatus::Expired) {
            return Err(rejected(format!("order {} {}", response.order_id, response.status)));
        }

        let executed = response
            .executed_qty
            .as_deref()
            .and_then(|q| q.parse::<f64>().ok())
            .unwrap_or(0.0);
        let quote = response
            .cummulative_quote_qty
            .as_deref()
            .and_then(|q| q.parse::<f64>().ok())
            .unwrap_or(0.0);
        let avg_price = (executed > 0.0 && quote > 0.0).then(|| quote / executed);
        let executed_qty = self.net_executed_qty(symbol, side, &response).await;

        tracing::info!(
            symbol = %symbol,
            order_id = response.order_id,
            status = %response.status,
            "Submitted {} order for {} (executed {})",
            side.as_str(),
            quantity,
            executed_qty
        );

        Ok(OrderAck {
            order_id: response.order_id.to_string(),
            status,
            executed_qty,
            avg_price,
        })
    }

    async fn has_active_order(&self, symbol: &str) -> Result<bool> {
        let orders: Vec<serde_json::Value> = self
            .signed_request(Method::GET, "/api/v3/openOrders", &[("symbol", symbol.to_string())])
            .await
            .map_err(|e| TradingError::Exchange(format!("open orders for {}: {}", symbol, e)))?
            .json()
            .await?;

        Ok(!orders.is_empty())
    }

    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        if let Some(filters) = self.filters.read().await.get(symbol) {
            return Ok(filters.clone());
        }

        let info: ExchangeInfoResponse = self
            .public_get("/api/v3/exchangeInfo", &[("symbol", symbol.to_string())])
            .await
            .map_err(|e| TradingError::Exchange(format!("exchange info for {}: {}", symbol, e)))?
            .json()
            .await?;

        let symbol_info = info
            .symbols
            .iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| TradingError::Exchange(format!("unknown symbol {}", symbol)))?;
        let filters = Self::parse_filters(symbol_info)?;
        if let Some(base_asset) = &symbol_info.base_asset {
            self.base_assets
                .write()
                .await
                .insert(symbol.to_string(), base_asset.clone());
        }

        tracing::debug!(
            "Cached filters for {}: step {} min notional {}",
            symbol,
            filters.step_size,
            filters.min_notional
        );
        self.filters
            .write()
            .await
            .insert(symbol.to_string(), filters.clone());

        Ok(filters)
    }
}
