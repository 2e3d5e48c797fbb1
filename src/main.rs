use anyhow::Context;
use clap::Parser;
use spotbot::api::{BinanceClient, Exchange};
use spotbot::config::{Settings, DEFAULT_CONFIG_FILE};
use spotbot::db::{FilePositionStore, PositionStore, PostgresPositionStore};
use spotbot::execution::{HistoricalDataProvider, TradingController};
use spotbot::notify::{LogNotifier, Notifier, TelegramNotifier};
use spotbot::persistence::{CandleCache, InMemoryCandleCache, RedisCandleCache};
use spotbot::strategy::PriceActionStrategy;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "spotbot", about = "Volatility-band spot trading bot for Binance")]
struct Cli {
    /// Path to a TOML config file (defaults to spotbot.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single tick over all symbols and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref()).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            cli.config
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| format!("{} / environment", DEFAULT_CONFIG_FILE))
        )
    })?;
    setup_logging(&settings.log_filter);

    tracing::info!("🚀 SpotBot starting");
    log_configuration(&settings);

    let exchange: Arc<dyn Exchange> = Arc::new(
        BinanceClient::new(
            settings.api_key.clone(),
            settings.api_secret.clone(),
            settings.use_testnet,
        )
        .context("Failed to create Binance client")?,
    );
    let cache = connect_candle_cache(&settings).await;
    let positions = connect_position_store(&settings).await?;
    let notifier = create_notifier(&settings)?;

    let provider = HistoricalDataProvider::new(
        exchange.clone(),
        cache,
        settings.candle_interval.clone(),
        settings.lookback_hours,
        settings.cache_ttl_seconds,
    )
    .with_retry_policy(settings.retry_policy());

    let controller = TradingController::new(
        settings.symbols(),
        PriceActionStrategy::new(settings.strategy_params()),
        provider,
        exchange,
        positions,
        notifier.clone(),
        settings.allocation_fraction,
    )
    .with_quote_asset(settings.quote_asset.clone());

    for symbol in controller.symbols() {
        match controller.state_of(symbol).await {
            Ok(state) => tracing::info!("  {} → {:?}", symbol, state),
            Err(e) => tracing::warn!("  {} → unknown ({})", symbol, e),
        }
    }

    if cli.once {
        let summary = controller.run_tick().await;
        controller.flush_notifications().await;
        tracing::info!("Tick complete: {:?}", summary);
        return Ok(());
    }

    if let Err(e) = notifier
        .notify_alert(&format!("SpotBot started for {}", settings.symbols().join(", ")))
        .await
    {
        tracing::warn!("Startup notification failed: {}", e);
    }

    run_loop(&controller, settings.tick_interval_seconds).await;
    controller.flush_notifications().await;

    if let Err(e) = notifier.notify_alert("SpotBot stopped").await {
        tracing::warn!("Shutdown notification failed: {}", e);
    }
    tracing::info!("👋 SpotBot stopped");
    Ok(())
}

// ============================================================================
// Control Loop
// ============================================================================

async fn run_loop(controller: &TradingController, tick_interval_seconds: u64) {
    let mut ticker = interval(Duration::from_secs(tick_interval_seconds));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!("🔄 Trading every {}s. Press Ctrl+C to stop...", tick_interval_seconds);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("⚠️  Received Ctrl+C, shutting down...");
                break;
            }
            _ = ticker.tick() => {
                let summary = controller.run_tick().await;
                tracing::info!(
                    bought = summary.bought,
                    sold = summary.sold,
                    held = summary.held,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    "💹 Tick complete"
                );
            }
        }
    }
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn log_configuration(settings: &Settings) {
    let params = settings.strategy_params();
    tracing::info!("📊 Configuration:");
    tracing::info!(
        "  Exchange: Binance {}",
        if settings.use_testnet { "testnet" } else { "mainnet" }
    );
    tracing::info!("  Symbols: {}", settings.symbols().join(", "));
    tracing::info!(
        "  Candles: {} over {}h (cache TTL {}s)",
        settings.candle_interval,
        settings.lookback_hours,
        settings.cache_ttl_seconds
    );
    tracing::info!(
        "  Bands: MA {} / ATR {}, k_buy {}, k_sell {}, sell margin {}%",
        params.ma_period,
        params.atr_period,
        params.k_buy,
        params.k_sell,
        params.sell_margin_pct * 100.0
    );
    tracing::info!(
        "  Exits: SL {}%, TP {}%, trailing {}%, allocation {}% of {}",
        params.stop_loss_pct * 100.0,
        params.take_profit_pct * 100.0,
        params.trailing_stop_pct * 100.0,
        settings.allocation_fraction * 100.0,
        settings.quote_asset
    );
}

async fn connect_candle_cache(settings: &Settings) -> Arc<dyn CandleCache> {
    let Some(redis_url) = settings.redis_url.as_deref() else {
        tracing::info!("No redis_url configured, using in-memory candle cache");
        return Arc::new(InMemoryCandleCache::new());
    };

    match RedisCandleCache::new(redis_url, settings.cache_ttl_seconds).await {
        Ok(cache) => {
            tracing::info!("Candle cache enabled at {}", redis_url);
            Arc::new(cache)
        }
        Err(e) => {
            tracing::warn!(
                "Failed to connect to Redis ({}), falling back to in-memory cache",
                e
            );
            Arc::new(InMemoryCandleCache::new())
        }
    }
}

async fn connect_position_store(settings: &Settings) -> anyhow::Result<Arc<dyn PositionStore>> {
    if let Some(database_url) = settings.database_url.as_deref() {
        let store = PostgresPositionStore::new(database_url)
            .await
            .context("Failed to connect to Postgres")?;

        let held: Vec<_> = store
            .load_all()
            .await?
            .into_iter()
            .filter(|p| p.is_holding())
            .collect();
        tracing::info!("Postgres persistence enabled ({} open positions)", held.len());
        for position in &held {
            tracing::info!(
                "    - {} {} @ {:.4}",
                position.symbol,
                position.quantity,
                position.buy_price
            );
        }

        return Ok(Arc::new(store));
    }

    let store = FilePositionStore::new(settings.position_file.clone());
    tracing::info!(
        "Position file persistence at {} (trades in {})",
        store.path().display(),
        store.trades_path().display()
    );
    Ok(Arc::new(store))
}

fn create_notifier(settings: &Settings) -> anyhow::Result<Arc<dyn Notifier>> {
    match (&settings.telegram_bot_token, &settings.telegram_chat_id) {
        (Some(token), Some(chat_id)) => {
            tracing::info!("Telegram notifications enabled");
            Ok(Arc::new(
                TelegramNotifier::new(token.clone(), chat_id.clone())
                    .context("Failed to create Telegram notifier")?,
            ))
        }
        _ => Ok(Arc::new(LogNotifier)),
    }
}
