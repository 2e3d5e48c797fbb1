use super::candle_feed::HistoricalDataProvider;
use super::order_gate::OrderGate;
use super::sizing::{calculate_dynamic_quantity, floor_to_step, QuantitySizing};
use crate::api::Exchange;
use crate::db::PositionStore;
use crate::error::TradingError;
use crate::models::{Action, OrderAck, OrderSide, Position, TradeRecord};
use crate::notify::{NotificationDispatcher, Notifier};
use crate::strategy::{Diagnostic, PriceActionStrategy, Strategy, StrategyParams};
use crate::Result;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Per-symbol order state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolState {
    Idle,
    PendingBuy,
    Holding,
    PendingSell,
}

/// Why a held position is being closed regardless of the strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
}

/// What a single decision cycle did for one symbol
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Bought { price: f64, quantity: Decimal },
    Sold {
        price: f64,
        quantity: Decimal,
        realized_pnl: f64,
    },
    Held,
    /// An action was decided but gating blocked it
    Skipped { action: Action, reason: &'static str },
}

/// Counts for one pass over all symbols
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickSummary {
    pub bought: usize,
    pub sold: usize,
    pub held: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Drives the fetch → decide → gate → size → submit → persist → notify cycle
pub struct TradingController {
    symbols: Vec<String>,
    strategy: PriceActionStrategy,
    provider: HistoricalDataProvider,
    exchange: Arc<dyn Exchange>,
    gate: OrderGate,
    positions: Arc<dyn PositionStore>,
    notifications: NotificationDispatcher,
    quote_asset: String,
    allocation_fraction: f64,
}

impl TradingController {
    pub fn new(
        symbols: Vec<String>,
        strategy: PriceActionStrategy,
        provider: HistoricalDataProvider,
        exchange: Arc<dyn Exchange>,
        positions: Arc<dyn PositionStore>,
        notifier: Arc<dyn Notifier>,
        allocation_fraction: f64,
    ) -> Self {
        Self {
            symbols,
            strategy,
            provider,
            gate: OrderGate::new(exchange.clone()),
            exchange,
            positions,
            notifications: NotificationDispatcher::new(notifier),
            quote_asset: "USDT".to_string(),
            allocation_fraction,
        }
    }

    pub fn with_quote_asset(mut self, quote_asset: impl Into<String>) -> Self {
        self.quote_asset = quote_asset.into();
        self
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Wait for notifications still being delivered
    pub async fn flush_notifications(&self) {
        self.notifications.flush().await;
    }

    /// Stop-loss / take-profit / trailing-stop check against the latest close
    pub fn forced_exit(
        position: &Position,
        latest_close: f64,
        params: &StrategyParams,
    ) -> Option<ExitReason> {
        if !position.is_holding() {
            return None;
        }
        if latest_close <= position.stop_loss_price {
            return Some(ExitReason::StopLoss);
        }
        if latest_close >= position.take_profit_price {
            return Some(ExitReason::TakeProfit);
        }
        match params.trailing_stop_price(position.highest_price) {
            Some(trail) if latest_close <= trail => Some(ExitReason::TrailingStop),
            _ => None,
        }
    }

    pub async fn state_of(&self, symbol: &str) -> Result<SymbolState> {
        let position = self.positions.load_position(symbol).await?;
        Ok(match self.gate.pending_side(symbol).await {
            Some(OrderSide::Buy) => SymbolState::PendingBuy,
            Some(OrderSide::Sell) => SymbolState::PendingSell,
            None if position.is_holding() => SymbolState::Holding,
            None => SymbolState::Idle,
        })
    }

    /// Run every configured symbol once, sequentially
    pub async fn run_tick(&self) -> TickSummary {
        let mut summary = TickSummary::default();

        for symbol in &self.symbols {
            match self.check_prices(symbol).await {
                Ok(CycleOutcome::Bought { .. }) => summary.bought += 1,
                Ok(CycleOutcome::Sold { .. }) => summary.sold += 1,
                Ok(CycleOutcome::Held) => summary.held += 1,
                Ok(CycleOutcome::Skipped { .. }) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    if Self::log_cycle_error(symbol, &e) {
                        self.notifications
                            .alert(format!("⚠️ {} cycle aborted: {}", symbol, e))
                            .await;
                    }
                }
            }
        }

        summary
    }

    /// Log a cycle error at its level; returns true when it warrants an alert
    fn log_cycle_error(symbol: &str, error: &TradingError) -> bool {
        match error {
            TradingError::InsufficientFunds { .. } => {
                tracing::warn!(symbol = %symbol, kind = error.kind(), "⚠️  Order skipped: {}", error);
                false
            }
            TradingError::DataIntegrity(_) => {
                tracing::warn!(symbol = %symbol, kind = error.kind(), "⚠️  {}", error);
                false
            }
            _ => {
                tracing::error!(symbol = %symbol, kind = error.kind(), "❌ Cycle aborted: {}", error);
                true
            }
        }
    }

    /// One full decision cycle for `symbol`
    ///
    /// Errors are returned to the caller, which logs them; state is left
    /// unchanged whenever an error is returned.
    pub async fn check_prices(&self, symbol: &str) -> Result<CycleOutcome> {
        let mut position = self.positions.load_position(symbol).await?;
        let candles = self.provider.get_candles(symbol).await?;

        let decision = match self.strategy.decide(&candles, &position) {
            Ok(decision) => decision,
            Err(e @ TradingError::DataIntegrity(_)) => {
                tracing::warn!(symbol = %symbol, kind = e.kind(), "Holding: {}", e);
                return Ok(CycleOutcome::Held);
            }
            Err(e) => return Err(e),
        };

        if let Some(Diagnostic::InsufficientData { have, need }) = &decision.diagnostic {
            tracing::info!(
                symbol = %symbol,
                "Insufficient data ({}/{} candles), holding",
                have,
                need
            );
        }

        let Some(latest_close) = decision.latest_close else {
            return Ok(CycleOutcome::Held);
        };

        if let Some(bands) = &decision.bands {
            tracing::debug!(
                symbol = %symbol,
                close = latest_close,
                ma = bands.moving_average,
                atr = bands.atr,
                buy = bands.dynamic_buy_price,
                sell = bands.dynamic_sell_price,
                "Strategy decided {:?}",
                decision.action
            );
        }

        if position.track_high(latest_close) {
            self.persist(&position).await;
        }

        let action = match Self::forced_exit(&position, latest_close, self.strategy.params()) {
            Some(reason) => {
                tracing::info!(
                    symbol = %symbol,
                    "🛑 Forced exit ({:?}) at {:.4} (SL {:.4}, TP {:.4}, high {:.4})",
                    reason,
                    latest_close,
                    position.stop_loss_price,
                    position.take_profit_price,
                    position.highest_price
                );
                Action::Sell
            }
            None => decision.action,
        };

        match action {
            Action::Hold => Ok(CycleOutcome::Held),
            Action::Buy => self.try_buy(symbol, &position, latest_close).await,
            Action::Sell => self.try_sell(symbol, &position, latest_close).await,
        }
    }

    async fn try_buy(
        &self,
        symbol: &str,
        position: &Position,
        latest_close: f64,
    ) -> Result<CycleOutcome> {
        if position.is_holding() {
            tracing::debug!(symbol = %symbol, "BUY ignored, already holding");
            return Ok(CycleOutcome::Skipped {
                action: Action::Buy,
                reason: "already holding",
            });
        }
        if self.gate.has_active_order(symbol).await? {
            tracing::info!(symbol = %symbol, "BUY blocked, order outstanding");
            return Ok(CycleOutcome::Skipped {
                action: Action::Buy,
                reason: "order outstanding",
            });
        }

        let filters = self.exchange.symbol_filters(symbol).await?;
        let balance = self.exchange.get_balance(&self.quote_asset).await?;

        let quantity = match calculate_dynamic_quantity(
            balance,
            latest_close,
            &filters,
            self.allocation_fraction,
        ) {
            QuantitySizing::Fillable { quantity, .. } => quantity,
            QuantitySizing::Unfillable {
                notional,
                min_notional,
                ..
            } => {
                return Err(TradingError::InsufficientFunds {
                    symbol: symbol.to_string(),
                    notional,
                    min_notional,
                })
            }
        };

        let ack = self
            .exchange
            .submit_order(symbol, OrderSide::Buy, quantity)
            .await
            .map_err(|e| Self::as_rejection(symbol, e))?;

        if ack.status.is_open() {
            self.gate.mark_pending(symbol, OrderSide::Buy).await;
        }

        let price = ack.avg_price.unwrap_or(latest_close);
        let held = Self::filled_quantity(&ack, quantity);
        let params = self.strategy.params();
        let holding = Position::holding(
            symbol,
            price,
            held,
            params.stop_loss_price(price),
            params.take_profit_price(price),
        )?;

        tracing::info!(
            symbol = %symbol,
            order_id = %ack.order_id,
            "✅ BUY {} of {} @ {:.4} (SL {:.4}, TP {:.4})",
            held,
            quantity,
            price,
            holding.stop_loss_price,
            holding.take_profit_price
        );

        self.persist(&holding).await;
        self.record_trade(symbol, OrderSide::Buy, held, price, None, &ack)
            .await;
        self.notifications.buy(symbol, price, held).await;

        Ok(CycleOutcome::Bought {
            price,
            quantity: held,
        })
    }

    async fn try_sell(
        &self,
        symbol: &str,
        position: &Position,
        latest_close: f64,
    ) -> Result<CycleOutcome> {
        if !position.is_holding() {
            tracing::debug!(symbol = %symbol, "SELL ignored, nothing held");
            return Ok(CycleOutcome::Skipped {
                action: Action::Sell,
                reason: "nothing held",
            });
        }
        if self.gate.has_active_order(symbol).await? {
            tracing::info!(symbol = %symbol, "SELL blocked, order outstanding");
            return Ok(CycleOutcome::Skipped {
                action: Action::Sell,
                reason: "order outstanding",
            });
        }

        position.ensure_consistent()?;

        let filters = self.exchange.symbol_filters(symbol).await?;
        let quantity = floor_to_step(position.quantity, filters.step_size);
        if quantity <= Decimal::ZERO || quantity < filters.min_qty {
            return Err(TradingError::InsufficientFunds {
                symbol: symbol.to_string(),
                notional: quantity.to_f64().unwrap_or(0.0) * latest_close,
                min_notional: filters.min_notional,
            });
        }

        let ack = self
            .exchange
            .submit_order(symbol, OrderSide::Sell, quantity)
            .await
            .map_err(|e| Self::as_rejection(symbol, e))?;

        if ack.status.is_open() {
            self.gate.mark_pending(symbol, OrderSide::Sell).await;
        }

        let price = ack.avg_price.unwrap_or(latest_close);
        let sold = Self::filled_quantity(&ack, quantity);
        let realized_pnl = position.pnl_at(price, sold);

        tracing::info!(
            symbol = %symbol,
            order_id = %ack.order_id,
            "✅ SELL {} of {} @ {:.4} (bought {:.4}, PnL {:+.4})",
            sold,
            position.quantity,
            price,
            position.buy_price,
            realized_pnl
        );

        self.persist(&Position::none(symbol)).await;
        self.record_trade(symbol, OrderSide::Sell, sold, price, Some(realized_pnl), &ack)
            .await;
        self.notifications
            .sell(symbol, price, sold, realized_pnl)
            .await;

        Ok(CycleOutcome::Sold {
            price,
            quantity: sold,
            realized_pnl,
        })
    }

    /// Executed quantity from the ack; the submitted one while nothing has filled yet
    fn filled_quantity(ack: &OrderAck, submitted: Decimal) -> Decimal {
        if ack.executed_qty > Decimal::ZERO {
            ack.executed_qty
        } else {
            submitted
        }
    }

    async fn record_trade(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: f64,
        realized_pnl: Option<f64>,
        ack: &OrderAck,
    ) {
        let trade = TradeRecord {
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
            realized_pnl,
            order_id: ack.order_id.clone(),
            executed_at: Utc::now(),
        };
        if let Err(e) = self.positions.record_trade(&trade).await {
            tracing::error!(symbol = %symbol, kind = e.kind(), "Failed to record trade: {}", e);
        }
    }

    /// A failed save is logged; the transition still stands for this cycle
    async fn persist(&self, position: &Position) {
        if let Err(e) = self.positions.save_position(position).await {
            tracing::error!(
                symbol = %position.symbol,
                kind = e.kind(),
                "Failed to persist position: {}",
                e
            );
        }
    }

    fn as_rejection(symbol: &str, error: TradingError) -> TradingError {
        match error {
            TradingError::ExchangeRejectedOrder { .. } => error,
            other => TradingError::ExchangeRejectedOrder {
                symbol: symbol.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryPositionStore;
    use crate::execution::candle_feed::RetryPolicy;
    use crate::execution::test_support::{candles_from_closes, MockExchange, RecordingNotifier};
    use crate::models::{OrderStatus, PositionStatus};
    use crate::persistence::InMemoryCandleCache;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    const SYMBOL: &str = "BTCUSDT";

    struct Harness {
        exchange: Arc<MockExchange>,
        positions: Arc<InMemoryPositionStore>,
        notifier: Arc<RecordingNotifier>,
        controller: TradingController,
    }

    fn default_params() -> StrategyParams {
        StrategyParams::new(2, 1.0, 0.0)
            .with_ma_period(4)
            .with_exit_levels(0.05, 0.10)
    }

    fn build_controller(
        exchange: Arc<MockExchange>,
        positions: Arc<dyn PositionStore>,
        notifier: Arc<dyn Notifier>,
        params: StrategyParams,
    ) -> TradingController {
        // cache TTL 0 so each cycle sees the exchange's current candles
        let provider = HistoricalDataProvider::new(
            exchange.clone(),
            Arc::new(InMemoryCandleCache::new()),
            "1m",
            24,
            0,
        )
        .with_retry_policy(RetryPolicy::new(2, Duration::ZERO));

        TradingController::new(
            vec![SYMBOL.to_string()],
            PriceActionStrategy::new(params),
            provider,
            exchange,
            positions,
            notifier,
            0.5,
        )
    }

    fn harness_with(
        closes: &[f64],
        positions: Arc<dyn PositionStore>,
        store: Arc<InMemoryPositionStore>,
        params: StrategyParams,
    ) -> Harness {
        let exchange = Arc::new(MockExchange::new(candles_from_closes(closes)));
        let notifier = Arc::new(RecordingNotifier::default());
        let controller = build_controller(exchange.clone(), positions, notifier.clone(), params);

        Harness {
            exchange,
            positions: store,
            notifier,
            controller,
        }
    }

    fn harness(closes: &[f64], initial: Vec<Position>) -> Harness {
        let store = Arc::new(InMemoryPositionStore::with_positions(initial));
        harness_with(closes, store.clone(), store, default_params())
    }

    impl Harness {
        async fn messages(&self) -> Vec<String> {
            self.controller.flush_notifications().await;
            self.notifier.messages.lock().unwrap().clone()
        }
    }

    // Closes whose last candle sits well below MA - ATR
    const DIP: &[f64] = &[100.0, 100.0, 100.0, 100.0, 90.0];
    const FLAT: &[f64] = &[100.0, 100.0, 100.0, 100.0, 100.0];

    #[tokio::test]
    async fn test_buy_opens_position() {
        let h = harness(DIP, Vec::new());

        let outcome = h.controller.check_prices(SYMBOL).await.unwrap();

        // 1000 * 0.5 / 90 = 5.555.. floored to 0.001
        let expected_qty = Decimal::new(5555, 3);
        assert_eq!(
            outcome,
            CycleOutcome::Bought {
                price: 90.0,
                quantity: expected_qty
            }
        );
        let position = h.positions.load_position(SYMBOL).await.unwrap();
        assert!(position.is_holding());
        assert_eq!(position.buy_price, 90.0);
        assert_eq!(position.quantity, expected_qty);
        assert!((position.stop_loss_price - 85.5).abs() < 1e-9);
        assert!((position.take_profit_price - 99.0).abs() < 1e-9);
        assert_eq!(h.exchange.submitted(), vec![(SYMBOL.to_string(), OrderSide::Buy, expected_qty)]);
        assert_eq!(h.messages().await.len(), 1);
        assert_eq!(h.controller.state_of(SYMBOL).await.unwrap(), SymbolState::Holding);
    }

    #[tokio::test]
    async fn test_fill_price_prefers_exchange_average() {
        let h = harness(DIP, Vec::new());
        h.exchange.set_ack(OrderStatus::Filled, Some(90.5));

        let outcome = h.controller.check_prices(SYMBOL).await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Bought { price, .. } if price == 90.5));
        assert_eq!(h.positions.load_position(SYMBOL).await.unwrap().buy_price, 90.5);
    }

    #[tokio::test]
    async fn test_partial_fill_holds_only_executed_quantity() {
        let h = harness(DIP, Vec::new());
        h.exchange.set_ack(OrderStatus::PartiallyFilled, Some(90.0));
        h.exchange.set_executed_qty(Some(Decimal::ONE));

        let outcome = h.controller.check_prices(SYMBOL).await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Bought {
                price: 90.0,
                quantity: Decimal::ONE
            }
        );
        // 5.555 requested, 1 received
        assert_eq!(h.exchange.submitted()[0].2, Decimal::new(5555, 3));
        let position = h.positions.load_position(SYMBOL).await.unwrap();
        assert_eq!(position.quantity, Decimal::ONE);
        assert_eq!(h.controller.state_of(SYMBOL).await.unwrap(), SymbolState::PendingBuy);

        // The later exit sells and books P&L on what was actually held
        h.exchange.set_ack(OrderStatus::Filled, Some(120.0));
        h.exchange.set_executed_qty(None);
        h.exchange.set_candles(candles_from_closes(&[100.0, 100.0, 100.0, 100.0, 120.0]));
        let outcome = h.controller.check_prices(SYMBOL).await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Sold {
                price: 120.0,
                quantity: Decimal::ONE,
                realized_pnl: 30.0
            }
        );
        assert_eq!(h.exchange.submitted()[1], (SYMBOL.to_string(), OrderSide::Sell, Decimal::ONE));
    }

    #[tokio::test]
    async fn test_fee_reduced_sell_books_executed_quantity() {
        let held = Position::holding(SYMBOL, 100.0, Decimal::new(2, 0), 95.0, 110.0).unwrap();
        let h = harness(&[94.0, 94.0, 94.0, 94.0, 94.0], vec![held]);
        h.exchange.set_executed_qty(Some(Decimal::new(15, 1)));

        let outcome = h.controller.check_prices(SYMBOL).await.unwrap();

        match outcome {
            CycleOutcome::Sold {
                quantity,
                realized_pnl,
                ..
            } => {
                assert_eq!(quantity, Decimal::new(15, 1));
                assert!((realized_pnl + 9.0).abs() < 1e-9);
            }
            other => panic!("expected sell, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sell_quantity_floored_to_lot_step() {
        let held = Position::holding(SYMBOL, 100.0, Decimal::new(123456, 5), 95.0, 110.0).unwrap();
        let h = harness(&[94.0, 94.0, 94.0, 94.0, 94.0], vec![held]);

        h.controller.check_prices(SYMBOL).await.unwrap();

        assert_eq!(h.exchange.submitted()[0].2, Decimal::new(1234, 3));
    }

    #[tokio::test]
    async fn test_dust_position_is_not_submitted() {
        let held = Position::holding(SYMBOL, 100.0, Decimal::new(5, 4), 95.0, 110.0).unwrap();
        let h = harness(&[94.0, 94.0, 94.0, 94.0, 94.0], vec![held]);

        let err = h.controller.check_prices(SYMBOL).await.unwrap_err();

        assert!(matches!(err, TradingError::InsufficientFunds { .. }));
        assert!(h.exchange.submitted().is_empty());
        assert!(h.positions.load_position(SYMBOL).await.unwrap().is_holding());
    }

    #[tokio::test]
    async fn test_no_buy_while_order_active() {
        let h = harness(DIP, Vec::new());
        h.exchange.set_active_order(true);

        let outcome = h.controller.check_prices(SYMBOL).await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Skipped { action: Action::Buy, .. }));
        assert!(h.exchange.submitted().is_empty());
        assert!(!h.positions.load_position(SYMBOL).await.unwrap().is_holding());
    }

    #[tokio::test]
    async fn test_forced_stop_loss_overrides_hold() {
        // Held at 100 with SL 95; last close 94 would otherwise be a BUY/HOLD
        let held = Position::holding(SYMBOL, 100.0, Decimal::new(2, 0), 95.0, 110.0).unwrap();
        let h = harness(&[94.0, 94.0, 94.0, 94.0, 94.0], vec![held]);

        let outcome = h.controller.check_prices(SYMBOL).await.unwrap();

        match outcome {
            CycleOutcome::Sold {
                price,
                quantity,
                realized_pnl,
            } => {
                assert_eq!(price, 94.0);
                assert_eq!(quantity, Decimal::new(2, 0));
                assert!((realized_pnl + 12.0).abs() < 1e-9);
            }
            other => panic!("expected forced sell, got {:?}", other),
        }
        assert!(!h.positions.load_position(SYMBOL).await.unwrap().is_holding());
        assert_eq!(h.exchange.submitted()[0].1, OrderSide::Sell);
    }

    #[tokio::test]
    async fn test_take_profit_forces_sell() {
        let held = Position::holding(SYMBOL, 100.0, Decimal::ONE, 95.0, 105.0).unwrap();
        let h = harness(&[100.0, 100.0, 100.0, 100.0, 106.0], vec![held]);

        let outcome = h.controller.check_prices(SYMBOL).await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Sold { .. }));
    }

    #[test]
    fn test_forced_exit_order_of_checks() {
        let params = default_params().with_trailing_stop(0.05);
        let mut held = Position::holding(SYMBOL, 100.0, Decimal::ONE, 95.0, 130.0).unwrap();
        held.track_high(120.0);

        assert_eq!(TradingController::forced_exit(&held, 94.0, &params), Some(ExitReason::StopLoss));
        assert_eq!(TradingController::forced_exit(&held, 131.0, &params), Some(ExitReason::TakeProfit));
        assert_eq!(TradingController::forced_exit(&held, 113.0, &params), Some(ExitReason::TrailingStop));
        assert_eq!(TradingController::forced_exit(&held, 115.0, &params), None);
        assert_eq!(TradingController::forced_exit(&held, 113.0, &default_params()), None);
        assert_eq!(TradingController::forced_exit(&Position::none(SYMBOL), 1.0, &params), None);
    }

    #[tokio::test]
    async fn test_trailing_stop_follows_highest_close() {
        let held = Position::holding(SYMBOL, 100.0, Decimal::ONE, 90.0, 200.0).unwrap();
        let store = Arc::new(InMemoryPositionStore::with_positions(vec![held]));
        // Wide sell margin keeps the band out of the way
        let params = default_params()
            .with_sell_margin(0.5)
            .with_trailing_stop(0.05);
        let h = harness_with(&[100.0, 100.0, 100.0, 100.0, 120.0], store.clone(), store, params);

        assert_eq!(h.controller.check_prices(SYMBOL).await.unwrap(), CycleOutcome::Held);
        assert_eq!(h.positions.load_position(SYMBOL).await.unwrap().highest_price, 120.0);

        // 113 is above the stop loss but more than 5% under the 120 high
        h.exchange
            .set_candles(candles_from_closes(&[100.0, 100.0, 100.0, 100.0, 120.0, 113.0]));
        let outcome = h.controller.check_prices(SYMBOL).await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Sold { price, .. } if price == 113.0));
        assert!(!h.positions.load_position(SYMBOL).await.unwrap().is_holding());
    }

    #[tokio::test]
    async fn test_never_sells_without_position() {
        // Sharp rally clears the sell band, but nothing is held
        let h = harness(&[100.0, 100.0, 100.0, 100.0, 130.0], Vec::new());

        let outcome = h.controller.check_prices(SYMBOL).await.unwrap();

        assert_eq!(outcome, CycleOutcome::Held);
        assert!(h.exchange.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_stored_zero_quantity_holding_is_never_sold() {
        let mut broken = Position::holding(SYMBOL, 100.0, Decimal::ONE, 95.0, 110.0).unwrap();
        broken.quantity = Decimal::ZERO;
        let h = harness(&[94.0, 94.0, 94.0, 94.0, 94.0], vec![broken]);

        let err = h.controller.check_prices(SYMBOL).await.unwrap_err();

        assert!(matches!(err, TradingError::Persistence(_)));
        assert!(h.exchange.submitted().is_empty());
    }

    /// Hands back whatever record it was given, without load checks
    struct UncheckedStore {
        position: Position,
    }

    #[async_trait]
    impl PositionStore for UncheckedStore {
        async fn load_position(&self, _symbol: &str) -> Result<Position> {
            Ok(self.position.clone())
        }

        async fn save_position(&self, _position: &Position) -> Result<()> {
            Ok(())
        }

        async fn record_trade(&self, _trade: &TradeRecord) -> Result<()> {
            Ok(())
        }

        async fn trade_history(&self, _symbol: &str) -> Result<Vec<TradeRecord>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_inconsistent_holding_refuses_to_sell() {
        let position = Position {
            symbol: SYMBOL.to_string(),
            status: PositionStatus::Holding,
            buy_price: 100.0,
            quantity: Decimal::ZERO,
            stop_loss_price: 95.0,
            take_profit_price: 110.0,
            highest_price: 100.0,
            last_updated: Utc::now(),
        };
        let h = harness_with(
            &[94.0, 94.0, 94.0, 94.0, 94.0],
            Arc::new(UncheckedStore { position }),
            Arc::new(InMemoryPositionStore::new()),
            default_params(),
        );

        let err = h.controller.check_prices(SYMBOL).await.unwrap_err();

        assert!(matches!(err, TradingError::DataIntegrity(_)));
        assert!(h.exchange.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_failed_submission_leaves_state_unchanged() {
        let h = harness(DIP, Vec::new());
        h.exchange.fail_submissions(true);

        let err = h.controller.check_prices(SYMBOL).await.unwrap_err();

        assert!(matches!(err, TradingError::ExchangeRejectedOrder { .. }));
        assert!(!h.positions.load_position(SYMBOL).await.unwrap().is_holding());
        assert_eq!(h.controller.state_of(SYMBOL).await.unwrap(), SymbolState::Idle);

        // Next cycle decides from scratch and succeeds
        h.exchange.fail_submissions(false);
        let outcome = h.controller.check_prices(SYMBOL).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Bought { .. }));
    }

    #[tokio::test]
    async fn test_unfillable_buy_is_insufficient_funds() {
        let h = harness(DIP, Vec::new());
        h.exchange.set_balance(5.0);

        let err = h.controller.check_prices(SYMBOL).await.unwrap_err();

        assert!(matches!(err, TradingError::InsufficientFunds { .. }));
        assert!(h.exchange.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_open_ack_marks_pending_buy() {
        let h = harness(DIP, Vec::new());
        h.exchange.set_ack(OrderStatus::New, None);

        h.controller.check_prices(SYMBOL).await.unwrap();
        assert_eq!(h.controller.state_of(SYMBOL).await.unwrap(), SymbolState::PendingBuy);

        // Exchange still reports the order open: SELL is blocked even at take profit
        h.exchange.set_active_order(true);
        h.exchange.set_candles(candles_from_closes(&[100.0, 100.0, 100.0, 100.0, 120.0]));
        let outcome = h.controller.check_prices(SYMBOL).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Skipped { action: Action::Sell, .. }));

        h.exchange.set_active_order(false);
        h.exchange.set_ack(OrderStatus::Filled, None);
        let outcome = h.controller.check_prices(SYMBOL).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Sold { .. }));
        assert_eq!(h.controller.state_of(SYMBOL).await.unwrap(), SymbolState::Idle);
    }

    #[tokio::test]
    async fn test_round_trip_is_recorded_as_trades() {
        let h = harness(DIP, Vec::new());
        h.controller.check_prices(SYMBOL).await.unwrap();

        h.exchange.set_candles(candles_from_closes(&[100.0, 100.0, 100.0, 100.0, 120.0]));
        h.controller.check_prices(SYMBOL).await.unwrap();

        let trades = h.positions.trade_history(SYMBOL).await.unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].side, OrderSide::Buy);
        assert_eq!(trades[0].realized_pnl, None);
        assert_eq!(trades[1].side, OrderSide::Sell);
        assert_eq!(trades[1].quantity, Decimal::new(5555, 3));
        assert!((trades[1].realized_pnl.unwrap() - 30.0 * 5.555).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_insufficient_data_holds() {
        let h = harness(&[100.0, 90.0], Vec::new());
        assert_eq!(h.controller.check_prices(SYMBOL).await.unwrap(), CycleOutcome::Held);
        assert!(h.exchange.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_bad_candles_hold_without_error() {
        let h = harness(FLAT, Vec::new());
        let mut candles = candles_from_closes(DIP);
        candles[2].close = f64::NAN;
        h.exchange.set_candles(candles);

        assert_eq!(h.controller.check_prices(SYMBOL).await.unwrap(), CycleOutcome::Held);
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_cycle() {
        let h = harness(DIP, Vec::new());
        h.exchange.fail_candle_fetches(5);

        let err = h.controller.check_prices(SYMBOL).await.unwrap_err();
        assert!(matches!(err, TradingError::TransientFetch { attempts: 2, .. }));
    }

    struct FailingStore {
        inner: InMemoryPositionStore,
    }

    #[async_trait]
    impl PositionStore for FailingStore {
        async fn load_position(&self, symbol: &str) -> Result<Position> {
            self.inner.load_position(symbol).await
        }

        async fn save_position(&self, _position: &Position) -> Result<()> {
            Err(TradingError::Persistence("disk full".to_string()))
        }

        async fn record_trade(&self, _trade: &TradeRecord) -> Result<()> {
            Err(TradingError::Persistence("disk full".to_string()))
        }

        async fn trade_history(&self, symbol: &str) -> Result<Vec<TradeRecord>> {
            self.inner.trade_history(symbol).await
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_abort_cycle() {
        let failing = Arc::new(FailingStore {
            inner: InMemoryPositionStore::new(),
        });
        let h = harness_with(DIP, failing, Arc::new(InMemoryPositionStore::new()), default_params());

        let outcome = h.controller.check_prices(SYMBOL).await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Bought { .. }));
        assert_eq!(h.messages().await.len(), 1);
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify_buy(&self, _symbol: &str, _price: f64, _quantity: Decimal) -> Result<()> {
            Err(TradingError::Notification("HTTP 502 Bad Gateway".to_string()))
        }

        async fn notify_sell(&self, _symbol: &str, _price: f64, _quantity: Decimal, _pnl: f64) -> Result<()> {
            Err(TradingError::Notification("HTTP 502 Bad Gateway".to_string()))
        }

        async fn notify_alert(&self, _message: &str) -> Result<()> {
            Err(TradingError::Notification("HTTP 502 Bad Gateway".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failing_notifier_does_not_affect_trading() {
        let exchange = Arc::new(MockExchange::new(candles_from_closes(DIP)));
        let store = Arc::new(InMemoryPositionStore::new());
        let controller = build_controller(
            exchange.clone(),
            store.clone(),
            Arc::new(FailingNotifier),
            default_params(),
        );

        let outcome = controller.check_prices(SYMBOL).await.unwrap();
        controller.flush_notifications().await;

        assert!(matches!(outcome, CycleOutcome::Bought { .. }));
        assert!(store.load_position(SYMBOL).await.unwrap().is_holding());
        assert_eq!(store.trade_history(SYMBOL).await.unwrap().len(), 1);

        exchange.set_candles(candles_from_closes(&[100.0, 100.0, 100.0, 100.0, 120.0]));
        let outcome = controller.check_prices(SYMBOL).await.unwrap();
        controller.flush_notifications().await;
        assert!(matches!(outcome, CycleOutcome::Sold { .. }));
    }

    /// Delivers only once released
    struct GatedNotifier {
        release: Notify,
        delivered: AtomicBool,
    }

    #[async_trait]
    impl Notifier for GatedNotifier {
        async fn notify_buy(&self, _symbol: &str, _price: f64, _quantity: Decimal) -> Result<()> {
            self.release.notified().await;
            self.delivered.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn notify_sell(&self, _symbol: &str, _price: f64, _quantity: Decimal, _pnl: f64) -> Result<()> {
            Ok(())
        }

        async fn notify_alert(&self, _message: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_slow_notification_does_not_block_cycle() {
        let exchange = Arc::new(MockExchange::new(candles_from_closes(DIP)));
        let notifier = Arc::new(GatedNotifier {
            release: Notify::new(),
            delivered: AtomicBool::new(false),
        });
        let controller = build_controller(
            exchange,
            Arc::new(InMemoryPositionStore::new()),
            notifier.clone(),
            default_params(),
        );

        let outcome = controller.check_prices(SYMBOL).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Bought { .. }));
        assert!(!notifier.delivered.load(Ordering::SeqCst));

        notifier.release.notify_one();
        controller.flush_notifications().await;
        assert!(notifier.delivered.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_tick_counts_outcomes() {
        let h = harness(FLAT, Vec::new());
        let summary = h.controller.run_tick().await;
        assert_eq!(summary, TickSummary { held: 1, ..Default::default() });

        h.exchange.fail_candle_fetches(5);
        let summary = h.controller.run_tick().await;
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_aborted_cycle_sends_alert() {
        let h = harness(DIP, Vec::new());
        h.exchange.fail_candle_fetches(5);

        h.controller.run_tick().await;

        let messages = h.messages().await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains(SYMBOL));
        assert!(messages[0].contains("failed to fetch candles"));
    }

    #[tokio::test]
    async fn test_insufficient_funds_is_not_alerted() {
        let h = harness(DIP, Vec::new());
        h.exchange.set_balance(5.0);

        let summary = h.controller.run_tick().await;

        assert_eq!(summary.failed, 1);
        assert!(h.messages().await.is_empty());
    }
}
