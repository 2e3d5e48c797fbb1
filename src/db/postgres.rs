use super::{verify_loaded, PositionStore};
use crate::error::TradingError;
use crate::models::{OrderSide, Position, PositionStatus, TradeRecord};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

/// Postgres persistence for positions (one row per symbol)
pub struct PostgresPositionStore {
    pool: PgPool,
}

impl PostgresPositionStore {
    /// Connect to Postgres and run pending migrations
    ///
    /// # Arguments
    /// * `database_url` - Postgres connection URL
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres at {}", database_url);

        Ok(Self { pool })
    }

    /// Load every stored position (used for the startup summary)
    pub async fn load_all(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, status, buy_price, quantity,
                   stop_loss_price, take_profit_price, highest_price, last_updated
            FROM positions
            ORDER BY symbol ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Self::row_to_position(row).and_then(verify_loaded))
            .collect()
    }

    fn row_to_position(row: &sqlx::postgres::PgRow) -> Result<Position> {
        let status_str: String = row.get("status");
        let status = match status_str.as_str() {
            "None" => PositionStatus::None,
            "Holding" => PositionStatus::Holding,
            other => {
                return Err(TradingError::Persistence(format!(
                    "Invalid position status: {}",
                    other
                )))
            }
        };

        let quantity: Decimal = row.get("quantity");
        let last_updated: DateTime<Utc> = row.get("last_updated");

        Ok(Position {
            symbol: row.get("symbol"),
            status,
            buy_price: row.get("buy_price"),
            quantity,
            stop_loss_price: row.get("stop_loss_price"),
            take_profit_price: row.get("take_profit_price"),
            highest_price: row.get("highest_price"),
            last_updated,
        })
    }

    fn status_str(status: PositionStatus) -> &'static str {
        match status {
            PositionStatus::None => "None",
            PositionStatus::Holding => "Holding",
        }
    }

    fn side_str(side: OrderSide) -> &'static str {
        match side {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        }
    }

    fn row_to_trade(row: &sqlx::postgres::PgRow) -> Result<TradeRecord> {
        let side_str: String = row.get("side");
        let side = match side_str.as_str() {
            "Buy" => OrderSide::Buy,
            "Sell" => OrderSide::Sell,
            other => {
                return Err(TradingError::Persistence(format!(
                    "Invalid trade side: {}",
                    other
                )))
            }
        };

        Ok(TradeRecord {
            symbol: row.get("symbol"),
            side,
            quantity: row.get("quantity"),
            price: row.get("price"),
            realized_pnl: row.get("realized_pnl"),
            order_id: row.get("order_id"),
            executed_at: row.get("executed_at"),
        })
    }
}

#[async_trait]
impl PositionStore for PostgresPositionStore {
    async fn load_position(&self, symbol: &str) -> Result<Position> {
        let row = sqlx::query(
            r#"
            SELECT symbol, status, buy_price, quantity,
                   stop_loss_price, take_profit_price, highest_price, last_updated
            FROM positions
            WHERE symbol = $1
            "#,
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => verify_loaded(Self::row_to_position(&row)?),
            None => Ok(Position::none(symbol)),
        }
    }

    async fn save_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                symbol, status, buy_price, quantity,
                stop_loss_price, take_profit_price, highest_price, last_updated
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (symbol) DO UPDATE SET
                status = EXCLUDED.status,
                buy_price = EXCLUDED.buy_price,
                quantity = EXCLUDED.quantity,
                stop_loss_price = EXCLUDED.stop_loss_price,
                take_profit_price = EXCLUDED.take_profit_price,
                highest_price = EXCLUDED.highest_price,
                last_updated = EXCLUDED.last_updated
            "#,
        )
        .bind(&position.symbol)
        .bind(Self::status_str(position.status))
        .bind(position.buy_price)
        .bind(position.quantity)
        .bind(position.stop_loss_price)
        .bind(position.take_profit_price)
        .bind(position.highest_price)
        .bind(position.last_updated)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            "Saved {} position ({:?}) to Postgres",
            position.symbol,
            position.status
        );

        Ok(())
    }

    async fn record_trade(&self, trade: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                symbol, side, quantity, price, realized_pnl, order_id, executed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&trade.symbol)
        .bind(Self::side_str(trade.side))
        .bind(trade.quantity)
        .bind(trade.price)
        .bind(trade.realized_pnl)
        .bind(&trade.order_id)
        .bind(trade.executed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn trade_history(&self, symbol: &str) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, side, quantity, price, realized_pnl, order_id, executed_at
            FROM trades
            WHERE symbol = $1
            ORDER BY executed_at ASC, id ASC
            "#,
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_trade).collect()
    }
}
