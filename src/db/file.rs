use super::{verify_loaded, PositionStore};
use crate::error::TradingError;
use crate::models::{Position, TradeRecord};
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// JSON file holding every symbol's position
///
/// The whole map is rewritten on each save through a temp file and rename,
/// so a crash mid-write leaves the previous file intact. Trades are appended
/// one JSON object per line to a sibling `.trades.jsonl` file.
pub struct FilePositionStore {
    path: PathBuf,
    trades_path: PathBuf,
    lock: Mutex<()>,
}

impl FilePositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            trades_path: path.with_extension("trades.jsonl"),
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn trades_path(&self) -> &Path {
        &self.trades_path
    }

    async fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TradingError::Persistence(e.to_string()))?;
        }
        Ok(())
    }

    async fn read_all(&self) -> Result<BTreeMap<String, Position>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                TradingError::Persistence(format!(
                    "corrupt position file {}: {}",
                    self.path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(TradingError::Persistence(format!(
                "failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn write_all(&self, positions: &BTreeMap<String, Position>) -> Result<()> {
        self.ensure_parent().await?;

        let json = serde_json::to_string_pretty(positions)
            .map_err(|e| TradingError::Persistence(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");

        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| TradingError::Persistence(format!("failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| TradingError::Persistence(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl PositionStore for FilePositionStore {
    async fn load_position(&self, symbol: &str) -> Result<Position> {
        let _guard = self.lock.lock().await;
        let mut positions = self.read_all().await?;
        match positions.remove(symbol) {
            Some(position) => verify_loaded(position),
            None => Ok(Position::none(symbol)),
        }
    }

    async fn save_position(&self, position: &Position) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut positions = self.read_all().await?;
        positions.insert(position.symbol.clone(), position.clone());
        self.write_all(&positions).await?;

        tracing::debug!(
            "Saved {} position ({:?}) to {}",
            position.symbol,
            position.status,
            self.path.display()
        );

        Ok(())
    }

    async fn record_trade(&self, trade: &TradeRecord) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.ensure_parent().await?;

        let mut line = serde_json::to_string(trade)
            .map_err(|e| TradingError::Persistence(e.to_string()))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.trades_path)
            .await
            .map_err(|e| {
                TradingError::Persistence(format!("failed to open {}: {}", self.trades_path.display(), e))
            })?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| TradingError::Persistence(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| TradingError::Persistence(e.to_string()))?;

        Ok(())
    }

    async fn trade_history(&self, symbol: &str) -> Result<Vec<TradeRecord>> {
        let _guard = self.lock.lock().await;
        let contents = match tokio::fs::read_to_string(&self.trades_path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TradingError::Persistence(e.to_string())),
        };

        let mut trades = Vec::new();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            let trade: TradeRecord = serde_json::from_str(line).map_err(|e| {
                TradingError::Persistence(format!(
                    "corrupt trade log {}: {}",
                    self.trades_path.display(),
                    e
                ))
            })?;
            if trade.symbol == symbol {
                trades.push(trade);
            }
        }
        Ok(trades)
    }
}
