//! CSV Persistence Module
//!
//! Optional append-only storage of closed candles for offline analysis.

use anyhow::{Context, Result};
use chrono::Utc;
use csv::WriterBuilder;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::warn;

use crate::types::{Candle, Timeframe};

/// Queue capacity between the trade loop and the background writer
const SINK_QUEUE_SIZE: usize = 256;

/// Closed-candle record for CSV storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleRecord {
    pub timestamp: i64,
    pub symbol: String,
    pub timeframe: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    pub cvd_open: Decimal,
    pub cvd_close: Decimal,
    pub cvd_delta: Decimal,
}

impl From<Candle> for CandleRecord {
    fn from(candle: Candle) -> Self {
        Self {
            timestamp: candle.open_time_ms,
            symbol: candle.symbol,
            timeframe: candle.timeframe.to_string(),
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
            buy_volume: candle.buy_volume,
            sell_volume: candle.sell_volume,
            cvd_open: candle.cvd_open,
            cvd_close: candle.cvd_close,
            cvd_delta: candle.cvd_delta,
        }
    }
}

/// CSV persistence manager with one writer per tracked timeframe
pub struct CsvPersistence {
    writers: HashMap<Timeframe, Arc<AsyncRwLock<csv::Writer<std::fs::File>>>>,
}

impl CsvPersistence {
    /// Create a new CSV persistence manager
    pub fn new(data_dir: &str, timeframes: &[Timeframe]) -> Result<Self> {
        let candles_dir = Path::new(data_dir).join("candles");
        fs::create_dir_all(&candles_dir).context("Failed to create data directory")?;

        let today = Utc::now().format("%Y-%m-%d");

        let mut writers = HashMap::new();
        for &timeframe in timeframes {
            let writer = Self::create_writer(
                &candles_dir,
                &format!("candles_{}_{}.csv", timeframe, today),
            )?;
            writers.insert(timeframe, Arc::new(AsyncRwLock::new(writer)));
        }

        Ok(Self { writers })
    }

    fn create_writer(dir: &Path, filename: &str) -> Result<csv::Writer<std::fs::File>> {
        let path = dir.join(filename);
        let file_has_data =
            path.exists() && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(true)
            .open(&path)
            .context("Failed to open CSV file")?;

        let writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);

        Ok(writer)
    }

    /// Append one closed candle; candles for untracked timeframes are ignored
    pub async fn save_candle(&self, candle: Candle) -> Result<()> {
        let Some(writer) = self.writers.get(&candle.timeframe) else {
            return Ok(());
        };
        let record = CandleRecord::from(candle);
        let mut writer = writer.write().await;
        writer
            .serialize(&record)
            .context("Failed to write candle record")?;
        writer.flush().context("Failed to flush candle writer")?;
        Ok(())
    }
}

/// Handle for queueing closed candles to the background writer
#[derive(Clone)]
pub struct CandleSink {
    tx: mpsc::Sender<Candle>,
}

impl CandleSink {
    /// Queue a candle without blocking; drops when the sink is backed up
    pub fn submit(&self, candle: Candle) {
        if self.tx.try_send(candle).is_err() {
            warn!("Candle sink backed up, dropping candle");
        }
    }
}

/// Spawn the background writer task and return its submission handle
pub fn spawn_candle_sink(persistence: CsvPersistence) -> CandleSink {
    let (tx, mut rx) = mpsc::channel::<Candle>(SINK_QUEUE_SIZE);

    tokio::spawn(async move {
        while let Some(candle) = rx.recv().await {
            if let Err(e) = persistence.save_candle(candle).await {
                warn!("Failed to persist candle: {:#}", e);
            }
        }
    });

    CandleSink { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::path::PathBuf;

    fn temp_data_dir(test_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "cvdflow_persistence_{}_{}",
            test_name,
            rand::random::<u64>()
        ))
    }

    fn candle(timeframe: Timeframe) -> Candle {
        Candle {
            symbol: "BTCUSDT".to_string(),
            timeframe,
            open_time_ms: 1_609_459_200_000,
            open: dec!(50000),
            high: dec!(50100),
            low: dec!(49900),
            close: dec!(50050),
            volume: dec!(12.5),
            buy_volume: dec!(7.5),
            sell_volume: dec!(5),
            cvd_open: dec!(0),
            cvd_close: dec!(2.5),
            cvd_delta: dec!(2.5),
        }
    }

    #[test]
    fn save_candle_writes_header_and_row() {
        let data_dir = temp_data_dir("save_candle");
        let persistence =
            CsvPersistence::new(data_dir.to_str().unwrap(), &[Timeframe::Min1]).unwrap();

        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            persistence.save_candle(candle(Timeframe::Min1)).await.unwrap();
        });

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let path = data_dir
            .join("candles")
            .join(format!("candles_1m_{}.csv", today));
        let content = fs::read_to_string(path).unwrap();
        let mut lines = content.lines();
        let header = lines.next().unwrap_or_default();
        assert!(
            header.starts_with("timestamp,symbol,timeframe,open,high,low,close,volume"),
            "unexpected header line: {}",
            header
        );
        assert!(lines.next().is_some(), "expected one data row after header");

        let _ = fs::remove_dir_all(&data_dir);
    }

    #[test]
    fn untracked_timeframe_is_ignored() {
        let data_dir = temp_data_dir("untracked_timeframe");
        let persistence =
            CsvPersistence::new(data_dir.to_str().unwrap(), &[Timeframe::Min1]).unwrap();

        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            persistence.save_candle(candle(Timeframe::Min5)).await.unwrap();
        });

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let path = data_dir
            .join("candles")
            .join(format!("candles_5m_{}.csv", today));
        assert!(!path.exists(), "no file should appear for untracked timeframes");

        let _ = fs::remove_dir_all(&data_dir);
    }

    #[tokio::test]
    async fn sink_writes_queued_candles() {
        let data_dir = temp_data_dir("sink");
        let persistence =
            CsvPersistence::new(data_dir.to_str().unwrap(), &[Timeframe::Min1]).unwrap();
        let sink = spawn_candle_sink(persistence);

        sink.submit(candle(Timeframe::Min1));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let path = data_dir
            .join("candles")
            .join(format!("candles_1m_{}.csv", today));
        let content = fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 2, "expected header plus one row");

        let _ = fs::remove_dir_all(&data_dir);
    }
}
