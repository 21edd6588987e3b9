//! CVD aggregation engine
//!
//! Maintains the running cumulative volume delta for a single symbol and
//! builds OHLCV candles with CVD checkpoints across multiple timeframes.
//! Candles close lazily: the first trade that lands in a later bucket closes
//! the in-progress candle for that timeframe. Quiet periods produce no
//! candles at all.

pub mod store;

pub use store::CandleStore;

use std::collections::{HashMap, VecDeque};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::types::{Candle, CvdUpdate, Side, Timeframe, Trade, TradeRecord};

/// Trade rejection reasons
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("trade {id}: quantity must be positive, got {quantity}")]
    NonPositiveQuantity { id: String, quantity: Decimal },

    #[error("trade {id}: price must be positive, got {price}")]
    NonPositivePrice { id: String, price: Decimal },

    #[error("trade {id}: timestamp must be positive, got {timestamp_ms}")]
    InvalidTimestamp { id: String, timestamp_ms: i64 },
}

/// Everything one accepted trade produced
#[derive(Debug, Clone)]
pub struct TradeOutcome {
    /// Ring entry for the trade, including the running total after it
    pub record: TradeRecord,
    /// Per-trade CVD movement for subscribers
    pub update: CvdUpdate,
    /// Candles closed by this trade, at most one per timeframe
    pub closed: Vec<Candle>,
}

/// Point-in-time engine summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub symbol: String,
    pub cvd_total: Decimal,
    pub current_price: Decimal,
    pub trades_count: usize,
    pub current_candle: Option<Candle>,
}

/// In-progress bucket for one timeframe
#[derive(Debug, Clone)]
struct CandleState {
    open_time_ms: i64,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
    buy_volume: Decimal,
    sell_volume: Decimal,
    cvd_open: Decimal,
    cvd_close: Decimal,
}

impl CandleState {
    fn open(trade: &Trade, open_time_ms: i64, cvd_before: Decimal, cvd_after: Decimal) -> Self {
        let (buy_volume, sell_volume) = match trade.side {
            Side::Buy => (trade.quantity, Decimal::ZERO),
            Side::Sell => (Decimal::ZERO, trade.quantity),
        };
        Self {
            open_time_ms,
            open: trade.price,
            high: trade.price,
            low: trade.price,
            close: trade.price,
            volume: trade.quantity,
            buy_volume,
            sell_volume,
            cvd_open: cvd_before,
            cvd_close: cvd_after,
        }
    }

    fn apply(&mut self, trade: &Trade, cvd_after: Decimal) {
        self.high = self.high.max(trade.price);
        self.low = self.low.min(trade.price);
        self.close = trade.price;
        self.volume += trade.quantity;
        match trade.side {
            Side::Buy => self.buy_volume += trade.quantity,
            Side::Sell => self.sell_volume += trade.quantity,
        }
        self.cvd_close = cvd_after;
    }

    fn snapshot(&self, symbol: &str, timeframe: Timeframe) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            timeframe,
            open_time_ms: self.open_time_ms,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            buy_volume: self.buy_volume,
            sell_volume: self.sell_volume,
            cvd_open: self.cvd_open,
            cvd_close: self.cvd_close,
            cvd_delta: self.cvd_close - self.cvd_open,
        }
    }
}

/// Streaming CVD and candle aggregator for one symbol
#[derive(Debug)]
pub struct CvdEngine {
    symbol: String,
    /// Tracked timeframes, smallest first
    timeframes: Vec<Timeframe>,
    cvd_total: Decimal,
    /// Recent trades ring, newest last
    trades: VecDeque<TradeRecord>,
    trade_history_max: usize,
    /// In-progress candle per timeframe
    current: HashMap<Timeframe, CandleState>,
    store: CandleStore,
}

impl CvdEngine {
    pub fn new(
        symbol: impl Into<String>,
        mut timeframes: Vec<Timeframe>,
        trade_history_max: usize,
        candle_capacity: usize,
    ) -> Self {
        timeframes.sort_by_key(|tf| tf.duration_millis());
        timeframes.dedup();
        let store = CandleStore::new(&timeframes, candle_capacity);
        Self {
            symbol: symbol.into().to_uppercase(),
            timeframes,
            cvd_total: Decimal::ZERO,
            trades: VecDeque::new(),
            trade_history_max,
            current: HashMap::new(),
            store,
        }
    }

    /// Apply one trade: update the running total, the trades ring and every
    /// timeframe's candle. Rejected trades leave all state untouched.
    pub fn process_trade(&mut self, trade: Trade) -> Result<TradeOutcome, EngineError> {
        if trade.quantity <= Decimal::ZERO {
            return Err(EngineError::NonPositiveQuantity {
                id: trade.id,
                quantity: trade.quantity,
            });
        }
        if trade.price <= Decimal::ZERO {
            return Err(EngineError::NonPositivePrice {
                id: trade.id,
                price: trade.price,
            });
        }
        if trade.timestamp_ms <= 0 {
            return Err(EngineError::InvalidTimestamp {
                id: trade.id,
                timestamp_ms: trade.timestamp_ms,
            });
        }

        let delta = trade.delta();
        let cvd_before = self.cvd_total;
        self.cvd_total += delta;
        let cvd_after = self.cvd_total;

        let record = TradeRecord {
            trade: trade.clone(),
            delta,
            cvd_total: cvd_after,
        };
        self.trades.push_back(record.clone());
        while self.trades.len() > self.trade_history_max {
            self.trades.pop_front();
        }

        let mut closed = Vec::new();
        for &tf in &self.timeframes {
            let bucket = tf.bucket_start(trade.timestamp_ms);

            // Close the in-progress candle once the bucket moves strictly forward
            let finished = match self.current.get(&tf) {
                Some(state) if bucket > state.open_time_ms => {
                    Some(state.snapshot(&self.symbol, tf))
                }
                _ => None,
            };
            if let Some(candle) = finished {
                debug!(
                    timeframe = %tf,
                    open_time = candle.open_time_ms,
                    cvd_delta = %candle.cvd_delta,
                    "candle closed"
                );
                self.store.push(candle.clone());
                closed.push(candle);
            }

            self.current
                .entry(tf)
                .and_modify(|state| {
                    if bucket > state.open_time_ms {
                        *state = CandleState::open(&trade, bucket, cvd_before, cvd_after);
                    } else {
                        // Same bucket, or a late trade from an earlier one
                        state.apply(&trade, cvd_after);
                    }
                })
                .or_insert_with(|| CandleState::open(&trade, bucket, cvd_before, cvd_after));
        }

        let update = CvdUpdate {
            cvd_total: cvd_after,
            delta,
            price: trade.price,
            timestamp_ms: trade.timestamp_ms,
        };

        Ok(TradeOutcome {
            record,
            update,
            closed,
        })
    }

    /// Tracked symbol (uppercase)
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Tracked timeframes, smallest first
    pub fn timeframes(&self) -> &[Timeframe] {
        &self.timeframes
    }

    /// Smallest tracked timeframe; source of truth for aggregation
    pub fn base_timeframe(&self) -> Timeframe {
        self.timeframes.first().copied().unwrap_or_default()
    }

    /// Running CVD total over the whole stream
    pub fn cvd_total(&self) -> Decimal {
        self.cvd_total
    }

    /// Number of trades currently held in the ring
    pub fn trades_count(&self) -> usize {
        self.trades.len()
    }

    /// Last `limit` trades, oldest first
    pub fn recent_trades(&self, limit: usize) -> Vec<TradeRecord> {
        let skip = self.trades.len().saturating_sub(limit);
        self.trades.iter().skip(skip).cloned().collect()
    }

    /// Snapshot of the in-progress candle for a timeframe
    pub fn current_candle(&self, timeframe: Timeframe) -> Option<Candle> {
        self.current
            .get(&timeframe)
            .map(|state| state.snapshot(&self.symbol, timeframe))
    }

    /// Number of closed candles stored for a timeframe
    pub fn candle_count(&self, timeframe: Timeframe) -> usize {
        self.store.len(timeframe)
    }

    /// Last `limit` closed candles for a timeframe, oldest first
    pub fn candles(&self, timeframe: Timeframe, limit: usize) -> Vec<Candle> {
        self.store.recent(timeframe, limit)
    }

    /// Derive `target` candles by grouping base-timeframe history into
    /// consecutive fixed-size windows.
    ///
    /// Windows are aligned to the start of retained history rather than to
    /// clock boundaries, so results near the eviction horizon shift as old
    /// candles fall out of the ring.
    pub fn aggregated_candles(&self, target: Timeframe, limit: usize) -> Vec<Candle> {
        let base = self.base_timeframe();
        let chunk = (target.duration_millis() / base.duration_millis()) as usize;
        if chunk == 0 {
            return Vec::new();
        }
        if chunk == 1 {
            return self.store.recent(base, limit);
        }

        let candles: Vec<&Candle> = self.store.iter(base).collect();
        let mut grouped = Vec::new();
        for group in candles.chunks(chunk) {
            let first = group[0];
            let last = group[group.len() - 1];
            let mut high = first.high;
            let mut low = first.low;
            let mut volume = Decimal::ZERO;
            let mut buy_volume = Decimal::ZERO;
            let mut sell_volume = Decimal::ZERO;
            for candle in group {
                high = high.max(candle.high);
                low = low.min(candle.low);
                volume += candle.volume;
                buy_volume += candle.buy_volume;
                sell_volume += candle.sell_volume;
            }
            grouped.push(Candle {
                symbol: first.symbol.clone(),
                timeframe: target,
                open_time_ms: first.open_time_ms,
                open: first.open,
                high,
                low,
                close: last.close,
                volume,
                buy_volume,
                sell_volume,
                cvd_open: first.cvd_open,
                cvd_close: last.cvd_close,
                cvd_delta: last.cvd_close - first.cvd_open,
            });
        }

        let skip = grouped.len().saturating_sub(limit);
        grouped.into_iter().skip(skip).collect()
    }

    /// Summary for the state endpoint and the initial WebSocket push
    pub fn current_state(&self) -> EngineState {
        let base = self.base_timeframe();
        let current_candle = self.current_candle(base);
        let current_price = current_candle
            .as_ref()
            .map(|c| c.close)
            .unwrap_or(Decimal::ZERO);
        EngineState {
            symbol: self.symbol.clone(),
            cvd_total: self.cvd_total,
            current_price,
            trades_count: self.trades.len(),
            current_candle,
        }
    }
}
