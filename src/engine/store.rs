//! Bounded candle history
//!
//! Append-only per-timeframe store of closed candles with FIFO eviction.
//! Only the engine writes; everything else reads snapshots.

use std::collections::{HashMap, VecDeque};

use crate::types::{Candle, Timeframe};

/// Closed-candle store with a fixed per-timeframe capacity
#[derive(Debug)]
pub struct CandleStore {
    history: HashMap<Timeframe, VecDeque<Candle>>,
    capacity: usize,
}

impl CandleStore {
    pub fn new(timeframes: &[Timeframe], capacity: usize) -> Self {
        let mut history = HashMap::new();
        for tf in timeframes {
            history.insert(*tf, VecDeque::new());
        }
        Self { history, capacity }
    }

    /// Append a closed candle, evicting the oldest once past capacity
    pub fn push(&mut self, candle: Candle) {
        let history = self
            .history
            .entry(candle.timeframe)
            .or_insert_with(VecDeque::new);
        history.push_back(candle);
        while history.len() > self.capacity {
            history.pop_front();
        }
    }

    /// Number of closed candles stored for a timeframe
    pub fn len(&self, timeframe: Timeframe) -> usize {
        self.history.get(&timeframe).map(|h| h.len()).unwrap_or(0)
    }

    /// Last `limit` closed candles in chronological order
    pub fn recent(&self, timeframe: Timeframe, limit: usize) -> Vec<Candle> {
        self.history
            .get(&timeframe)
            .map(|h| {
                let skip = h.len().saturating_sub(limit);
                h.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    /// Iterate all stored candles for a timeframe, oldest first
    pub fn iter(&self, timeframe: Timeframe) -> impl Iterator<Item = &Candle> {
        self.history.get(&timeframe).into_iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn make_candle(timeframe: Timeframe, open_time_ms: i64, close: Decimal) -> Candle {
        Candle {
            symbol: "BTCUSDT".to_string(),
            timeframe,
            open_time_ms,
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
            buy_volume: dec!(1),
            sell_volume: dec!(0),
            cvd_open: dec!(0),
            cvd_close: dec!(1),
            cvd_delta: dec!(1),
        }
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut store = CandleStore::new(&[Timeframe::Min1], 3);
        for i in 0..5 {
            store.push(make_candle(Timeframe::Min1, i * 60_000, dec!(100)));
        }
        assert_eq!(store.len(Timeframe::Min1), 3);
        let all = store.recent(Timeframe::Min1, 10);
        assert_eq!(all[0].open_time_ms, 120_000);
        assert_eq!(all[2].open_time_ms, 240_000);
    }

    #[test]
    fn recent_returns_chronological_tail() {
        let mut store = CandleStore::new(&[Timeframe::Min1], 10);
        for i in 0..4 {
            store.push(make_candle(Timeframe::Min1, i * 60_000, dec!(100)));
        }
        let tail = store.recent(Timeframe::Min1, 2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].open_time_ms, 120_000);
        assert_eq!(tail[1].open_time_ms, 180_000);
    }

    #[test]
    fn unknown_timeframe_reads_empty() {
        let store = CandleStore::new(&[Timeframe::Min1], 10);
        assert_eq!(store.len(Timeframe::Hour1), 0);
        assert!(store.recent(Timeframe::Hour1, 5).is_empty());
    }
}
