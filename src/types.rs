//! Core types used throughout CvdFlow
//!
//! Defines common data structures for trades, candles and CVD updates.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported candle timeframes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    Min1,
    #[serde(rename = "5m")]
    Min5,
    #[serde(rename = "15m")]
    Min15,
    #[serde(rename = "1h")]
    Hour1,
}

impl Default for Timeframe {
    fn default() -> Self {
        Timeframe::Min1
    }
}

impl Timeframe {
    /// All supported timeframes, smallest first
    pub const ALL: [Timeframe; 4] = [
        Timeframe::Min1,
        Timeframe::Min5,
        Timeframe::Min15,
        Timeframe::Hour1,
    ];

    /// Get duration in seconds
    pub fn duration_secs(&self) -> u64 {
        match self {
            Timeframe::Min1 => 60,
            Timeframe::Min5 => 5 * 60,
            Timeframe::Min15 => 15 * 60,
            Timeframe::Hour1 => 60 * 60,
        }
    }

    /// Get duration in milliseconds
    pub fn duration_millis(&self) -> i64 {
        self.duration_secs() as i64 * 1000
    }

    /// Start of the bucket containing `timestamp_ms`, anchored to the Unix epoch
    pub fn bucket_start(&self, timestamp_ms: i64) -> i64 {
        let period = self.duration_millis();
        timestamp_ms - timestamp_ms.rem_euclid(period)
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "1m" | "1min" => Some(Timeframe::Min1),
            "5m" | "5min" => Some(Timeframe::Min5),
            "15m" | "15min" => Some(Timeframe::Min15),
            "1h" | "1hour" | "60m" => Some(Timeframe::Hour1),
            _ => None,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeframe::Min1 => write!(f, "1m"),
            Timeframe::Min5 => write!(f, "5m"),
            Timeframe::Min15 => write!(f, "15m"),
            Timeframe::Hour1 => write!(f, "1h"),
        }
    }
}

/// Aggressor side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Signed CVD contribution for a quantity on this side
    pub fn signed(&self, quantity: Decimal) -> Decimal {
        match self {
            Side::Buy => quantity,
            Side::Sell => -quantity,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Normalized trade from the exchange feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Market symbol (e.g. "BTCUSDT")
    pub symbol: String,
    /// Exchange-assigned aggregate trade id
    pub id: String,
    /// Execution price
    pub price: Decimal,
    /// Executed quantity in the base asset
    pub quantity: Decimal,
    /// Aggressor side
    pub side: Side,
    /// Exchange timestamp in milliseconds
    pub timestamp_ms: i64,
}

impl Trade {
    /// Signed CVD contribution of this trade
    pub fn delta(&self) -> Decimal {
        self.side.signed(self.quantity)
    }
}

/// Trade enriched with its CVD contribution, as kept in the recent-trades ring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    #[serde(flatten)]
    pub trade: Trade,
    /// Signed quantity this trade added to the running total
    pub delta: Decimal,
    /// Running CVD total after applying this trade
    pub cvd_total: Decimal,
}

/// A closed or in-progress OHLCV candle with CVD checkpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    /// Market symbol
    pub symbol: String,
    /// Timeframe this candle belongs to
    pub timeframe: Timeframe,
    /// Bucket start timestamp in milliseconds
    pub open_time_ms: i64,
    /// Open price
    pub open: Decimal,
    /// High price
    pub high: Decimal,
    /// Low price
    pub low: Decimal,
    /// Close price
    pub close: Decimal,
    /// Total traded quantity
    pub volume: Decimal,
    /// Quantity from buy-aggressor trades
    pub buy_volume: Decimal,
    /// Quantity from sell-aggressor trades
    pub sell_volume: Decimal,
    /// Running CVD total just before the candle's first trade
    pub cvd_open: Decimal,
    /// Running CVD total after the candle's latest trade
    pub cvd_close: Decimal,
    /// Net CVD movement over the candle (`cvd_close - cvd_open`)
    pub cvd_delta: Decimal,
}

impl Candle {
    /// Bucket end timestamp in milliseconds (exclusive)
    pub fn close_time_ms(&self) -> i64 {
        self.open_time_ms + self.timeframe.duration_millis()
    }
}

/// Per-trade CVD movement pushed to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvdUpdate {
    /// Running CVD total after the trade
    pub cvd_total: Decimal,
    /// Signed contribution of the trade
    pub delta: Decimal,
    /// Trade price
    pub price: Decimal,
    /// Trade timestamp in milliseconds
    pub timestamp_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn timeframe_roundtrip() {
        for tf in Timeframe::ALL {
            assert_eq!(Timeframe::from_str(&tf.to_string()), Some(tf));
        }
        assert_eq!(Timeframe::from_str("1H"), Some(Timeframe::Hour1));
        assert_eq!(Timeframe::from_str("2m"), None);
    }

    #[test]
    fn bucket_start_truncates_to_boundary() {
        // 2021-01-01 00:00:30 UTC
        let ts = 1_609_459_230_000;
        assert_eq!(Timeframe::Min1.bucket_start(ts), 1_609_459_200_000);
        assert_eq!(Timeframe::Min5.bucket_start(ts), 1_609_459_200_000);
        assert_eq!(Timeframe::Hour1.bucket_start(ts), 1_609_459_200_000);

        // 00:59:59.999 is still inside the first hour bucket
        let late = 1_609_459_200_000 + 60 * 60 * 1000 - 1;
        assert_eq!(Timeframe::Hour1.bucket_start(late), 1_609_459_200_000);
        // one more millisecond rolls the hour
        assert_eq!(
            Timeframe::Hour1.bucket_start(late + 1),
            1_609_459_200_000 + 60 * 60 * 1000
        );
    }

    #[test]
    fn bucket_start_on_exact_boundary_is_identity() {
        let ts = 1_609_459_200_000;
        for tf in Timeframe::ALL {
            assert_eq!(tf.bucket_start(ts), ts);
        }
    }

    #[test]
    fn side_signs_quantity() {
        assert_eq!(Side::Buy.signed(dec!(1.5)), dec!(1.5));
        assert_eq!(Side::Sell.signed(dec!(1.5)), dec!(-1.5));
    }
}
