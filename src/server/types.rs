//! API Types
//!
//! Request/response payloads for the REST endpoints and the WebSocket stream.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::engine::EngineState;
use crate::types::{Candle, CvdUpdate, Timeframe, TradeRecord};

// ─────────────────────────────────────────────────────────────────
// REST Response Types
// ─────────────────────────────────────────────────────────────────

/// Candle history for one timeframe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandlesResponse {
    pub timeframe: Timeframe,
    /// Number of candles returned
    pub count: usize,
    /// True when the series was derived by grouping base candles
    pub aggregated: bool,
    pub data: Vec<Candle>,
    pub meta: CandlesMeta,
}

/// Engine counters attached to candle queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandlesMeta {
    pub total_trades: usize,
    pub cvd_total: Decimal,
    pub has_current_candle: bool,
}

/// Recent trades with their running CVD totals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradesResponse {
    pub symbol: String,
    pub count: usize,
    pub trades: Vec<TradeRecord>,
}

/// Process health for /api/health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub symbol: String,
    pub uptime_secs: u64,
    pub feed_connected: bool,
    pub websocket_clients: usize,
    pub timestamp: i64,
}

/// Internal counters for /api/debug; diagnostic only, not a stable contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugResponse {
    pub symbol: String,
    pub cvd_total: Decimal,
    pub trades_count: usize,
    pub timeframes: Vec<TimeframeDebug>,
}

/// Per-timeframe counters for /api/debug
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeframeDebug {
    pub timeframe: Timeframe,
    pub closed_candles: usize,
    pub current_candle: Option<Candle>,
}

// ─────────────────────────────────────────────────────────────────
// WebSocket Message Types
// ─────────────────────────────────────────────────────────────────

/// Messages pushed to WebSocket subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    /// Full engine snapshot (sent on connect)
    InitialState(EngineState),
    /// Running CVD after a trade
    CvdUpdate(CvdUpdate),
    /// A candle rolled over
    CandleClosed(CandleClosedPayload),
    /// Keep-alive with server timestamp
    Heartbeat(i64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleClosedPayload {
    pub timeframe: Timeframe,
    pub candle: Candle,
}

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
