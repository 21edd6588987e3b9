//! WebSocket Broadcaster
//!
//! Fans engine events out to all connected WebSocket clients.

use tokio::sync::broadcast;

use super::types::{CandleClosedPayload, WsMessage};
use crate::types::{Candle, CvdUpdate};

/// Channel for broadcasting updates to WebSocket clients
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<String>,
}

impl EventBroadcaster {
    /// Create a new broadcaster with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to receive broadcast messages
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Number of live subscriptions
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Broadcast a message to all connected clients
    pub fn broadcast(&self, msg: &WsMessage) {
        if let Ok(json) = serde_json::to_string(msg) {
            // Ignore send errors (no receivers is fine)
            let _ = self.tx.send(json);
        }
    }

    /// Broadcast the running CVD after a trade
    pub fn broadcast_cvd_update(&self, update: CvdUpdate) {
        self.broadcast(&WsMessage::CvdUpdate(update));
    }

    /// Broadcast a closed candle
    pub fn broadcast_candle_closed(&self, candle: Candle) {
        self.broadcast(&WsMessage::CandleClosed(CandleClosedPayload {
            timeframe: candle.timeframe,
            candle,
        }));
    }

    /// Broadcast heartbeat
    pub fn broadcast_heartbeat(&self) {
        self.broadcast(&WsMessage::Heartbeat(chrono::Utc::now().timestamp_millis()));
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}
