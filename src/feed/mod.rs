//! Upstream trade feeds
//!
//! A feed connects to an exchange stream, normalizes raw messages into
//! [`Trade`] values and pushes events over an mpsc channel. Reconnection is
//! the feed's own business; consumers only see the event stream.

pub mod binance;

pub use binance::BinanceFeed;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc::Sender;

use crate::types::Trade;

/// Events emitted by a trade feed
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Connection established (feed name)
    Connected(String),
    /// Connection lost; the feed retries on its own (feed name)
    Disconnected(String),
    /// Transport error worth surfacing (feed name, message)
    Error(String, String),
    /// Normalized trade
    Trade(Trade),
}

/// A source of normalized trades
#[async_trait]
pub trait TradeFeed: Send + Sync {
    /// Feed name for logging
    fn name(&self) -> &'static str;

    /// Connect and stream events into `tx` until the retry budget is
    /// exhausted (error) or the receiver goes away (clean return).
    async fn connect(&mut self, tx: Sender<FeedEvent>) -> Result<()>;

    /// Whether the underlying connection is currently up
    fn is_connected(&self) -> bool;
}
