//! Binance USD-M futures WebSocket client for the aggregate trade stream
//!
//! Subscribes to `<symbol>@aggTrade` via the stream URL, so no subscription
//! frames are needed. Reconnects with a linearly growing delay up to a
//! configured attempt budget; exhausting the budget is a hard error.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info, warn};

use crate::config::FeedConfig;
use crate::feed::{FeedEvent, TradeFeed};
use crate::types::{Side, Trade};

const FEED_NAME: &str = "Binance";

/// Raw aggTrade payload from the futures stream
#[derive(Debug, Clone, Deserialize)]
pub struct AggTradeMsg {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "a")]
    pub agg_trade_id: u64,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub quantity: String,
    #[serde(rename = "T")]
    pub trade_time: i64,
    /// True when the buyer was the maker, i.e. the aggressor sold
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

impl AggTradeMsg {
    /// Convert to a normalized trade. Price and quantity arrive as strings.
    pub fn normalize(&self) -> Result<Trade> {
        let price: Decimal = self
            .price
            .parse()
            .with_context(|| format!("bad price '{}'", self.price))?;
        let quantity: Decimal = self
            .quantity
            .parse()
            .with_context(|| format!("bad quantity '{}'", self.quantity))?;
        Ok(Trade {
            symbol: self.symbol.clone(),
            id: self.agg_trade_id.to_string(),
            price,
            quantity,
            side: if self.is_buyer_maker {
                Side::Sell
            } else {
                Side::Buy
            },
            timestamp_ms: self.trade_time,
        })
    }
}

/// Binance aggTrade feed for one symbol
pub struct BinanceFeed {
    config: FeedConfig,
    /// Stream symbol (lowercase, e.g. "btcusdt")
    symbol: String,
    connected: bool,
}

impl BinanceFeed {
    pub fn new(config: FeedConfig, symbol: impl Into<String>) -> Self {
        Self {
            config,
            symbol: symbol.into().to_lowercase(),
            connected: false,
        }
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/{}@{}",
            self.config.ws_url, self.symbol, self.config.stream
        )
    }

    async fn handle_text(text: &str, tx: &Sender<FeedEvent>) -> Result<bool> {
        match serde_json::from_str::<AggTradeMsg>(text) {
            Ok(msg) if msg.event_type == "aggTrade" => match msg.normalize() {
                Ok(trade) => {
                    if tx.send(FeedEvent::Trade(trade)).await.is_err() {
                        // Receiver gone, nothing left to feed
                        return Ok(false);
                    }
                }
                Err(e) => {
                    warn!(feed = FEED_NAME, error = %e, "Dropping malformed trade");
                }
            },
            Ok(_) => {}
            Err(e) => {
                warn!(feed = FEED_NAME, error = %e, "Failed to parse message");
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl TradeFeed for BinanceFeed {
    fn name(&self) -> &'static str {
        FEED_NAME
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self, tx: Sender<FeedEvent>) -> Result<()> {
        let url = self.stream_url();
        let mut attempts = 0u32;
        let max_attempts = self.config.max_reconnect_attempts;
        let base_delay = Duration::from_millis(self.config.reconnect_base_delay_ms);
        let max_delay = Duration::from_millis(self.config.reconnect_max_delay_ms);

        'reconnect: loop {
            info!(
                feed = FEED_NAME,
                url = %url,
                attempt = attempts,
                "Connecting to trade stream..."
            );

            let (ws_stream, _) = match connect_async(&url).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!(feed = FEED_NAME, error = %e, "Connection failed");
                    let _ = tx
                        .send(FeedEvent::Error(FEED_NAME.to_string(), e.to_string()))
                        .await;

                    attempts += 1;
                    if attempts > max_attempts {
                        bail!("Max reconnection attempts ({}) reached", max_attempts);
                    }
                    let delay = std::cmp::min(base_delay * attempts, max_delay);
                    info!(
                        feed = FEED_NAME,
                        delay_secs = delay.as_secs(),
                        attempt = attempts,
                        "Reconnecting in {} seconds...",
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                    continue 'reconnect;
                }
            };

            let (mut write, mut read) = ws_stream.split();
            self.connected = true;
            attempts = 0;

            let _ = tx
                .send(FeedEvent::Connected(FEED_NAME.to_string()))
                .await;
            info!(feed = FEED_NAME, symbol = %self.symbol, "✅ Connected to trade stream");

            let should_reconnect = loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if !Self::handle_text(&text, &tx).await? {
                            break false;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        warn!(feed = FEED_NAME, "Connection closed by server");
                        break true;
                    }
                    Some(Err(e)) => {
                        error!(feed = FEED_NAME, error = %e, "WebSocket error");
                        let _ = tx
                            .send(FeedEvent::Error(FEED_NAME.to_string(), e.to_string()))
                            .await;
                        break true;
                    }
                    None => {
                        warn!(feed = FEED_NAME, "Stream ended");
                        break true;
                    }
                    _ => {}
                }
            };

            self.connected = false;
            let _ = tx
                .send(FeedEvent::Disconnected(FEED_NAME.to_string()))
                .await;

            if should_reconnect {
                attempts += 1;
                if attempts > max_attempts {
                    bail!("Max reconnection attempts ({}) reached", max_attempts);
                }
                let delay = std::cmp::min(base_delay * attempts, max_delay);
                info!(
                    feed = FEED_NAME,
                    delay_secs = delay.as_secs(),
                    attempt = attempts,
                    "🔄 Reconnecting in {} seconds...",
                    delay.as_secs()
                );
                tokio::time::sleep(delay).await;
            } else {
                break 'reconnect;
            }
        }

        Ok(())
    }
}
