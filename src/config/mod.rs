//! Configuration management for CvdFlow
//!
//! Loads from config files + environment variables via .env

use crate::types::Timeframe;
use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub feed: FeedConfig,
    pub cvd: CvdConfig,
    pub server: ServerConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Market symbol to track (e.g. "btcusdt")
    pub symbol: String,
    /// Timeframes to aggregate (1m, 5m, 15m, 1h)
    pub timeframes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Exchange WebSocket base URL
    pub ws_url: String,
    /// Stream type to subscribe (aggTrade)
    pub stream: String,
    /// Give up after this many consecutive failed connections
    pub max_reconnect_attempts: u32,
    /// Base reconnect delay in milliseconds (scaled by attempt number)
    pub reconnect_base_delay_ms: u64,
    /// Reconnect delay ceiling in milliseconds
    pub reconnect_max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CvdConfig {
    /// Maximum trades kept in the recent-trades ring
    pub trade_history_max: usize,
    /// Maximum closed candles kept per timeframe
    pub candle_capacity: usize,
    /// Minimum candles required before analysis produces a real signal
    pub min_candles: usize,
    /// Trailing candle window analysed per request
    pub analysis_window: usize,
    /// Trailing sub-window scanned for divergence extrema
    pub extrema_window: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP/WebSocket listen port
    pub port: u16,
    /// Broadcast channel capacity per subscriber
    pub broadcast_capacity: usize,
    /// Heartbeat interval in seconds
    pub heartbeat_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Enable the CSV candle sink
    pub enabled: bool,
    /// Data directory for CSV output
    pub data_dir: String,
}

impl BotConfig {
    /// Symbol in exchange stream form (lowercase)
    pub fn stream_symbol(&self) -> String {
        self.symbol.to_lowercase()
    }

    /// Symbol in canonical display form (uppercase)
    pub fn display_symbol(&self) -> String {
        self.symbol.to_uppercase()
    }

    /// Parse configured timeframes, deduplicated and sorted smallest first
    pub fn parsed_timeframes(&self) -> Result<Vec<Timeframe>> {
        let mut out: Vec<Timeframe> = Vec::new();
        for s in &self.timeframes {
            match Timeframe::from_str(s) {
                Some(tf) => {
                    if !out.contains(&tf) {
                        out.push(tf);
                    }
                }
                None => bail!("Unknown timeframe '{}' in bot.timeframes", s),
            }
        }
        if out.is_empty() {
            bail!("bot.timeframes must name at least one timeframe");
        }
        out.sort_by_key(|tf| tf.duration_millis());
        Ok(out)
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Bot defaults
            .set_default("bot.symbol", "btcusdt")?
            .set_default("bot.timeframes", vec!["1m", "5m", "15m", "1h"])?
            // Feed defaults
            .set_default("feed.ws_url", "wss://fstream.binance.com/ws")?
            .set_default("feed.stream", "aggTrade")?
            .set_default("feed.max_reconnect_attempts", 10)?
            .set_default("feed.reconnect_base_delay_ms", 5000)?
            .set_default("feed.reconnect_max_delay_ms", 60000)?
            // CVD defaults
            .set_default("cvd.trade_history_max", 1000)?
            .set_default("cvd.candle_capacity", 500)?
            .set_default("cvd.min_candles", 10)?
            .set_default("cvd.analysis_window", 20)?
            .set_default("cvd.extrema_window", 10)?
            // Server defaults
            .set_default("server.port", 3000)?
            .set_default("server.broadcast_capacity", 1024)?
            .set_default("server.heartbeat_secs", 30)?
            // Persistence defaults
            .set_default("persistence.enabled", false)?
            .set_default("persistence.data_dir", "./data")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (CVDFLOW_*)
            .add_source(Environment::with_prefix("CVDFLOW").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        self.bot.parsed_timeframes()?;
        if self.cvd.trade_history_max == 0 {
            bail!("cvd.trade_history_max must be at least 1");
        }
        if self.cvd.candle_capacity == 0 {
            bail!("cvd.candle_capacity must be at least 1");
        }
        if self.cvd.min_candles == 0 {
            bail!("cvd.min_candles must be at least 1");
        }
        if self.cvd.analysis_window == 0 {
            bail!("cvd.analysis_window must be at least 1");
        }
        if self.cvd.extrema_window > self.cvd.analysis_window {
            bail!(
                "cvd.extrema_window ({}) cannot exceed cvd.analysis_window ({})",
                self.cvd.extrema_window,
                self.cvd.analysis_window
            );
        }
        Ok(())
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "symbol={} timeframes={:?} port={} history_max={} candle_cap={} persistence={}",
            self.bot.display_symbol(),
            self.bot.timeframes,
            self.server.port,
            self.cvd.trade_history_max,
            self.cvd.candle_capacity,
            self.persistence.enabled
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
