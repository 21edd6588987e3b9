//! CvdFlow entrypoint
//!
//! Wires the exchange trade feed into the CVD engine and serves the
//! HTTP/WebSocket API until the feed gives up or Ctrl+C arrives.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cvdflow::analysis::{Analyzer, AnalyzerConfig};
use cvdflow::config::AppConfig;
use cvdflow::engine::CvdEngine;
use cvdflow::feed::{BinanceFeed, FeedEvent, TradeFeed};
use cvdflow::persistence::{spawn_candle_sink, CandleSink, CsvPersistence};
use cvdflow::server::{start_server, EventBroadcaster, ServerMemory};

const FEED_QUEUE_SIZE: usize = 1024;
const STATUS_INTERVAL_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cvdflow=debug")),
        )
        .init();

    info!("🚀 Starting CvdFlow...");

    // 1. Load configuration (.env + config files + CVDFLOW_* overrides)
    let config = AppConfig::load().context("Failed to load configuration")?;
    info!("⚙️ {}", config.digest());

    let symbol = config.bot.display_symbol();
    let timeframes = config.bot.parsed_timeframes()?;

    // 2. Engine, analyzer and shared server state
    let engine = CvdEngine::new(
        &symbol,
        timeframes.clone(),
        config.cvd.trade_history_max,
        config.cvd.candle_capacity,
    );
    let analyzer = Analyzer::new(AnalyzerConfig {
        min_candles: config.cvd.min_candles,
        window: config.cvd.analysis_window,
        extrema_window: config.cvd.extrema_window,
    });
    let memory = Arc::new(ServerMemory::new(engine, analyzer));
    let broadcaster = EventBroadcaster::new(config.server.broadcast_capacity);

    // 3. Optional CSV candle sink
    let candle_sink: Option<CandleSink> = if config.persistence.enabled {
        let persistence = CsvPersistence::new(&config.persistence.data_dir, &timeframes)?;
        info!(
            "💾 Candle persistence enabled ({})",
            config.persistence.data_dir
        );
        Some(spawn_candle_sink(persistence))
    } else {
        None
    };

    // 4. API server
    let server_memory = Arc::clone(&memory);
    let server_broadcaster = broadcaster.clone();
    let port = config.server.port;
    tokio::spawn(async move {
        if let Err(e) = start_server(server_memory, server_broadcaster, port).await {
            error!("Server error: {:#}", e);
        }
    });

    // 5. Trade feed
    let (feed_tx, mut feed_rx) = mpsc::channel::<FeedEvent>(FEED_QUEUE_SIZE);
    let mut feed = BinanceFeed::new(config.feed.clone(), config.bot.stream_symbol());
    let feed_task = tokio::spawn(async move { feed.connect(feed_tx).await });

    // 6. Heartbeat keeps WebSocket clients alive
    let heartbeat_broadcaster = broadcaster.clone();
    let heartbeat_secs = config.server.heartbeat_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(heartbeat_secs));
        loop {
            interval.tick().await;
            heartbeat_broadcaster.broadcast_heartbeat();
        }
    });

    // 7. Periodic status line
    let status_memory = Arc::clone(&memory);
    let status_timeframes = timeframes.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(STATUS_INTERVAL_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let engine = status_memory.engine.read().await;
            let counts: Vec<String> = status_timeframes
                .iter()
                .map(|tf| format!("{}:{}", tf, engine.candle_count(*tf)))
                .collect();
            info!(
                "📊 {} | CVD {} | {} trades | candles [{}]",
                engine.symbol(),
                engine.cvd_total(),
                engine.trades_count(),
                counts.join(" ")
            );
        }
    });

    // 8. Main loop: apply trades, fan out updates, watch for shutdown
    info!("✅ CvdFlow running ({}), press Ctrl+C to stop", symbol);
    loop {
        tokio::select! {
            event = feed_rx.recv() => match event {
                Some(FeedEvent::Trade(trade)) => {
                    let outcome = {
                        let mut engine = memory.engine.write().await;
                        engine.process_trade(trade)
                    };
                    match outcome {
                        Ok(outcome) => {
                            broadcaster.broadcast_cvd_update(outcome.update);
                            for candle in outcome.closed {
                                info!(
                                    "📊 {} candle closed | close {} cvd_delta {}",
                                    candle.timeframe, candle.close, candle.cvd_delta
                                );
                                if let Some(sink) = &candle_sink {
                                    sink.submit(candle.clone());
                                }
                                broadcaster.broadcast_candle_closed(candle);
                            }
                        }
                        Err(e) => warn!("Rejected trade: {}", e),
                    }
                }
                Some(FeedEvent::Connected(name)) => {
                    memory.set_feed_connected(true);
                    info!("📡 {} feed connected", name);
                }
                Some(FeedEvent::Disconnected(name)) => {
                    memory.set_feed_connected(false);
                    warn!("📡 {} feed disconnected", name);
                }
                Some(FeedEvent::Error(name, message)) => {
                    warn!("{} feed error: {}", name, message);
                }
                None => {
                    // Feed task finished and dropped its sender
                    memory.set_feed_connected(false);
                    match feed_task.await {
                        Ok(Ok(())) => {
                            info!("Trade feed closed, shutting down");
                            break;
                        }
                        Ok(Err(e)) => return Err(e.context("Trade feed terminated")),
                        Err(e) => return Err(anyhow!("Trade feed task panicked: {}", e)),
                    }
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Shutdown signal received");
                break;
            }
        }
    }

    info!("👋 CvdFlow stopped");
    Ok(())
}
