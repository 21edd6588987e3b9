//! API Server Module
//!
//! HTTP/WebSocket facade over the live CVD engine.

mod api;
mod types;
mod websocket;

pub use api::create_router;
pub use types::*;
pub use websocket::EventBroadcaster;

use crate::analysis::Analyzer;
use crate::engine::CvdEngine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Shared state behind the API handlers
#[derive(Debug)]
pub struct ServerMemory {
    /// Live engine; write-locked only by the trade loop
    pub engine: RwLock<CvdEngine>,
    pub analyzer: Analyzer,
    feed_connected: AtomicBool,
    started_at: Instant,
}

impl ServerMemory {
    pub fn new(engine: CvdEngine, analyzer: Analyzer) -> Self {
        Self {
            engine: RwLock::new(engine),
            analyzer,
            feed_connected: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    /// Record upstream feed connectivity for /api/health
    pub fn set_feed_connected(&self, connected: bool) {
        self.feed_connected.store(connected, Ordering::Relaxed);
    }

    pub fn is_feed_connected(&self) -> bool {
        self.feed_connected.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Start the API server
pub async fn start_server(
    memory: Arc<ServerMemory>,
    broadcaster: EventBroadcaster,
    port: u16,
) -> anyhow::Result<()> {
    let app = create_router(memory, broadcaster);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!("🖥️ CVD API starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
