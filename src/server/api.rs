//! HTTP API
//!
//! REST endpoints over the live engine, plus the WebSocket event stream.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use super::types::*;
use super::{ApiResponse, EventBroadcaster, ServerMemory};
use crate::types::Timeframe;

const DEFAULT_CANDLE_LIMIT: usize = 100;
const DEFAULT_TRADE_LIMIT: usize = 50;

/// Create the API router with all endpoints
pub fn create_router(memory: Arc<ServerMemory>, broadcaster: EventBroadcaster) -> Router {
    Router::new()
        // Query surface
        .route("/api/state", get(get_state))
        .route("/api/cvd/:timeframe", get(get_candles))
        .route("/api/analysis/:timeframe", get(get_analysis))
        .route("/api/trades", get(get_trades))
        .route("/api/debug", get(get_debug))
        .route("/api/health", get(get_health))
        // WebSocket
        .route("/ws", axum::routing::get(websocket_handler))
        // State
        .with_state((memory, broadcaster))
        // CORS for external dashboards
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

// ─────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────

/// GET /api/state - Current engine snapshot
async fn get_state(
    State((memory, _)): State<(Arc<ServerMemory>, EventBroadcaster)>,
) -> impl IntoResponse {
    let state = memory.engine.read().await.current_state();
    Json(ApiResponse::success(state))
}

#[derive(Debug, Deserialize)]
struct CandlesQuery {
    limit: Option<usize>,
    aggregate: Option<bool>,
}

/// GET /api/cvd/:timeframe?limit=100&aggregate=true - Candle history
async fn get_candles(
    Path(timeframe): Path<String>,
    Query(query): Query<CandlesQuery>,
    State((memory, _)): State<(Arc<ServerMemory>, EventBroadcaster)>,
) -> impl IntoResponse {
    let Some(tf) = Timeframe::from_str(&timeframe) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!("unknown timeframe: {}", timeframe))),
        );
    };

    let limit = query.limit.unwrap_or(DEFAULT_CANDLE_LIMIT);
    let engine = memory.engine.read().await;

    // Derived series only makes sense above the base timeframe
    let aggregated = query.aggregate.unwrap_or(false) && tf != engine.base_timeframe();
    let data = if aggregated {
        engine.aggregated_candles(tf, limit)
    } else {
        engine.candles(tf, limit)
    };
    tracing::debug!(
        "Serving {} {} candles (aggregated: {})",
        data.len(),
        tf,
        aggregated
    );

    let response = CandlesResponse {
        timeframe: tf,
        count: data.len(),
        aggregated,
        data,
        meta: CandlesMeta {
            total_trades: engine.trades_count(),
            cvd_total: engine.cvd_total(),
            has_current_candle: engine.current_candle(tf).is_some(),
        },
    };
    (StatusCode::OK, Json(ApiResponse::success(response)))
}

/// GET /api/analysis/:timeframe - Rule-based read of recent candle flow
async fn get_analysis(
    Path(timeframe): Path<String>,
    State((memory, _)): State<(Arc<ServerMemory>, EventBroadcaster)>,
) -> impl IntoResponse {
    let Some(tf) = Timeframe::from_str(&timeframe) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!("unknown timeframe: {}", timeframe))),
        );
    };

    let engine = memory.engine.read().await;
    let candles = engine.candles(tf, engine.candle_count(tf));
    let analysis = memory.analyzer.analyze(&candles, tf);
    (StatusCode::OK, Json(ApiResponse::success(analysis)))
}

#[derive(Debug, Deserialize)]
struct TradesQuery {
    limit: Option<usize>,
}

/// GET /api/trades?limit=50 - Recent trades with running CVD
async fn get_trades(
    Query(query): Query<TradesQuery>,
    State((memory, _)): State<(Arc<ServerMemory>, EventBroadcaster)>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_TRADE_LIMIT);
    let engine = memory.engine.read().await;
    let trades = engine.recent_trades(limit);
    Json(ApiResponse::success(TradesResponse {
        symbol: engine.symbol().to_string(),
        count: trades.len(),
        trades,
    }))
}

/// GET /api/debug - Internal counters for operational inspection
async fn get_debug(
    State((memory, _)): State<(Arc<ServerMemory>, EventBroadcaster)>,
) -> impl IntoResponse {
    let engine = memory.engine.read().await;
    let timeframes = engine
        .timeframes()
        .iter()
        .map(|&tf| TimeframeDebug {
            timeframe: tf,
            closed_candles: engine.candle_count(tf),
            current_candle: engine.current_candle(tf),
        })
        .collect();
    Json(ApiResponse::success(DebugResponse {
        symbol: engine.symbol().to_string(),
        cvd_total: engine.cvd_total(),
        trades_count: engine.trades_count(),
        timeframes,
    }))
}

/// GET /api/health - Liveness, feed status, client count
async fn get_health(
    State((memory, broadcaster)): State<(Arc<ServerMemory>, EventBroadcaster)>,
) -> impl IntoResponse {
    let symbol = memory.engine.read().await.symbol().to_string();
    Json(ApiResponse::success(HealthResponse {
        status: "ok".to_string(),
        symbol,
        uptime_secs: memory.uptime_secs(),
        feed_connected: memory.is_feed_connected(),
        websocket_clients: broadcaster.receiver_count(),
        timestamp: chrono::Utc::now().timestamp_millis(),
    }))
}

// ─────────────────────────────────────────────────────────────────
// WebSocket Handler
// ─────────────────────────────────────────────────────────────────

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::Response,
};

/// WebSocket upgrade handler
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State((memory, broadcaster)): State<(Arc<ServerMemory>, EventBroadcaster)>,
) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, memory, broadcaster))
}

/// Outgoing message type for WebSocket
enum OutgoingMessage {
    Text(String),
    Pong(Vec<u8>),
}

/// Handle WebSocket connection
async fn handle_websocket(
    socket: WebSocket,
    memory: Arc<ServerMemory>,
    broadcaster: EventBroadcaster,
) {
    use futures_util::{SinkExt, StreamExt};

    tracing::info!("🖥️ New WebSocket connection");

    let (mut sender, mut receiver) = socket.split();

    // Send initial state
    let initial_state = memory.engine.read().await.current_state();
    let msg = WsMessage::InitialState(initial_state);
    if let Ok(json) = serde_json::to_string(&msg) {
        if sender.send(Message::Text(json)).await.is_err() {
            return;
        }
    }

    // Subscribe to broadcasts
    let mut rx = broadcaster.subscribe();

    // Channel for outgoing messages
    let (out_tx, mut out_rx) = tokio::sync::mpsc::channel::<OutgoingMessage>(32);

    // Spawn task to send outgoing messages
    let send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let result = match msg {
                OutgoingMessage::Text(text) => sender.send(Message::Text(text)).await,
                OutgoingMessage::Pong(data) => sender.send(Message::Pong(data)).await,
            };
            if result.is_err() {
                break;
            }
        }
    });

    // Handle incoming messages (ping/pong) and relay broadcast updates
    loop {
        tokio::select! {
            // Broadcast updates
            broadcast_msg = rx.recv() => {
                if let Ok(msg) = broadcast_msg {
                    if out_tx.send(OutgoingMessage::Text(msg)).await.is_err() {
                        break;
                    }
                }
            }
            // Incoming messages
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Ping(data))) => {
                        // Respond with pong via the outgoing channel
                        if out_tx.send(OutgoingMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received WebSocket message: {}", text);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
        }
    }

    send_task.abort();
    tracing::info!("🖥️ WebSocket connection closed");
}
