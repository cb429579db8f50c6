//! Read-only HTTP status server.
//!
//! Exposes what the tracker currently believes without touching its
//! decision path:
//!
//! ```text
//! GET /health ──→ liveness and version
//! GET /live   ──→ streams in the most recent batch
//! GET /stats  ──→ tracker counters
//! ```

use crate::clock::SharedClock;
use crate::stream::Stream;
use crate::tracker::{LiveStreams, SharedTrackerStats, TrackerSnapshot};
use axum::{extract::State, http::HeaderValue, routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

/// What the handlers read from.
#[derive(Clone)]
pub struct ServerState {
    live: LiveStreams,
    stats: SharedTrackerStats,
    clock: SharedClock,
}

impl ServerState {
    pub fn new(live: LiveStreams, stats: SharedTrackerStats, clock: SharedClock) -> Self {
        Self { live, stats, clock }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Live set response
#[derive(Serialize)]
pub struct LiveResponse {
    pub count: usize,
    pub streams: Vec<Stream>,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /live
async fn live(State(state): State<Arc<ServerState>>) -> Json<LiveResponse> {
    let streams = state.live.snapshot();
    Json(LiveResponse {
        count: streams.len(),
        streams: streams.as_ref().clone(),
    })
}

/// GET /stats
async fn stats(State(state): State<Arc<ServerState>>) -> Json<TrackerSnapshot> {
    Json(state.stats.snapshot(state.clock.now_utc()))
}

/// Build the router.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/live", get(live))
        .route("/stats", get(stats))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(Arc::new(state))
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
    state: ServerState,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("status server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("status server shutting down");
            })
            .await
        {
            tracing::error!("status server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
