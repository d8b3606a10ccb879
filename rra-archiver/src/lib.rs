//! rra-archiver library
//!
//! Discovers new posts from monitored feeds, submits each post's URL
//! variants to archival services, and verifies the captures over time.
//! An optional read-only HTTP surface reports leg status.

use axum::Router;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod error;
pub mod services;
pub mod workflow;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool (read-only)
    pub db: SqlitePool,
}

impl AppState {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

/// Build the read surface router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .route("/api/legs", get(api::list_legs))
        .route("/api/legs/:item_id/:variant/:service", get(api::get_leg_by_key))
        .route("/api/stats", get(api::get_stats))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the read surface until `cancel` fires
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
