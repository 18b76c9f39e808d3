//! Latest-state store for drone telemetry: the HTTP sink the gateway forwards
//! to, an in-memory index of each drone's newest record and an optional
//! Postgres append log.

pub mod batching;
pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod rest;

use axum::{http::StatusCode, routing::get, Router};
use tracing::error;

pub use cache::{LatestStateCache, PutOutcome};
pub use clock::ReceiveClock;
pub use rest::AppState;

/// Sink API plus the `/metrics` endpoint
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(state))
}

async fn metrics_handler() -> (StatusCode, String) {
    match metrics::gather_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
