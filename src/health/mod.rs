//! Health check endpoints
//!
//! - `/health`: liveness, always 200 while the process runs
//! - `/ready`: 200 once every shard is provisioned and, when a queue is
//!   configured, NATS is connected
//! - `/metrics`: Prometheus text format

use crate::controller::Controller;
use crate::metrics::ControllerMetrics;
use crate::nats::NatsConsumer;
use crate::shard::ShardSnapshot;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub umbrella: String,
    pub shards_total: usize,
    pub shards_provisioned: usize,
    pub current_shard: String,
    pub tracked_ips: usize,
    pub expiry_paused: bool,
    pub nats_connected: bool,
    pub shards: Vec<ShardSnapshot>,
}

/// Application state for health endpoints
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
    pub nats: Option<Arc<NatsConsumer>>,
    pub metrics: ControllerMetrics,
}

/// Create the health check router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Health endpoint - always returns 200 if process is running
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn ready_response(state: &AppState) -> ReadyResponse {
    let pool = state.controller.pool();
    let shard_state = pool.state();
    let nats_connected = state.nats.as_ref().map_or(true, |n| n.is_connected());

    ReadyResponse {
        ready: shard_state.is_ready() && nats_connected,
        umbrella: pool.umbrella().to_string(),
        shards_total: shard_state.shard_count(),
        shards_provisioned: shard_state.provisioned_shards(),
        current_shard: pool.current_shard().1.to_string(),
        tracked_ips: state.controller.registry().len(),
        expiry_paused: state.controller.expiry().is_paused(),
        nats_connected,
        shards: shard_state.snapshot(),
    }
}

/// Readiness endpoint
async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let response = ready_response(&state);

    if response.ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Metrics endpoint - returns Prometheus format metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    // Update current metrics
    state.metrics.set_tracked_ips(state.controller.registry().len());
    state.metrics.set_expiry_paused(state.controller.expiry().is_paused());

    if let Some(ref nats) = state.nats {
        state.metrics.set_nats_connected(nats.is_connected());
    }

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.render(),
    )
}
