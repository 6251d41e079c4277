//! Admin surface for health checks and stats.
//!
//! Runs on a dedicated port, separate from client traffic:
//!
//! - `GET /health` - liveness (200 whenever the process serves)
//! - `GET /ready` - readiness (200 once the first sync completed, 503
//!   while starting or shutting down)
//! - `GET /stats` - aggregation counters

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::server::{HubState, HubStats};

/// Build the admin router.
pub fn router(state: Arc<HubState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/stats", get(stats))
        .with_state(state)
}

/// Liveness response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
}

async fn health(State(state): State<Arc<HubState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: state.lifecycle.version(),
        uptime_seconds: state.lifecycle.uptime_seconds(),
    })
}

/// Readiness response.
#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    state: String,
    active_clients: usize,
}

async fn ready(State(state): State<Arc<HubState>>) -> Response {
    let body = ReadinessResponse {
        ready: state.lifecycle.is_ready(),
        state: state.lifecycle.state().to_string(),
        active_clients: state.sessions.len(),
    };
    let status = if body.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

async fn stats(State(state): State<Arc<HubState>>) -> Json<HubStats> {
    Json(state.stats())
}
