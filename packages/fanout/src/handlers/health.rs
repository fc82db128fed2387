use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::AppState;
use crate::metrics;

/// Health check endpoint - returns server status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let members = state.hub.members().await;
    let metrics = state.metrics.snapshot();

    let status = if members.is_ok() { "healthy" } else { "degraded" };

    Json(metrics::HealthStatus {
        status: status.to_string(),
        members: members.map(|m| m.len() as u64).unwrap_or(0),
        connections: metrics.connections.active,
        uptime_secs: metrics.uptime_secs,
    })
}

/// Metrics endpoint - returns detailed server metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Readiness probe - returns 200 if the hub is answering commands
pub async fn health_ready_handler(State(state): State<AppState>) -> Response {
    if state.hub.members().await.is_ok() {
        Json(serde_json::json!({
            "status": "ready",
            "hub": "running"
        }))
        .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "hub": "stopped"
            })),
        )
            .into_response()
    }
}
