use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tracing::{debug, warn};

use crate::AppState;
use crate::auth::BearerUser;

/// Broadcast the raw request body to every member, with no origin client.
pub async fn broadcast_handler(
    State(state): State<AppState>,
    BearerUser(identity): BearerUser,
    body: Bytes,
) -> Response {
    if body.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "empty_body", "Request body is empty");
    }
    let max = state.pump_config.max_frame_bytes;
    if body.len() > max {
        return error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload_too_large",
            &format!("Payload of {} bytes exceeds limit of {}", body.len(), max),
        );
    }

    let len = body.len();
    match state.hub.broadcast(body).await {
        Ok(()) => {
            debug!(user = %identity, bytes = len, "Broadcast via HTTP");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => {
            warn!(user = %identity, "HTTP broadcast failed: {}", e);
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "hub_unavailable",
                "Hub is not running",
            )
        }
    }
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": code, "message": message })),
    )
        .into_response()
}
