use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};
use tracing::{debug, info};

use crate::AppState;
use crate::ws::{self, ConnectionContext, ConnectionOutcome};

/// WebSocket upgrade - one connection becomes one hub client
pub async fn websocket_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let max_frame_bytes = state.pump_config.max_frame_bytes;
    let ctx = ConnectionContext {
        hub: state.hub.clone(),
        verifier: state.verifier.clone(),
        config: state.pump_config.clone(),
        metrics: state.metrics.clone(),
    };

    ws.max_message_size(max_frame_bytes)
        .max_frame_size(max_frame_bytes)
        .on_upgrade(move |socket| async move {
            let (sink, stream) = ws::split_socket(socket);
            match ws::handle_connection(sink, stream, ctx).await {
                ConnectionOutcome::Rejected(reason) => {
                    debug!(reason = %reason, "Connection never joined the hub");
                }
                ConnectionOutcome::Finished {
                    client_id,
                    identity,
                    reason,
                } => {
                    info!(
                        client_id = %client_id,
                        user = %identity,
                        reason = %reason,
                        "Connection closed"
                    );
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request, routing::get};
    use tower::ServiceExt;

    #[tokio::test]
    async fn plain_get_is_not_upgraded() {
        let state = crate::test_helpers::test_app_state();
        let hub = state.hub.clone();
        let app = Router::new()
            .route("/ws", get(websocket_handler))
            .with_state(state);

        let resp = app
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
        assert!(hub.members().await.unwrap().is_empty());
    }
}
