//! End-to-end tests over a real listener and real WebSocket clients.

use axum::{Router, extract::ws::WebSocketUpgrade, routing::get};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};
use uuid::Uuid;

use crate::config::PumpConfig;
use crate::metrics::ServerMetrics;
use crate::test_helpers::{test_app_state, test_token};
use crate::ws::HubHandle;

use super::frame::{TransportError, split_socket};
use super::pump::write_loop;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn start_server() -> (String, HubHandle) {
    let state = test_app_state();
    let hub = state.hub.clone();
    let app = crate::build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("ws://{addr}/ws"), hub)
}

async fn connect(url: &str, token: &str) -> Client {
    let (mut client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    client
        .send(Message::Text(token.to_owned().into()))
        .await
        .unwrap();
    client
}

async fn wait_for_members(hub: &HubHandle, n: usize) {
    for _ in 0..200 {
        if hub.members().await.unwrap().len() == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("hub never reached {n} members");
}

/// Next data payload, skipping control frames.
async fn next_text(client: &mut Client) -> Option<String> {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for a frame");
        match msg {
            Some(Ok(Message::Text(text))) => return Some(text.as_str().to_owned()),
            Some(Ok(Message::Binary(data))) => {
                return Some(String::from_utf8_lossy(&data).into_owned());
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(_)) | Some(Err(_)) | None => return None,
        }
    }
}

#[tokio::test]
async fn two_clients_exchange_messages() {
    let (url, hub) = start_server().await;
    let mut alice = connect(&url, &test_token("alice")).await;
    let mut bob = connect(&url, &test_token("bob")).await;
    wait_for_members(&hub, 2).await;

    alice.send(Message::Text("hi".into())).await.unwrap();
    assert_eq!(next_text(&mut bob).await.as_deref(), Some("hi"));
    assert_eq!(next_text(&mut alice).await.as_deref(), Some("hi"));

    bob.send(Message::Text("hello back".into())).await.unwrap();
    assert_eq!(next_text(&mut alice).await.as_deref(), Some("hello back"));
}

#[tokio::test]
async fn bad_credential_is_closed_without_joining() {
    let (url, hub) = start_server().await;
    let mut mallory = connect(&url, "definitely-not-a-jwt").await;

    assert_eq!(next_text(&mut mallory).await, None);
    assert!(hub.members().await.unwrap().is_empty());
}

#[tokio::test]
async fn disconnect_leaves_the_group() {
    let (url, hub) = start_server().await;
    let mut alice = connect(&url, &test_token("alice")).await;
    let mut bob = connect(&url, &test_token("bob")).await;
    wait_for_members(&hub, 2).await;

    alice.close(None).await.unwrap();
    wait_for_members(&hub, 1).await;

    hub.broadcast(Bytes::from_static(b"after alice left"))
        .await
        .unwrap();
    assert_eq!(
        next_text(&mut bob).await.as_deref(),
        Some("after alice left")
    );
}

#[tokio::test]
async fn vanished_peer_fails_the_writer_cleanly() {
    let (queue_tx, queue_rx) = mpsc::channel::<Bytes>(16);
    let (done_tx, mut done_rx) = oneshot::channel();
    let queue_rx = Arc::new(Mutex::new(Some(queue_rx)));
    let done_tx = Arc::new(Mutex::new(Some(done_tx)));

    // A bare writer over the production socket adapters.
    let app = Router::new().route(
        "/ws",
        get(move |ws: WebSocketUpgrade| {
            let queue_rx = queue_rx.clone();
            let done_tx = done_tx.clone();
            async move {
                ws.on_upgrade(move |socket| async move {
                    let (sink, _stream) = split_socket(socket);
                    let queue = queue_rx.lock().unwrap().take().unwrap();
                    let writer = tokio::spawn(async move {
                        let metrics = ServerMetrics::new();
                        write_loop(sink, queue, Uuid::new_v4(), &PumpConfig::default(), &metrics)
                            .await
                    });
                    let result = writer.await;
                    if let Some(done) = done_tx.lock().unwrap().take() {
                        let _ = done.send(result);
                    }
                })
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    drop(client);

    let joined = tokio::time::timeout(RECV_TIMEOUT, async {
        loop {
            let _ = queue_tx.try_send(Bytes::from_static(b"into the void"));
            tokio::select! {
                result = &mut done_rx => return result.unwrap(),
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
        }
    })
    .await
    .expect("writer never noticed the dropped peer");

    let result = joined.expect("writer task panicked");
    assert!(
        matches!(result, Err(TransportError::Write(_))),
        "Expected write error, got {:?}",
        result
    );
}
