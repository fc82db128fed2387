use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;

use fanout_auth::{JwtVerifier, TokenIssuer};

use crate::AppState;
use crate::config::{HubConfig, PumpConfig, ServerConfig, ServerFileConfig};
use crate::metrics::ServerMetrics;
use crate::ws::frame::{Frame, FrameSink, FrameStream, TransportError};
use crate::ws::hub::Hub;

pub const TEST_SECRET: &str = "fanout-test-secret";

pub fn test_verifier() -> JwtVerifier {
    JwtVerifier::new(TEST_SECRET.as_bytes(), 0).expect("verifier")
}

pub fn test_token(username: &str) -> String {
    TokenIssuer::new(TEST_SECRET.as_bytes(), Duration::from_secs(3600))
        .expect("issuer")
        .issue(username)
        .expect("token")
}

/// The remote end of an in-memory connection.
///
/// Frames pushed with `send*` show up on the server's stream; frames the
/// server writes are read back with `next_frame`. Dropping the peer ends the
/// server's stream and makes its writes fail.
pub struct MockPeer {
    inbound: UnboundedSender<Result<Frame, TransportError>>,
    outbound: UnboundedReceiver<Frame>,
}

impl MockPeer {
    pub fn send_text(&self, text: &str) {
        self.send(Frame::text(text));
    }

    pub fn send(&self, frame: Frame) {
        let _ = self.inbound.unbounded_send(Ok(frame));
    }

    pub fn fail(&self, err: TransportError) {
        let _ = self.inbound.unbounded_send(Err(err));
    }

    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.outbound.next().await
    }
}

/// Build an in-memory connection: the peer plus the server's sink and stream.
pub fn mock_connection() -> (MockPeer, impl FrameSink, impl FrameStream) {
    let (inbound_tx, inbound_rx) = unbounded();
    let (outbound_tx, outbound_rx) = unbounded();
    let sink = outbound_tx.sink_map_err(|e| TransportError::Write(e.to_string()));
    let peer = MockPeer {
        inbound: inbound_tx,
        outbound: outbound_rx,
    };
    (peer, sink, inbound_rx)
}

/// A sink whose writes never complete.
pub fn stalled_sink() -> impl FrameSink {
    futures::sink::unfold((), |(), _frame: Frame| {
        futures::future::pending::<Result<(), TransportError>>()
    })
}

/// A sink that takes `delay` to complete each write, then hands the frame to
/// the returned receiver.
pub fn slow_sink(delay: Duration) -> (impl FrameSink, UnboundedReceiver<Frame>) {
    let (tx, rx) = unbounded();
    let sink = futures::sink::unfold(tx, move |tx, frame: Frame| async move {
        tokio::time::sleep(delay).await;
        tx.unbounded_send(frame)
            .map_err(|e| TransportError::Write(e.to_string()))?;
        Ok::<_, TransportError>(tx)
    });
    (Box::pin(sink), rx)
}

/// Build a fully-wired `AppState` with a live hub and default limits.
pub fn test_app_state() -> AppState {
    let metrics = Arc::new(ServerMetrics::new());
    AppState {
        hub: Hub::spawn(HubConfig::default(), metrics.clone()),
        verifier: Arc::new(test_verifier()),
        pump_config: Arc::new(PumpConfig::default()),
        server_config: Arc::new(
            ServerConfig::from_file(&ServerFileConfig::default()).expect("server config"),
        ),
        metrics,
    }
}
