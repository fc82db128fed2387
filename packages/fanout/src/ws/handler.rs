//! Connection lifecycle
//!
//! Drives one upgraded connection from the credential frame to teardown:
//! gate, register, then the two pump loops. The read loop runs on this task,
//! the write loop on its own. Whichever loop stops first ends the
//! connection; the inbound half is dropped if the writer stops first.

use bytes::Bytes;
use fanout_auth::{CredentialVerifier, Identity};
use futures::SinkExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PumpConfig;
use crate::metrics::ServerMetrics;

use super::frame::{Frame, FrameSink, FrameStream, TransportError};
use super::gate::authenticate;
use super::hub::{ClientId, HubHandle};
use super::pump::{read_loop, write_loop};

/// Where a connection is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    Authenticating,
    Registered,
    Draining,
    Closed,
}

impl ClientState {
    pub fn can_transition_to(self, next: ClientState) -> bool {
        use ClientState::*;
        matches!(
            (self, next),
            (Connecting, Authenticating)
                | (Connecting, Closed)
                | (Authenticating, Registered)
                | (Authenticating, Closed)
                | (Registered, Draining)
                | (Draining, Closed)
        )
    }
}

/// How a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Never registered with the hub
    Rejected(TransportError),
    /// Was a member until `reason` ended its read loop
    Finished {
        client_id: ClientId,
        identity: Identity,
        reason: TransportError,
    },
}

/// Everything a connection task needs, shared across connections.
#[derive(Clone)]
pub struct ConnectionContext {
    pub hub: HubHandle,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub config: Arc<PumpConfig>,
    pub metrics: Arc<ServerMetrics>,
}

/// Run a connection to completion.
pub async fn handle_connection<W, S>(sink: W, stream: S, ctx: ConnectionContext) -> ConnectionOutcome
where
    W: FrameSink,
    S: FrameStream,
{
    ctx.metrics.connection_opened();
    let outcome = run_connection(sink, stream, &ctx).await;
    ctx.metrics.connection_closed();
    outcome
}

async fn run_connection<W, S>(mut sink: W, mut stream: S, ctx: &ConnectionContext) -> ConnectionOutcome
where
    W: FrameSink,
    S: FrameStream,
{
    let client_id = Uuid::new_v4();
    let mut state = ClientState::Connecting;
    transition(client_id, &mut state, ClientState::Authenticating);

    let identity = match authenticate(&mut stream, ctx.verifier.as_ref(), ctx.config.auth_timeout).await {
        Ok(identity) => identity,
        Err(e) => {
            match &e {
                TransportError::AuthTimeout => ctx.metrics.auth_timed_out(),
                _ => ctx.metrics.auth_rejected(),
            }
            info!(client_id = %client_id, error = %e, "Connection failed authentication");
            transition(client_id, &mut state, ClientState::Closed);
            close_quietly(&mut sink, ctx).await;
            return ConnectionOutcome::Rejected(e);
        }
    };

    let (queue_tx, queue_rx) = mpsc::channel::<Bytes>(ctx.config.outbound_queue_capacity);
    if let Err(e) = ctx.hub.register(client_id, identity.clone(), queue_tx).await {
        warn!(client_id = %client_id, "Failed to register client: {}", e);
        transition(client_id, &mut state, ClientState::Closed);
        close_quietly(&mut sink, ctx).await;
        return ConnectionOutcome::Rejected(TransportError::Closed);
    }
    transition(client_id, &mut state, ClientState::Registered);

    let mut writer = {
        let config = ctx.config.clone();
        let metrics = ctx.metrics.clone();
        tokio::spawn(async move { write_loop(sink, queue_rx, client_id, &config, &metrics).await })
    };

    let read = read_loop(stream, client_id, &ctx.hub, &ctx.config, &ctx.metrics);
    tokio::pin!(read);

    let (reason, written) = tokio::select! {
        reason = &mut read => {
            transition(client_id, &mut state, ClientState::Draining);
            // Unregistering closed the queue, so the writer is draining toward its close frame.
            (reason, writer.await)
        }
        written = &mut writer => {
            transition(client_id, &mut state, ClientState::Draining);
            // The writer only finishes cleanly once the hub has closed the queue.
            let reason = match &written {
                Ok(Ok(())) => TransportError::SlowConsumer,
                Ok(Err(e)) => e.clone(),
                Err(_) => TransportError::Closed,
            };
            let _ = ctx.hub.unregister(client_id).await;
            (reason, written)
        }
    };

    match written {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(client_id = %client_id, error = %e, "Writer ended with error"),
        Err(e) => warn!(client_id = %client_id, "Writer task failed: {}", e),
    }
    transition(client_id, &mut state, ClientState::Closed);

    ConnectionOutcome::Finished {
        client_id,
        identity,
        reason,
    }
}

fn transition(client_id: ClientId, state: &mut ClientState, next: ClientState) {
    debug_assert!(
        state.can_transition_to(next),
        "invalid client transition {:?} -> {:?}",
        state,
        next
    );
    debug!(client_id = %client_id, from = ?state, to = ?next, "Client state");
    *state = next;
}

async fn close_quietly<W: FrameSink>(sink: &mut W, ctx: &ConnectionContext) {
    let _ = timeout(ctx.config.write_timeout, sink.send(Frame::Close)).await;
}
