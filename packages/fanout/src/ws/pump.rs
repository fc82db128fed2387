//! Client pump
//!
//! Two loops per registered client:
//! - the read loop forwards inbound data frames to the hub and enforces the
//!   read deadline, which only a pong can push forward;
//! - the write loop drains the outbound queue and sends a ping every
//!   heartbeat interval.
//!
//! The read loop always unregisters on exit. The write loop stops when the hub
//! closes its queue, or when a write fails or misses its deadline.

use bytes::{BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout, timeout_at};
use tracing::debug;

use crate::config::PumpConfig;
use crate::metrics::ServerMetrics;

use super::frame::{Frame, FrameSink, FrameStream, TransportError};
use super::hub::{ClientId, HubHandle};

/// Run the read loop to completion, then unregister the client.
///
/// Returns the error that ended the loop. The inbound half of the
/// connection is dropped on return.
pub async fn read_loop<S: FrameStream>(
    mut stream: S,
    client_id: ClientId,
    hub: &HubHandle,
    config: &PumpConfig,
    metrics: &ServerMetrics,
) -> TransportError {
    let reason = read_frames(&mut stream, client_id, hub, config, metrics).await;
    if reason == TransportError::DeadlineExceeded {
        metrics.heartbeat_timed_out();
    }
    debug!(client_id = %client_id, reason = %reason, "Read loop ended");

    // Unconditional: this is the only path that reaps a dead connection.
    let _ = hub.unregister(client_id).await;
    reason
}

async fn read_frames<S: FrameStream>(
    stream: &mut S,
    client_id: ClientId,
    hub: &HubHandle,
    config: &PumpConfig,
    metrics: &ServerMetrics,
) -> TransportError {
    let mut deadline = Instant::now() + config.read_timeout;

    loop {
        let frame = match timeout_at(deadline, stream.next()).await {
            Err(_) => return TransportError::DeadlineExceeded,
            Ok(None) => return TransportError::Closed,
            Ok(Some(Err(e))) => return e,
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Frame::Pong(_) => deadline = Instant::now() + config.read_timeout,
            // The transport answers pings on its own.
            Frame::Ping(_) => {}
            Frame::Close => return TransportError::Closed,
            Frame::Data(payload) => {
                if payload.len() > config.max_frame_bytes {
                    return TransportError::FrameTooLarge {
                        len: payload.len(),
                        max: config.max_frame_bytes,
                    };
                }
                metrics.message_received();
                if hub.broadcast_from(client_id, payload).await.is_err() {
                    return TransportError::Closed;
                }
            }
        }
    }
}

/// Run the write loop to completion.
///
/// `Ok(())` means the hub closed the queue and everything already queued was
/// written; a close frame is then attempted before returning. On a write
/// error or missed deadline the sink is abandoned as is.
pub async fn write_loop<W: FrameSink>(
    mut sink: W,
    mut queue: mpsc::Receiver<Bytes>,
    client_id: ClientId,
    config: &PumpConfig,
    metrics: &ServerMetrics,
) -> Result<(), TransportError> {
    let mut heartbeat = interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let result = loop {
        tokio::select! {
            // Heartbeat first: an overdue ping goes out before the next batch.
            biased;

            _ = heartbeat.tick() => {
                if let Err(e) = send_with_deadline(&mut sink, Frame::Ping(Bytes::new()), config.write_timeout).await {
                    break Err(e);
                }
            }

            item = queue.recv() => {
                let Some(first) = item else {
                    break Ok(());
                };
                let (payload, count) = coalesce(first, &mut queue);
                if let Err(e) = send_with_deadline(&mut sink, Frame::Data(payload), config.write_timeout).await {
                    break Err(e);
                }
                metrics.frame_written(count);
            }
        }
    };

    match &result {
        Ok(()) => {
            debug!(client_id = %client_id, "Outbound queue closed");
            // Best effort: the peer may already be gone.
            let _ = send_with_deadline(&mut sink, Frame::Close, config.write_timeout).await;
        }
        // A failed sink is not written to again.
        Err(e) => debug!(client_id = %client_id, error = %e, "Write loop failed"),
    }
    result
}

/// Join `first` with every payload already waiting in the queue, newline
/// separated and in arrival order. Returns the frame and how many payloads
/// it carries.
fn coalesce(first: Bytes, queue: &mut mpsc::Receiver<Bytes>) -> (Bytes, u64) {
    let Ok(second) = queue.try_recv() else {
        return (first, 1);
    };

    let mut buf = BytesMut::with_capacity(first.len() + 1 + second.len());
    buf.put_slice(&first);
    buf.put_u8(b'\n');
    buf.put_slice(&second);
    let mut count = 2;

    while let Ok(next) = queue.try_recv() {
        buf.put_u8(b'\n');
        buf.put_slice(&next);
        count += 1;
    }
    (buf.freeze(), count)
}

async fn send_with_deadline<W: FrameSink>(
    sink: &mut W,
    frame: Frame,
    write_timeout: Duration,
) -> Result<(), TransportError> {
    match timeout(write_timeout, sink.send(frame)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::DeadlineExceeded),
    }
}
