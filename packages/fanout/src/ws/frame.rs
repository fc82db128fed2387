//! Transport frames
//!
//! The gate and both pump loops speak [`Frame`] over any `Stream`/`Sink`
//! pair, so the same code runs against an axum `WebSocket` in production and
//! in-memory channels in tests.

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt, future};

/// One discrete unit on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close,
}

impl Frame {
    pub fn text(s: &str) -> Self {
        Frame::Data(Bytes::copy_from_slice(s.as_bytes()))
    }
}

/// Why a connection's participation ended.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("no credential received before the auth deadline")]
    AuthTimeout,
    #[error("credential rejected: {0}")]
    AuthRejected(#[from] fanout_auth::AuthError),
    #[error("read failed: {0}")]
    Read(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("transport closed")]
    Closed,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("outbound queue full")]
    SlowConsumer,
}

/// Inbound half of a connection.
pub trait FrameStream: Stream<Item = Result<Frame, TransportError>> + Unpin + Send + 'static {}

impl<T> FrameStream for T where T: Stream<Item = Result<Frame, TransportError>> + Unpin + Send + 'static
{}

/// Outbound half of a connection.
pub trait FrameSink: Sink<Frame, Error = TransportError> + Unpin + Send + 'static {}

impl<T> FrameSink for T where T: Sink<Frame, Error = TransportError> + Unpin + Send + 'static {}

impl From<Message> for Frame {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(text) => Frame::text(text.as_str()),
            Message::Binary(data) => Frame::Data(data),
            Message::Ping(data) => Frame::Ping(data),
            Message::Pong(data) => Frame::Pong(data),
            Message::Close(_) => Frame::Close,
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            // Payloads are opaque; text frames are only used when the bytes allow it.
            Frame::Data(data) => match std::str::from_utf8(&data) {
                Ok(text) => Message::Text(text.to_owned().into()),
                Err(_) => Message::Binary(data),
            },
            Frame::Ping(data) => Message::Ping(data),
            Frame::Pong(data) => Message::Pong(data),
            Frame::Close => Message::Close(None),
        }
    }
}

/// Split an upgraded socket into its frame sink and frame stream.
pub fn split_socket(socket: WebSocket) -> (impl FrameSink, impl FrameStream) {
    let (sink, stream) = socket.split();
    let sink = sink
        .sink_map_err(|e| TransportError::Write(e.to_string()))
        .with(|frame: Frame| future::ready(Ok::<_, TransportError>(Message::from(frame))));
    let stream = stream.map(|msg| {
        msg.map(Frame::from)
            .map_err(|e| TransportError::Read(e.to_string()))
    });
    (sink, stream)
}
