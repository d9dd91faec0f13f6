//! WebSocket client connection state and its single writer task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use axum::extract::ws::{CloseFrame, Message};
use beacon_core::ConnectionId;
use bytes::Bytes;
use futures::{Sink, SinkExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Close code sent when the keepalive dead-man timer fires ("going away").
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Close code sent to connections without a resolvable principal.
pub const CLOSE_FORBIDDEN: u16 = 4403;

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SendError {
    /// The connection is closed or its writer has exited.
    #[error("connection closed")]
    Closed,
    /// The send buffer is full; the frame was dropped.
    #[error("send buffer full")]
    Full,
    /// The value could not be serialized; nothing was queued.
    #[error("frame could not be serialized")]
    Unserializable,
}

/// Operations the broadcaster and keepalive monitor need from a connection.
///
/// Implementations must be cheap and non-blocking: every call is made from a
/// broadcast pass or a probe task that must not wait on the network.
pub trait ConnectionHandle: Send + Sync {
    /// Stable identifier.
    fn id(&self) -> &ConnectionId;

    /// Whether frames can still be queued.
    fn is_open(&self) -> bool;

    /// Queue a text frame.
    fn send(&self, message: Arc<String>) -> Result<(), SendError>;

    /// Queue a ping frame carrying `payload`.
    fn send_probe(&self, payload: Bytes) -> Result<(), SendError>;

    /// Close with a code and reason. Later calls are no-ops.
    fn close(&self, code: u16, reason: &str);
}

/// A frame waiting for the writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// JSON text frame.
    Text(Arc<String>),
    /// Ping frame.
    Ping(Bytes),
    /// Close frame; the writer exits after sending it.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// A connected `WebSocket` client, as seen from the broadcast side.
pub struct ClientConnection {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    open: AtomicBool,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a connection feeding `tx`.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            tx,
            open: AtomicBool::new(true),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Create a connection and the receiver its writer task drains.
    pub fn channel(id: ConnectionId, buffer: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(id, tx), rx)
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Serialize `value` and queue it as a text frame.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), SendError> {
        let json = serde_json::to_string(value).map_err(|error| {
            warn!(conn_id = %self.id, %error, "failed to serialize frame");
            SendError::Unserializable
        })?;
        self.send(Arc::new(json))
    }

    fn enqueue(&self, frame: Outbound) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(SendError::Full)
            }
            Err(TrySendError::Closed(_)) => {
                self.open.store(false, Ordering::Release);
                Err(SendError::Closed)
            }
        }
    }
}

impl ConnectionHandle for ClientConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    fn send(&self, message: Arc<String>) -> Result<(), SendError> {
        self.enqueue(Outbound::Text(message))
    }

    fn send_probe(&self, payload: Bytes) -> Result<(), SendError> {
        self.enqueue(Outbound::Ping(payload))
    }

    fn close(&self, code: u16, reason: &str) {
        if self.open.swap(false, Ordering::AcqRel) {
            // Best effort: a full buffer still ends the writer once the
            // session drops its sender.
            let _ = self.tx.try_send(Outbound::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }
}

/// Drain `rx` into `sink` until the channel closes, a write fails, or a
/// close frame has been written.
///
/// This is the only task that writes to a socket, so frames for one
/// connection leave in the order they were queued.
pub async fn run_writer<S>(mut sink: S, mut rx: mpsc::Receiver<Outbound>)
where
    S: Sink<Message> + Unpin,
{
    while let Some(frame) = rx.recv().await {
        let (message, last) = match frame {
            Outbound::Text(text) => (Message::Text(text.as_str().into()), false),
            Outbound::Ping(payload) => (Message::Ping(payload), false),
            Outbound::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })),
                true,
            ),
        };
        if sink.send(message).await.is_err() {
            debug!("socket write failed, stopping writer");
            break;
        }
        if last {
            break;
        }
    }
    let _ = sink.close().await;
}
