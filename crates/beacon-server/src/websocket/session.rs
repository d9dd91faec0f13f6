//! WebSocket session lifecycle: handles a single subscriber from upgrade
//! through disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use beacon_core::{ConnectionId, Principal};
use futures::StreamExt;
use metrics::{counter, histogram};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::connection::{CLOSE_FORBIDDEN, CLOSE_GOING_AWAY, ClientConnection, ConnectionHandle, run_writer};
use super::keepalive::{KeepaliveHandle, KeepaliveMonitor, ProbeState};
use super::registry::ConnectionRegistry;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
    WS_REJECTED_TOTAL,
};

/// Close reason sent to sockets opened without a session.
pub const REJECTION_REASON: &str = "A web socket connection requires a previous web session created";

/// Close code for a session that ends normally.
const CLOSE_NORMAL: u16 = 1000;

/// How long the writer gets to flush the final close frame.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Shared state every session needs.
#[derive(Clone)]
pub struct SessionContext {
    /// Where accepted connections are registered.
    pub registry: Arc<ConnectionRegistry>,
    /// Starts a probe loop per connection.
    pub keepalive: Arc<KeepaliveMonitor>,
    /// Outbound frame buffer per connection.
    pub send_buffer_size: usize,
    /// Server-wide shutdown signal.
    pub shutdown: CancellationToken,
}

/// First frame an accepted subscriber receives.
pub fn established_message(connection_id: &ConnectionId, principal: &Principal) -> serde_json::Value {
    serde_json::json!({
        "type": "connection.established",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "data": {
            "connectionId": connection_id,
            "userId": principal.user_id,
        },
    })
}

/// Only frame a rejected socket receives before it is closed.
pub fn rejected_message(reason: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "connection.rejected",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "data": { "reason": reason },
    })
}

/// Run a session for an authenticated subscriber.
///
/// 1. Registers a [`ClientConnection`] fed by a dedicated writer task
/// 2. Sends `connection.established`
/// 3. Starts the keepalive loop when enabled
/// 4. Reads until the client leaves, keepalive closes the connection or the
///    server shuts down
/// 5. Unregisters and stops keepalive
#[instrument(skip_all, fields(user_id = %principal.user_id))]
pub async fn run_ws_session(ws: WebSocket, principal: Principal, ctx: SessionContext) {
    let (ws_tx, mut ws_rx) = ws.split();
    let (connection, rx) = ClientConnection::channel(ConnectionId::new(), ctx.send_buffer_size);
    let connection = Arc::new(connection);
    let conn_id = connection.id().clone();
    let mut writer = tokio::spawn(run_writer(ws_tx, rx));

    let principal = Arc::new(principal);
    let started = Instant::now();
    if !ctx.registry.add(connection.clone(), principal.clone()) {
        error!(%conn_id, "connection id already registered, dropping socket");
        writer.abort();
        return;
    }
    info!(%conn_id, "subscriber connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);

    if let Err(error) = connection.send_json(&established_message(&conn_id, &principal)) {
        warn!(%conn_id, %error, "failed to queue connection.established");
    }

    let keepalive = ctx.keepalive.start(connection.clone());
    let mut probe_state = keepalive.as_ref().map(KeepaliveHandle::subscribe);

    loop {
        tokio::select! {
            () = ctx.shutdown.cancelled() => {
                debug!(%conn_id, "server shutting down, closing session");
                connection.close(CLOSE_GOING_AWAY, "server shutting down");
                break;
            }
            () = keepalive_closed(probe_state.as_mut()) => {
                info!(%conn_id, "keepalive closed the connection");
                break;
            }
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Pong(payload))) => {
                    let acked = keepalive.as_ref().is_some_and(|k| k.acknowledge(&payload));
                    debug!(%conn_id, acked, "pong received");
                }
                Some(Ok(Message::Close(_))) => {
                    info!(%conn_id, "client sent close frame");
                    break;
                }
                Some(Ok(_)) => {
                    // Server-push only: inbound data frames are ignored
                }
                Some(Err(error)) => {
                    debug!(%conn_id, %error, "socket read failed");
                    break;
                }
                None => break,
            }
        }
    }

    let _ = ctx.registry.remove(&conn_id);
    connection.close(CLOSE_NORMAL, "session ended");
    if let Some(handle) = &keepalive {
        handle.stop();
    }
    if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }

    info!(%conn_id, dropped = connection.drop_count(), "subscriber disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

/// Refuse a socket that has no principal: one `connection.rejected` frame,
/// then close with [`CLOSE_FORBIDDEN`].
pub async fn reject_ws_session(mut ws: WebSocket) {
    error!(reason = REJECTION_REASON, "rejecting websocket connection");
    counter!(WS_REJECTED_TOTAL).increment(1);

    if let Ok(json) = serde_json::to_string(&rejected_message(REJECTION_REASON)) {
        let _ = ws.send(Message::Text(json.into())).await;
    }
    let _ = ws
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_FORBIDDEN,
            reason: REJECTION_REASON.into(),
        })))
        .await;
}

async fn keepalive_closed(state: Option<&mut watch::Receiver<ProbeState>>) {
    match state {
        Some(rx) => {
            if rx.wait_for(|s| *s == ProbeState::Closed).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending().await,
    }
}
