//! WebSocket session lifecycle: one connected push client from upgrade
//! through disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use smt_auth::VerifiedIdentity;
use smt_core::ConnectionId;
use smt_realtime::{
    Attachment, ClientConnection, DisconnectReason, NotificationHub, ServerMessage, Transport,
    TransportKind,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::handler::handle_message;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::metrics::{WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// How long the writer gets to flush a close frame at the end of a session.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// What a session needs from the server.
#[derive(Clone)]
pub struct SessionContext {
    /// The realtime hub.
    pub hub: Arc<NotificationHub>,
    /// Outbox capacity in frames.
    pub outbox_capacity: usize,
    /// Ping interval.
    pub heartbeat_interval: Duration,
    /// Time the client gets to answer a ping.
    pub pong_timeout: Duration,
    /// Server-wide shutdown token.
    pub shutdown: CancellationToken,
}

/// Run a WebSocket session for an authenticated client.
///
/// 1. Registers the connection with the hub and sends `connected`
/// 2. Applies incoming frames (join/leave/presence/UI-sync) via the hub
/// 3. Forwards the outbox to the socket, with periodic Ping frames
/// 4. Ends on close, read error, heartbeat timeout or shutdown, then
///    disconnects from the hub exactly once
#[instrument(skip_all, fields(conn_id = %conn_id, user = %verified.identity.username))]
pub async fn run_ws_session(
    ws: WebSocket,
    conn_id: ConnectionId,
    verified: VerifiedIdentity,
    ctx: SessionContext,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (connection, send_rx) = ClientConnection::channel(conn_id.clone(), ctx.outbox_capacity);
    let identity = verified.identity.clone();

    let attachment = Attachment::new(identity.clone(), Transport::Push(connection.clone()))
        .expiring_at(verified.expires_at);
    if let Err(e) = ctx.hub.attach(conn_id.clone(), attachment) {
        error!(error = %e, "failed to register connection");
        if let Ok(json) = ServerMessage::error(&e).to_frame_json() {
            let _ = ws_tx.send(Message::Text(json.into())).await;
        }
        let _ = ws_tx.send(Message::Close(None)).await;
        return;
    }

    let started = Instant::now();
    counter!(WS_CONNECTIONS_TOTAL).increment(1);

    let connected = ServerMessage::Connected {
        connection_id: conn_id.clone(),
        user: identity,
        transport: TransportKind::Push,
    };
    match connected.to_frame_json() {
        Ok(json) => {
            if connection.send(Arc::new(json)).is_err() {
                warn!("failed to enqueue connected frame");
            }
        }
        Err(e) => error!(error = %e, "failed to serialize connected frame"),
    }

    let session_cancel = ctx.shutdown.child_token();
    let writer = tokio::spawn(run_writer(
        ws_tx,
        send_rx,
        ctx.heartbeat_interval,
        session_cancel.clone(),
    ));

    let heartbeat = run_heartbeat(
        connection.clone(),
        ctx.heartbeat_interval,
        ctx.pong_timeout,
        session_cancel.clone(),
    );
    tokio::pin!(heartbeat);

    let reason = loop {
        tokio::select! {
            result = &mut heartbeat => {
                break match result {
                    HeartbeatResult::TimedOut => {
                        warn!(
                            pong_timeout = ?ctx.pong_timeout,
                            "client unresponsive, disconnecting"
                        );
                        DisconnectReason::HeartbeatTimeout
                    }
                    HeartbeatResult::Cancelled => DisconnectReason::Shutdown,
                };
            }
            frame = ws_rx.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(t))) => t.to_string(),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(s) => s,
                        Err(_) => {
                            debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                            connection.mark_alive();
                            continue;
                        }
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        connection.mark_alive();
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("client closed connection");
                        break DisconnectReason::ClientClosed;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read failed");
                        break DisconnectReason::ReadError;
                    }
                };
                connection.mark_alive();

                let result = handle_message(&text, &ctx.hub, &conn_id);
                if let Some(reply) = result.reply {
                    match reply.to_frame_json() {
                        Ok(json) => {
                            if let Err(e) = connection.send(Arc::new(json)) {
                                warn!(error = %e, kind = result.kind, "failed to enqueue reply");
                            }
                        }
                        Err(e) => error!(error = %e, "failed to serialize reply"),
                    }
                }
            }
        }
    };

    let _ = ctx.hub.disconnect(&conn_id, reason);
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

    session_cancel.cancel();
    let abort = writer.abort_handle();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        abort.abort();
    }
}

/// Drain the outbox to the socket in order, pinging every `ping_interval`.
async fn run_writer(
    mut ws_tx: futures::stream::SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    ping_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ping = tokio::time::interval(ping_interval);
    // skip the immediate first tick
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            msg = send_rx.recv() => {
                let Some(text) = msg else { break };
                if ws_tx.send(Message::Text(String::clone(&text).into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            () = cancel.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    // Full sessions are covered by tests/integration.rs against a live server.
    use super::*;
    use smt_core::{Identity, Role};

    #[test]
    fn connected_frame_has_required_fields() {
        let msg = ServerMessage::Connected {
            connection_id: "conn_1".into(),
            user: Identity::new("u-1", "alice", Role::Scheduler),
            transport: TransportKind::Push,
        };
        let v: serde_json::Value = serde_json::from_str(&msg.to_frame_json().unwrap()).unwrap();
        assert_eq!(v["type"], "connected");
        assert_eq!(v["connection_id"], "conn_1");
        assert_eq!(v["user"]["role"], "scheduler");
        assert_eq!(v["transport"], "push");
        assert!(v["timestamp"].is_string());
    }
}
