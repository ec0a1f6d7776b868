//! WebSocket message dispatch: parses a client frame and applies it to the hub.

use smt_core::{ConnectionId, RealtimeError};
use smt_realtime::{NotificationHub, ServerMessage, UiAction};
use tracing::{debug, instrument, warn};

use super::protocol::ClientMessage;

/// Result of handling one client frame.
#[derive(Debug)]
pub struct HandleResult {
    /// Message type (`"invalid"` if parsing failed).
    pub kind: &'static str,
    /// Frame to send back to the sender, if any.
    pub reply: Option<ServerMessage>,
}

/// Handle an incoming text frame from `conn_id`.
///
/// Errors are answered with an `error` frame; they never end the session.
#[instrument(skip_all, fields(conn_id = %conn_id, kind))]
pub fn handle_message(message: &str, hub: &NotificationHub, conn_id: &ConnectionId) -> HandleResult {
    let msg: ClientMessage = match serde_json::from_str(message) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "invalid client message");
            return HandleResult {
                kind: "invalid",
                reply: Some(ServerMessage::error(&RealtimeError::InvalidMessage {
                    message: e.to_string(),
                })),
            };
        }
    };
    let kind = msg.kind();
    let _ = tracing::Span::current().record("kind", kind);
    debug!("dispatching client message");

    let result = match msg {
        ClientMessage::JoinRoom { room } => hub.join(conn_id, &room).map(|o| {
            Some(ServerMessage::RoomJoined {
                room: o.room,
                member_count: o.member_count,
            })
        }),
        ClientMessage::LeaveRoom { room } => hub.leave(conn_id, &room).map(|o| {
            Some(ServerMessage::RoomLeft {
                room: o.room,
                was_member: o.was_member,
                member_count: o.member_count,
            })
        }),
        ClientMessage::GetRoomUsers { room } => hub
            .room_users(&room)
            .map(|(room, users)| Some(ServerMessage::RoomUsers { room, users })),
        ClientMessage::Viewing { room, subject } => hub
            .ui_sync(conn_id, &room, UiAction::Viewing, subject)
            .map(|_| None),
        ClientMessage::EditingStarted { room, subject } => hub
            .ui_sync(conn_id, &room, UiAction::EditingStarted, subject)
            .map(|_| None),
        ClientMessage::EditingStopped { room, subject } => hub
            .ui_sync(conn_id, &room, UiAction::EditingStopped, subject)
            .map(|_| None),
    };

    let reply = match result {
        Ok(reply) => reply,
        Err(e) => {
            debug!(code = e.code(), error = %e, "client request failed");
            Some(ServerMessage::error(&e))
        }
    };
    HandleResult { kind, reply }
}
