//! Server-to-client frames.
//!
//! Every frame is a JSON object with a `type` discriminator and a
//! `timestamp`. Work-order updates are not listed here: they are the
//! serialized [`NotificationEvent`](crate::event::NotificationEvent) itself.

use chrono::Utc;
use serde::Serialize;
use smt_core::{ConnectionId, Identity, RealtimeError, RoomName};

use crate::registry::TransportKind;

/// A presence or control frame sent to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame on every connection.
    Connected {
        /// Server-assigned connection id.
        connection_id: ConnectionId,
        /// Verified identity of the client.
        user: Identity,
        /// Which transport the client is using.
        transport: TransportKind,
    },
    /// Acknowledges `join_room`.
    RoomJoined {
        /// Joined room.
        room: RoomName,
        /// Members after the join.
        member_count: usize,
    },
    /// Acknowledges `leave_room`.
    RoomLeft {
        /// Left room.
        room: RoomName,
        /// Whether the client was a member.
        was_member: bool,
        /// Members after the leave.
        member_count: usize,
    },
    /// Reply to `get_room_users`.
    RoomUsers {
        /// Queried room.
        room: RoomName,
        /// Current members.
        users: Vec<Identity>,
    },
    /// Someone else joined a room this client is in.
    UserJoinedRoom {
        /// Room.
        room: RoomName,
        /// Who joined.
        user: Identity,
        /// Members after the join.
        member_count: usize,
    },
    /// Someone else left a room this client is in, or disconnected.
    UserLeftRoom {
        /// Room.
        room: RoomName,
        /// Who left.
        user: Identity,
        /// Members after the departure.
        member_count: usize,
    },
    /// Another member is looking at a work order.
    UserViewing {
        /// Room.
        room: RoomName,
        /// Who.
        user: Identity,
        /// Work order being viewed.
        subject: String,
    },
    /// Another member started editing a work order.
    UserEditing {
        /// Room.
        room: RoomName,
        /// Who.
        user: Identity,
        /// Work order being edited.
        subject: String,
    },
    /// Another member stopped editing a work order.
    UserStoppedEditing {
        /// Room.
        room: RoomName,
        /// Who.
        user: Identity,
        /// Work order no longer being edited.
        subject: String,
    },
    /// Keep-alive on the pull transport.
    Heartbeat,
    /// The pull consumer fell behind and `count` events were discarded.
    EventsMissed {
        /// Number of discarded events.
        count: u64,
    },
    /// A request failed.
    Error {
        /// Stable machine-readable code.
        code: String,
        /// Human-readable detail.
        message: String,
        /// Room named by the failing request.
        #[serde(skip_serializing_if = "Option::is_none")]
        room: Option<String>,
        /// Short rejection reason for `AUTH_REJECTED`.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl ServerMessage {
    /// Error frame describing `err`.
    pub fn error(err: &RealtimeError) -> Self {
        let reason = match err {
            RealtimeError::AuthRejected { reason } => Some(reason.clone()),
            _ => None,
        };
        Self::Error {
            code: err.code().to_owned(),
            message: err.to_string(),
            room: err.room().map(str::to_owned),
            reason,
        }
    }

    /// Wire `type` of the frame.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::RoomJoined { .. } => "room_joined",
            Self::RoomLeft { .. } => "room_left",
            Self::RoomUsers { .. } => "room_users",
            Self::UserJoinedRoom { .. } => "user_joined_room",
            Self::UserLeftRoom { .. } => "user_left_room",
            Self::UserViewing { .. } => "user_viewing",
            Self::UserEditing { .. } => "user_editing",
            Self::UserStoppedEditing { .. } => "user_stopped_editing",
            Self::Heartbeat => "heartbeat",
            Self::EventsMissed { .. } => "events_missed",
            Self::Error { .. } => "error",
        }
    }

    /// Serialize with a `timestamp` field stamped now.
    pub fn to_frame_json(&self) -> serde_json::Result<String> {
        let mut value = serde_json::to_value(self)?;
        if let serde_json::Value::Object(ref mut map) = value {
            let _ = map.insert(
                "timestamp".into(),
                serde_json::Value::String(Utc::now().to_rfc3339()),
            );
        }
        serde_json::to_string(&value)
    }
}
