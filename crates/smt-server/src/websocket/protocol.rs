//! Client-to-server messages.

use serde::{Deserialize, Deserializer};

/// A `type`-tagged message sent by a push client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe to a room's broadcasts.
    JoinRoom {
        /// Room name.
        room: String,
    },
    /// Unsubscribe from a room.
    LeaveRoom {
        /// Room name.
        room: String,
    },
    /// List the room's current members.
    GetRoomUsers {
        /// Room name.
        room: String,
    },
    /// Sender is looking at a work order.
    Viewing {
        /// Room to relay to.
        room: String,
        /// Work order id.
        #[serde(deserialize_with = "string_or_number")]
        subject: String,
    },
    /// Sender started editing a work order.
    EditingStarted {
        /// Room to relay to.
        room: String,
        /// Work order id.
        #[serde(deserialize_with = "string_or_number")]
        subject: String,
    },
    /// Sender stopped editing a work order.
    EditingStopped {
        /// Room to relay to.
        room: String,
        /// Work order id.
        #[serde(deserialize_with = "string_or_number")]
        subject: String,
    },
}

impl ClientMessage {
    /// Wire `type` of the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join_room",
            Self::LeaveRoom { .. } => "leave_room",
            Self::GetRoomUsers { .. } => "get_room_users",
            Self::Viewing { .. } => "viewing",
            Self::EditingStarted { .. } => "editing_started",
            Self::EditingStopped { .. } => "editing_stopped",
        }
    }
}

// dashboards send work order ids as numbers
fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
    }
    Ok(match Raw::deserialize(d)? {
        Raw::Str(s) => s,
        Raw::Int(n) => n.to_string(),
    })
}
