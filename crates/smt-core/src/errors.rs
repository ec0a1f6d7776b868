//! Error taxonomy for the realtime subsystem.
//!
//! Every variant maps to a stable machine-readable code via
//! [`RealtimeError::code`], which is what clients see in `error` frames.

use thiserror::Error;

use crate::ids::ConnectionId;

/// Wire code for a rejected credential.
pub const AUTH_REJECTED: &str = "AUTH_REJECTED";
/// Wire code for a room name outside the closed enumeration.
pub const INVALID_ROOM: &str = "INVALID_ROOM";
/// Wire code for an operation on an unregistered connection.
pub const CONNECTION_NOT_FOUND: &str = "CONNECTION_NOT_FOUND";
/// Wire code for a reused connection id.
pub const DUPLICATE_CONNECTION: &str = "DUPLICATE_CONNECTION";
/// Wire code for a failed per-recipient delivery.
pub const DELIVERY_FAILURE: &str = "DELIVERY_FAILURE";
/// Wire code for a UI-sync message sent to a room the sender has not joined.
pub const NOT_IN_ROOM: &str = "NOT_IN_ROOM";
/// Wire code for an unparseable client message.
pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";

/// Errors surfaced by the realtime subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RealtimeError {
    /// Bad, expired, missing or unauthorized credential.
    #[error("authentication rejected: {reason}")]
    AuthRejected {
        /// Short reason (`expired`, `malformed`, `role_not_permitted`, `missing`).
        reason: String,
    },

    /// Room name outside the closed enumeration.
    #[error("invalid room: {room}")]
    InvalidRoom {
        /// The offending name, verbatim.
        room: String,
    },

    /// Operation on a connection that is not registered.
    #[error("connection not found: {id}")]
    NotFoundConnection {
        /// Connection that was looked up.
        id: ConnectionId,
    },

    /// A connection id was registered twice.
    #[error("connection already registered: {id}")]
    DuplicateConnection {
        /// The reused id.
        id: ConnectionId,
    },

    /// A single recipient could not be reached.
    #[error("delivery to {id} failed: {reason}")]
    DeliveryFailure {
        /// Unreachable connection.
        id: ConnectionId,
        /// What went wrong.
        reason: String,
    },

    /// UI-sync message for a room the sender is not a member of.
    #[error("not a member of room {room}")]
    NotInRoom {
        /// The room named by the message.
        room: String,
    },

    /// A client message could not be parsed.
    #[error("invalid message: {message}")]
    InvalidMessage {
        /// Parser detail.
        message: String,
    },
}

impl RealtimeError {
    /// Machine-readable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthRejected { .. } => AUTH_REJECTED,
            Self::InvalidRoom { .. } => INVALID_ROOM,
            Self::NotFoundConnection { .. } => CONNECTION_NOT_FOUND,
            Self::DuplicateConnection { .. } => DUPLICATE_CONNECTION,
            Self::DeliveryFailure { .. } => DELIVERY_FAILURE,
            Self::NotInRoom { .. } => NOT_IN_ROOM,
            Self::InvalidMessage { .. } => INVALID_MESSAGE,
        }
    }

    /// Room named by the error, when there is one.
    pub fn room(&self) -> Option<&str> {
        match self {
            Self::InvalidRoom { room } | Self::NotInRoom { room } => Some(room),
            _ => None,
        }
    }
}

/// Result type for realtime operations.
pub type Result<T> = std::result::Result<T, RealtimeError>;
