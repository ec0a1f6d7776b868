//! Push transport: WebSocket sessions with rooms and presence.

pub mod handler;
pub mod heartbeat;
pub mod protocol;
pub mod session;
