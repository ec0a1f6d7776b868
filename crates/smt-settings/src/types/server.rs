//! Server and realtime settings.

use serde::{Deserialize, Serialize};
use smt_core::RoomName;

/// HTTP listener and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` auto-assigns).
    pub port: u16,
    /// Interval between liveness signals on both transports, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Time a push client gets to answer a ping, in milliseconds. At most one
    /// heartbeat interval.
    pub heartbeat_timeout_ms: u64,
    /// Maximum concurrent push connections.
    pub max_connections: usize,
    /// Per-connection outbound queue capacity (frames).
    pub outbox_capacity: usize,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 10_000,
            max_connections: 500,
            outbox_capacity: 256,
            max_message_size: 64 * 1024,
        }
    }
}

/// Event queue and broadcast settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeSettings {
    /// Number of recent events a lagging pull consumer can still catch up on.
    pub event_retention: usize,
    /// Rooms that receive work-order status notifications.
    pub broadcast_rooms: Vec<RoomName>,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            event_retention: 256,
            broadcast_rooms: RoomName::ALL.to_vec(),
        }
    }
}
