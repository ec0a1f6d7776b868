//! Server configuration.
//!
//! Built from loaded settings, or directly in tests. The heartbeat interval is
//! clamped to at least one millisecond so a zero from a hand-built config
//! cannot spin the ping timer. A WebSocket client is disconnected once it has
//! been silent for one interval plus `heartbeat_timeout_ms`, the time it gets
//! to answer a ping.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smt_core::Role;
use smt_realtime::HubConfig;
use smt_settings::SmtSettings;

/// Configuration for the realtime server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent connections across both transports.
    pub max_connections: usize,
    /// Heartbeat interval in milliseconds (WebSocket ping, SSE heartbeat event).
    pub heartbeat_interval_ms: u64,
    /// Time a WebSocket client gets to answer a ping.
    pub heartbeat_timeout_ms: u64,
    /// Frames buffered per push client before drops are counted.
    pub outbox_capacity: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Roles allowed to open either transport.
    pub viewer_roles: Vec<Role>,
    /// Roles allowed to post status changes.
    pub writer_roles: Vec<Role>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 500,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 10_000,
            outbox_capacity: 256,
            max_message_size: 64 * 1024,
            viewer_roles: Role::ALL.to_vec(),
            writer_roles: vec![Role::Admin, Role::Scheduler, Role::Supervisor],
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &SmtSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_connections: settings.server.max_connections,
            heartbeat_interval_ms: settings.server.heartbeat_interval_ms,
            heartbeat_timeout_ms: settings.server.heartbeat_timeout_ms,
            outbox_capacity: settings.server.outbox_capacity,
            max_message_size: settings.server.max_message_size,
            viewer_roles: settings.auth.viewer_roles.clone(),
            writer_roles: settings.auth.writer_roles.clone(),
        }
    }

    /// Heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    /// Pong allowance after each ping.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

/// Hub parameters from loaded settings.
pub fn hub_config(settings: &SmtSettings) -> HubConfig {
    HubConfig {
        event_retention: settings.realtime.event_retention,
        broadcast_rooms: settings.realtime.broadcast_rooms.clone(),
    }
}
