//! `/health` and `/api/health` endpoints.
//!
//! Both paths serve the same unauthenticated body. `connections` counts
//! registered clients on both transports. `pull_consumers` counts live
//! event-queue cursors, which the queue tracks on its own, so it can differ
//! from the number of registered pull clients. Every room is listed,
//! including empty ones.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use smt_core::RoomName;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered connections on both transports.
    pub connections: usize,
    /// Live cursors on the event queue.
    pub pull_consumers: usize,
    /// Members per room.
    pub rooms: BTreeMap<String, usize>,
    /// When the response was built (RFC 3339).
    pub timestamp: String,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    pull_consumers: usize,
    rooms: &BTreeMap<RoomName, usize>,
) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        pull_consumers,
        rooms: rooms
            .iter()
            .map(|(room, count)| (room.as_str().to_owned(), *count))
            .collect(),
        timestamp: Utc::now().to_rfc3339(),
    }
}
