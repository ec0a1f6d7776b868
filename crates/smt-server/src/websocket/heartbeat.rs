//! Push-client liveness.
//!
//! The session writer pings every `interval`; a live client answers each ping
//! within its round trip, so the gap between two signs of life never exceeds
//! one interval plus that round trip. The monitor sleeps until
//! `last_seen + interval + pong_timeout` and closes the session only if
//! nothing arrived in the meantime. A dead peer is therefore detected at most
//! `pong_timeout` after the first ping it failed to answer.

use std::sync::Arc;
use std::time::Duration;

use smt_realtime::ClientConnection;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How a liveness watch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// No pong or inbound frame within the allowed silence.
    TimedOut,
    /// The session or the server stopped first.
    Cancelled,
}

/// Longest silence tolerated from a client that is pinged every `interval`.
pub fn silence_limit(interval: Duration, pong_timeout: Duration) -> Duration {
    interval + pong_timeout
}

/// Watch `connection` until it stays silent past the limit or `cancel` fires.
///
/// The session's reader refreshes the connection's `last_seen` on every pong
/// and inbound frame.
pub async fn run_heartbeat(
    connection: Arc<ClientConnection>,
    interval: Duration,
    pong_timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let limit = silence_limit(interval, pong_timeout);

    loop {
        let deadline = connection.last_seen() + limit;
        tokio::select! {
            biased;
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
            () = time::sleep_until(deadline) => {
                let silent = connection.silent_for();
                if silent >= limit {
                    debug!(conn_id = %connection.id, ?silent, "push client went silent");
                    return HeartbeatResult::TimedOut;
                }
            }
        }
    }
}
