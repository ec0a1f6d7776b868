//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup before
/// any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric names shared across crates.

/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// WebSocket connection duration (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// SSE streams opened (counter).
pub const SSE_CONNECTIONS_TOTAL: &str = "sse_connections_total";
/// Events a lagging SSE consumer skipped (counter).
pub const SSE_EVENTS_MISSED_TOTAL: &str = "sse_events_missed_total";
/// Live connections (gauge, labels: transport).
pub const REALTIME_CONNECTIONS: &str = "realtime_connections";
/// Frames dropped on full outboxes (counter).
pub const BROADCAST_DROPS_TOTAL: &str = "broadcast_drops_total";
/// Room deliveries that did not reach a member (counter, labels: reason).
pub const DELIVERY_FAILURES_TOTAL: &str = "delivery_failures_total";
/// Connections removed by the stale-connection reaper (counter).
pub const CONNECTIONS_REAPED_TOTAL: &str = "connections_reaped_total";
/// Work-order notifications composed (counter).
pub const NOTIFICATIONS_PUBLISHED_TOTAL: &str = "notifications_published_total";
/// Rejected handshakes and trigger calls (counter, labels: reason).
pub const AUTH_REJECTIONS_TOTAL: &str = "auth_rejections_total";
