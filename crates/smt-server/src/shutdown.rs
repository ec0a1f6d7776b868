//! Server-wide shutdown signal.
//!
//! One root token is cancelled on ctrl-c. The axum server, every SSE stream
//! and every WebSocket session watch it (sessions through child tokens so a
//! single session can stop without affecting the rest).

use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Time background tasks get to finish once shutdown starts.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the root cancellation token.
#[derive(Default)]
pub struct ShutdownCoordinator {
    root: CancellationToken,
}

impl ShutdownCoordinator {
    /// New coordinator, not yet cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// The root token.
    pub fn token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// A token cancelled with the root that can also be cancelled alone.
    pub fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Cancel the root token. Repeated calls are no-ops.
    pub fn shutdown(&self) {
        if !self.root.is_cancelled() {
            info!("shutdown requested");
        }
        self.root.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Cancel, then wait up to `timeout` (default 10s) for `tasks`.
    ///
    /// Tasks still running at the deadline are left detached.
    pub async fn graceful_shutdown(&self, tasks: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DRAIN_TIMEOUT);
        self.shutdown();

        let pending = tasks.len();
        match tokio::time::timeout(timeout, join_all(tasks)).await {
            Ok(results) => {
                let panicked = results.iter().filter(|r| r.is_err()).count();
                if panicked > 0 {
                    warn!(panicked, "tasks ended abnormally during shutdown");
                }
                info!(tasks = pending, "background tasks drained");
            }
            Err(_) => warn!(tasks = pending, ?timeout, "shutdown deadline passed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_live() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
        assert!(!coord.token().is_cancelled());
    }

    #[test]
    fn shutdown_reaches_sessions_and_streams() {
        let coord = ShutdownCoordinator::new();
        let stream = coord.token();
        let session = coord.child_token();
        coord.shutdown();
        coord.shutdown();
        assert!(stream.is_cancelled());
        assert!(session.is_cancelled());
    }

    #[test]
    fn ending_one_session_leaves_server_running() {
        let coord = ShutdownCoordinator::new();
        let session = coord.child_token();
        session.cancel();
        assert!(!coord.is_shutting_down());
    }

    #[tokio::test]
    async fn drains_tasks_watching_the_token() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let reaper = tokio::spawn(async move { token.cancelled().await });
        coord.graceful_shutdown(vec![reaper], None).await;
        assert!(coord.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_task_does_not_block_past_deadline() {
        let coord = ShutdownCoordinator::new();
        let stuck = tokio::spawn(tokio::time::sleep(Duration::from_secs(300)));
        let started = tokio::time::Instant::now();
        coord
            .graceful_shutdown(vec![stuck], Some(Duration::from_millis(100)))
            .await;
        assert!(started.elapsed() < Duration::from_secs(300));
    }
}
