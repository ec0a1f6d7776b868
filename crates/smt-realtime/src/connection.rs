//! Outbound side of a push (WebSocket) client.
//!
//! Producers never write to the socket directly: they enqueue pre-serialized
//! frames into the connection's bounded outbox, and the session's writer task
//! drains it in order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use smt_core::ConnectionId;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Why a frame could not be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The writer task has gone away; the client is disconnected.
    #[error("outbox closed")]
    Closed,
    /// The client is not draining fast enough.
    #[error("outbox full")]
    Full,
}

/// A connected push client's outbox plus liveness bookkeeping.
pub struct ClientConnection {
    /// Connection ID.
    pub id: ConnectionId,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// Last pong or inbound frame, starting at connect time.
    last_seen: Mutex<Instant>,
    /// Count of frames dropped due to a full outbox.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a connection around an existing sender.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            tx,
            last_seen: Mutex::new(Instant::now()),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Create a connection with a fresh outbox of `capacity` frames.
    pub fn channel(
        id: ConnectionId,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Arc::new(Self::new(id, tx)), rx)
    }

    /// Enqueue a serialized frame without blocking.
    pub fn send(&self, message: Arc<String>) -> Result<(), DeliveryError> {
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(DeliveryError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }

    /// Whether the writer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record a pong or any inbound frame.
    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// When the client was last heard from.
    pub fn last_seen(&self) -> Instant {
        *self.last_seen.lock()
    }

    /// Time since the client was last heard from.
    pub fn silent_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }
}
