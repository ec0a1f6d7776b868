//! Fan-out event queue for pull consumers.
//!
//! Backed by a `tokio::sync::broadcast` channel: publishing is a single atomic
//! append, and each subscriber owns a private cursor. The channel keeps the
//! last `retention` events (rounded up to a power of two); a cursor that falls
//! further behind skips forward and reports how many it missed.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::event::NotificationEvent;

/// Default number of retained events.
pub const DEFAULT_RETENTION: usize = 256;

/// Shared queue of published events.
pub struct EventQueue {
    tx: broadcast::Sender<Arc<NotificationEvent>>,
    retention: usize,
}

impl EventQueue {
    /// Queue retaining about `retention` events per lagging consumer.
    pub fn new(retention: usize) -> Self {
        let retention = retention.max(1).next_power_of_two();
        let (tx, _) = broadcast::channel(retention);
        Self { tx, retention }
    }

    /// Append `event`. Returns how many consumers will see it.
    ///
    /// With no consumers the event is discarded; there is no replay.
    pub fn publish(&self, event: Arc<NotificationEvent>) -> usize {
        let consumers = self.tx.send(event).unwrap_or(0);
        debug!(consumers, "event published to queue");
        consumers
    }

    /// Private cursor seeing every event published from now on.
    pub fn subscribe(&self) -> EventCursor {
        EventCursor {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live cursors.
    pub fn consumer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Effective retention bound.
    pub fn retention(&self) -> usize {
        self.retention
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

/// What a cursor read produced.
#[derive(Debug, Clone)]
pub enum CursorRead {
    /// Next event in publication order.
    Event(Arc<NotificationEvent>),
    /// The cursor lagged and this many events were skipped.
    Missed(u64),
}

/// A pull consumer's position in the queue.
pub struct EventCursor {
    rx: broadcast::Receiver<Arc<NotificationEvent>>,
}

impl EventCursor {
    /// Wait for the next event. `None` once the queue is gone.
    pub async fn next(&mut self) -> Option<CursorRead> {
        match self.rx.recv().await {
            Ok(event) => Some(CursorRead::Event(event)),
            Err(broadcast::error::RecvError::Lagged(n)) => Some(CursorRead::Missed(n)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Next event if one is ready.
    pub fn try_next(&mut self) -> Option<CursorRead> {
        match self.rx.try_recv() {
            Ok(event) => Some(CursorRead::Event(event)),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Some(CursorRead::Missed(n)),
            Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed) => {
                None
            }
        }
    }
}
