//! Builds notification events and hands them to every transport.
//!
//! The composer is the only place a [`NotificationEvent`] is constructed. Each
//! registered [`NotificationSink`] receives the same `Arc` exactly once, so
//! adding a transport means registering a sink, not editing the trigger.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use smt_core::RoomName;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::broadcast::RoomBroadcaster;
use crate::event::{NotificationEvent, WorkOrderSubject};
use crate::queue::EventQueue;

/// A sink could not accept an event.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The event could not be serialized for the wire.
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
    /// The sink is not accepting events.
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// A transport that receives composed events.
pub trait NotificationSink: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Deliver `event`. Returns the number of recipients reached.
    fn deliver(&self, event: &Arc<NotificationEvent>) -> Result<usize, SinkError>;
}

/// Publishes events to the pull transport's queue.
pub struct QueueSink {
    queue: Arc<EventQueue>,
}

impl QueueSink {
    /// Sink publishing to `queue`.
    pub fn new(queue: Arc<EventQueue>) -> Self {
        Self { queue }
    }
}

impl NotificationSink for QueueSink {
    fn name(&self) -> &'static str {
        "event_queue"
    }

    fn deliver(&self, event: &Arc<NotificationEvent>) -> Result<usize, SinkError> {
        Ok(self.queue.publish(Arc::clone(event)))
    }
}

/// Broadcasts events to a fixed set of rooms on the push transport.
pub struct RoomSink {
    broadcaster: Arc<RoomBroadcaster>,
    rooms: Vec<RoomName>,
}

impl RoomSink {
    /// Sink broadcasting to each of `rooms` once.
    pub fn new(broadcaster: Arc<RoomBroadcaster>, rooms: impl IntoIterator<Item = RoomName>) -> Self {
        let mut rooms: Vec<RoomName> = rooms.into_iter().collect();
        rooms.sort_unstable();
        rooms.dedup();
        Self { broadcaster, rooms }
    }

    /// Target rooms.
    pub fn rooms(&self) -> &[RoomName] {
        &self.rooms
    }
}

impl NotificationSink for RoomSink {
    fn name(&self) -> &'static str {
        "room_broadcast"
    }

    fn deliver(&self, event: &Arc<NotificationEvent>) -> Result<usize, SinkError> {
        let payload = Arc::new(event.to_json()?);
        Ok(self
            .rooms
            .iter()
            .map(|room| self.broadcaster.broadcast(*room, &payload, None).delivered)
            .sum())
    }
}

/// Result of one `notify` call.
#[derive(Debug)]
pub struct Notified {
    /// The composed event.
    pub event: Arc<NotificationEvent>,
    /// Recipients reached across all sinks.
    pub delivered: usize,
    /// Sinks that failed.
    pub failed_sinks: Vec<&'static str>,
}

/// Composes events and fans them out to sinks.
#[derive(Default)]
pub struct NotificationComposer {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl NotificationComposer {
    /// Composer with no sinks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink.
    pub fn register(&mut self, sink: Arc<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    /// Build a work-order status event and deliver it to every sink.
    ///
    /// Sink failures are logged and reported in [`Notified::failed_sinks`];
    /// they never stop delivery to the remaining sinks.
    pub fn notify(
        &self,
        subject: WorkOrderSubject,
        old_status: impl Into<String>,
        new_status: impl Into<String>,
        actor: impl Into<String>,
    ) -> Notified {
        let event = Arc::new(NotificationEvent::work_order_update(
            subject,
            old_status.into(),
            new_status.into(),
            actor.into(),
            Utc::now(),
        ));
        counter!("notifications_published_total").increment(1);

        let mut delivered = 0;
        let mut failed_sinks = Vec::new();
        for sink in &self.sinks {
            match sink.deliver(&event) {
                Ok(n) => {
                    debug!(sink = sink.name(), recipients = n, "sink delivered");
                    delivered += n;
                }
                Err(e) => {
                    error!(sink = sink.name(), error = %e, "notification sink failed");
                    failed_sinks.push(sink.name());
                }
            }
        }

        info!(
            work_order = %event.subject().work_order_number,
            old = %event.status_change().old,
            new = %event.status_change().new,
            actor = %event.status_change().actor,
            delivered,
            "work order status notified"
        );
        Notified {
            event,
            delivered,
            failed_sinks,
        }
    }
}
