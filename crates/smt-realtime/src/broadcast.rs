//! Room-scoped delivery to push clients.

use std::sync::Arc;

use metrics::counter;
use smt_core::{ConnectionId, RealtimeError, RoomName};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::DeliveryError;
use crate::messages::ServerMessage;
use crate::registry::PresenceRegistry;

/// Drops after which a slow client is reaped.
pub const MAX_TOTAL_DROPS: u64 = 100;

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members addressed, excluding the skipped sender.
    pub recipients: usize,
    /// Frames enqueued.
    pub delivered: usize,
    /// One [`RealtimeError::DeliveryFailure`] per member whose outbox
    /// rejected the frame.
    pub failed: Vec<RealtimeError>,
}


/// Delivers frames to the current members of a room.
pub struct RoomBroadcaster {
    registry: Arc<PresenceRegistry>,
    stale_tx: mpsc::UnboundedSender<ConnectionId>,
}

impl RoomBroadcaster {
    /// Broadcaster reporting stale connections on `stale_tx`.
    pub fn new(
        registry: Arc<PresenceRegistry>,
        stale_tx: mpsc::UnboundedSender<ConnectionId>,
    ) -> Self {
        Self { registry, stale_tx }
    }

    /// Enqueue `payload` for every member of `room` except `except`.
    ///
    /// Membership is read under the room lock at call time. Per-recipient
    /// failures are reported, never returned as errors.
    pub fn broadcast(
        &self,
        room: RoomName,
        payload: &Arc<String>,
        except: Option<&ConnectionId>,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut stale = Vec::new();

        self.registry.for_each_member(room, |id, member| {
            if except == Some(id) {
                return;
            }
            let Some(outbox) = &member.outbox else {
                return;
            };
            report.recipients += 1;
            let Err(err) = outbox.send(Arc::clone(payload)) else {
                report.delivered += 1;
                return;
            };
            match err {
                DeliveryError::Closed => stale.push(id.clone()),
                DeliveryError::Full => {
                    counter!("broadcast_drops_total").increment(1);
                    let drops = outbox.drop_count();
                    if drops > MAX_TOTAL_DROPS {
                        warn!(conn_id = %id, drops, "slow client exceeded drop limit, reaping");
                        stale.push(id.clone());
                    }
                }
            }
            let failure = RealtimeError::DeliveryFailure {
                id: id.clone(),
                reason: err.to_string(),
            };
            warn!(%room, error = %failure, "room delivery failed");
            counter!("delivery_failures_total", "reason" => failure_label(err)).increment(1);
            report.failed.push(failure);
        });

        for id in stale {
            // reaper gone means the hub is shutting down
            let _ = self.stale_tx.send(id);
        }

        debug!(
            %room,
            recipients = report.recipients,
            delivered = report.delivered,
            failed = report.failed.len(),
            "room broadcast"
        );
        report
    }

    /// Serialize `message` once and broadcast it.
    pub fn broadcast_message(
        &self,
        room: RoomName,
        message: &ServerMessage,
        except: Option<&ConnectionId>,
    ) -> BroadcastReport {
        match message.to_frame_json() {
            Ok(json) => self.broadcast(room, &Arc::new(json), except),
            Err(e) => {
                warn!(error = %e, kind = message.event_type(), "failed to serialize frame");
                BroadcastReport::default()
            }
        }
    }
}

fn failure_label(err: DeliveryError) -> &'static str {
    match err {
        DeliveryError::Closed => "closed",
        DeliveryError::Full => "full",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ClientConnection;
    use crate::registry::{Attachment, Transport};
    use assert_matches::assert_matches;
    use smt_core::{Identity, Role};

    struct Fixture {
        registry: Arc<PresenceRegistry>,
        broadcaster: RoomBroadcaster,
        stale_rx: mpsc::UnboundedReceiver<ConnectionId>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(PresenceRegistry::new());
        let (stale_tx, stale_rx) = mpsc::unbounded_channel();
        Fixture {
            broadcaster: RoomBroadcaster::new(registry.clone(), stale_tx),
            registry,
            stale_rx,
        }
    }

    fn push_client(
        reg: &PresenceRegistry,
        name: &str,
        capacity: usize,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (conn, rx) = ClientConnection::channel(format!("conn_{name}").into(), capacity);
        reg.register(
            conn.id.clone(),
            Attachment::new(
                Identity::new(name, name, Role::Scheduler),
                Transport::Push(conn.clone()),
            ),
        )
        .unwrap();
        (conn, rx)
    }

    #[test]
    fn delivers_to_current_members_only() {
        let f = fixture();
        let (a, mut rx_a) = push_client(&f.registry, "a", 8);
        let (b, mut rx_b) = push_client(&f.registry, "b", 8);
        let (_c, mut rx_c) = push_client(&f.registry, "c", 8);
        let _ = f.registry.join(RoomName::Timeline, &a.id).unwrap();
        let _ = f.registry.join(RoomName::Timeline, &b.id).unwrap();
        let _ = f.registry.leave(RoomName::Timeline, &b.id);

        let report = f
            .broadcaster
            .broadcast(RoomName::Timeline, &Arc::new("x".into()), None);
        assert_eq!(report.recipients, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(&*rx_a.try_recv().unwrap(), "x");
        assert!(rx_b.try_recv().is_err());
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn sender_is_excluded() {
        let f = fixture();
        let (a, mut rx_a) = push_client(&f.registry, "a", 8);
        let (b, mut rx_b) = push_client(&f.registry, "b", 8);
        let _ = f.registry.join(RoomName::FloorDisplay, &a.id).unwrap();
        let _ = f.registry.join(RoomName::FloorDisplay, &b.id).unwrap();

        let report =
            f.broadcaster
                .broadcast(RoomName::FloorDisplay, &Arc::new("y".into()), Some(&a.id));
        assert_eq!(report.delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(&*rx_b.try_recv().unwrap(), "y");
    }

    #[test]
    fn closed_outbox_is_reported_stale_and_others_still_receive() {
        let mut f = fixture();
        let (a, rx_a) = push_client(&f.registry, "a", 8);
        let (b, mut rx_b) = push_client(&f.registry, "b", 8);
        let _ = f.registry.join(RoomName::Timeline, &a.id).unwrap();
        let _ = f.registry.join(RoomName::Timeline, &b.id).unwrap();
        drop(rx_a);

        let report = f
            .broadcaster
            .broadcast(RoomName::Timeline, &Arc::new("z".into()), None);
        assert_eq!(report.recipients, 2);
        assert_eq!(report.delivered, 1);
        assert_matches!(
            report.failed.as_slice(),
            [RealtimeError::DeliveryFailure { id, reason }] if *id == a.id && reason == "outbox closed"
        );
        assert_eq!(&*rx_b.try_recv().unwrap(), "z");
        assert_eq!(f.stale_rx.try_recv().unwrap(), a.id);
    }

    #[test]
    fn slow_client_reaped_after_drop_limit() {
        let mut f = fixture();
        let (a, _rx_a) = push_client(&f.registry, "a", 1);
        let _ = f.registry.join(RoomName::Timeline, &a.id).unwrap();
        let payload = Arc::new("p".to_owned());

        let _ = f.broadcaster.broadcast(RoomName::Timeline, &payload, None);
        let report = f.broadcaster.broadcast(RoomName::Timeline, &payload, None);
        assert_eq!(report.delivered, 0);
        assert_matches!(
            report.failed.as_slice(),
            [RealtimeError::DeliveryFailure { id, reason }] if *id == a.id && reason == "outbox full"
        );
        for _ in 1..MAX_TOTAL_DROPS {
            let _ = f.broadcaster.broadcast(RoomName::Timeline, &payload, None);
        }
        assert!(f.stale_rx.try_recv().is_err());

        let _ = f.broadcaster.broadcast(RoomName::Timeline, &payload, None);
        assert_eq!(f.stale_rx.try_recv().unwrap(), a.id);
    }

    #[test]
    fn pull_members_are_skipped() {
        let f = fixture();
        f.registry
            .register(
                "conn_pull".into(),
                Attachment::new(Identity::new("p", "p", Role::FloorView), Transport::Pull),
            )
            .unwrap();
        let _ = f.registry.join(RoomName::Timeline, &"conn_pull".into()).unwrap();
        let report = f
            .broadcaster
            .broadcast(RoomName::Timeline, &Arc::new("q".into()), None);
        assert_eq!(report, BroadcastReport::default());
    }
}
