//! The notification hub: one explicitly constructed service object.
//!
//! Owns the presence registry, the event queue, the room broadcaster and the
//! composer. Transports call into the hub; nothing here knows about HTTP.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use smt_core::{ConnectionId, Identity, RealtimeError, Result, RoomName};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::RoomBroadcaster;
use crate::composer::{NotificationComposer, NotificationSink, Notified, QueueSink, RoomSink};
use crate::event::WorkOrderSubject;
use crate::messages::ServerMessage;
use crate::queue::{EventCursor, EventQueue};
use crate::registry::{
    Attachment, Disconnection, JoinOutcome, LeaveOutcome, PresenceRegistry, TransportKind,
};

/// Hub construction parameters.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Events retained for lagging pull consumers.
    pub event_retention: usize,
    /// Rooms every work-order event is broadcast to.
    pub broadcast_rooms: Vec<RoomName>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            event_retention: crate::queue::DEFAULT_RETENTION,
            broadcast_rooms: RoomName::ALL.to_vec(),
        }
    }
}

/// Why a connection went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Client closed the socket or stream.
    ClientClosed,
    /// Reading from the client failed.
    ReadError,
    /// No pong within the heartbeat timeout.
    HeartbeatTimeout,
    /// The broadcaster could not reach the client.
    DeliveryFailure,
    /// The server is shutting down.
    Shutdown,
}

impl DisconnectReason {
    /// Short label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::ReadError => "read_error",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::DeliveryFailure => "delivery_failure",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ephemeral UI-sync actions relayed to the other members of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiAction {
    /// Member is looking at a work order.
    Viewing,
    /// Member started editing a work order.
    EditingStarted,
    /// Member stopped editing a work order.
    EditingStopped,
}

/// The realtime service object.
pub struct NotificationHub {
    registry: Arc<PresenceRegistry>,
    queue: Arc<EventQueue>,
    broadcaster: Arc<RoomBroadcaster>,
    composer: NotificationComposer,
    stale_rx: Mutex<Option<mpsc::UnboundedReceiver<ConnectionId>>>,
    cancel: CancellationToken,
}

impl NotificationHub {
    /// Build a hub with the queue and room sinks registered.
    pub fn new(config: &HubConfig) -> Self {
        Self::with_sinks(config, Vec::new())
    }

    /// Build a hub with additional sinks after the built-in ones.
    pub fn with_sinks(config: &HubConfig, extra: Vec<Arc<dyn NotificationSink>>) -> Self {
        let registry = Arc::new(PresenceRegistry::new());
        let queue = Arc::new(EventQueue::new(config.event_retention));
        let (stale_tx, stale_rx) = mpsc::unbounded_channel();
        let broadcaster = Arc::new(RoomBroadcaster::new(registry.clone(), stale_tx));

        let mut composer = NotificationComposer::new();
        composer.register(Arc::new(QueueSink::new(queue.clone())));
        composer.register(Arc::new(RoomSink::new(
            broadcaster.clone(),
            config.broadcast_rooms.iter().copied(),
        )));
        for sink in extra {
            composer.register(sink);
        }

        Self {
            registry,
            queue,
            broadcaster,
            composer,
            stale_rx: Mutex::new(Some(stale_rx)),
            cancel: CancellationToken::new(),
        }
    }

    /// The presence registry.
    pub fn registry(&self) -> &Arc<PresenceRegistry> {
        &self.registry
    }

    /// The pull transport's queue.
    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Spawn the stale-connection reaper. Returns `None` if already started.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut rx = self.stale_rx.lock().take()?;
        let hub = Arc::clone(self);
        let cancel = self.cancel.clone();
        Some(tokio::spawn(async move {
            info!("stale connection reaper started");
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    id = rx.recv() => match id {
                        Some(id) => {
                            if hub.disconnect(&id, DisconnectReason::DeliveryFailure).is_some() {
                                counter!("connections_reaped_total").increment(1);
                            }
                        }
                        None => break,
                    },
                }
            }
            info!("stale connection reaper stopped");
        }))
    }

    /// Reap stale connections synchronously when the reaper task is not running.
    pub fn reap_pending(&self) -> usize {
        let mut guard = self.stale_rx.lock();
        let Some(rx) = guard.as_mut() else {
            return 0;
        };
        let mut ids = Vec::new();
        while let Ok(id) = rx.try_recv() {
            ids.push(id);
        }
        drop(guard);
        ids.iter()
            .filter(|id| self.disconnect(id, DisconnectReason::DeliveryFailure).is_some())
            .count()
    }

    /// Stop the stale-connection reaper.
    pub fn shutdown(&self) {
        info!("notification hub shutting down");
        self.cancel.cancel();
    }

    /// Register a new connection under a fresh id.
    pub fn connect(&self, attachment: Attachment) -> Result<ConnectionId> {
        let id = ConnectionId::new();
        self.attach(id.clone(), attachment)?;
        Ok(id)
    }

    /// Register a connection under a caller-chosen id.
    pub fn attach(&self, id: ConnectionId, attachment: Attachment) -> Result<()> {
        let username = attachment.identity.username.clone();
        let kind = attachment.transport.kind();
        self.registry.register(id.clone(), attachment)?;
        gauge!("realtime_connections", "transport" => transport_label(kind)).increment(1.0);
        info!(conn_id = %id, user = %username, transport = transport_label(kind), "client connected");
        Ok(())
    }

    /// Join a room and tell the other members.
    ///
    /// A connection whose credential has expired since connecting is rejected
    /// with `AuthRejected { reason: "expired" }` and its state is unchanged.
    pub fn join(&self, id: &ConnectionId, room: &str) -> Result<JoinOutcome> {
        let room: RoomName = room.parse()?;
        let conn = self.registry.lookup(id)?;
        if conn.is_expired_at(Utc::now()) {
            return Err(RealtimeError::AuthRejected {
                reason: "expired".into(),
            });
        }
        let outcome = self.registry.join(room, id)?;
        if outcome.newly_joined {
            debug!(conn_id = %id, %room, members = outcome.member_count, "joined room");
            let _ = self.broadcaster.broadcast_message(
                room,
                &ServerMessage::UserJoinedRoom {
                    room,
                    user: conn.identity,
                    member_count: outcome.member_count,
                },
                Some(id),
            );
        }
        Ok(outcome)
    }

    /// Leave a room and tell the remaining members.
    pub fn leave(&self, id: &ConnectionId, room: &str) -> Result<LeaveOutcome> {
        let room: RoomName = room.parse()?;
        let outcome = self.registry.leave(room, id);
        if let Some(user) = &outcome.identity {
            debug!(conn_id = %id, %room, members = outcome.member_count, "left room");
            let _ = self.broadcaster.broadcast_message(
                room,
                &ServerMessage::UserLeftRoom {
                    room,
                    user: user.clone(),
                    member_count: outcome.member_count,
                },
                None,
            );
        }
        Ok(outcome)
    }

    /// Current members of a room.
    pub fn room_users(&self, room: &str) -> Result<(RoomName, Vec<Identity>)> {
        let room: RoomName = room.parse()?;
        Ok((room, self.registry.members(room)))
    }

    /// Relay a UI-sync action to the other members of `room`.
    ///
    /// The sender must be a member. Returns the number of frames enqueued.
    pub fn ui_sync(
        &self,
        id: &ConnectionId,
        room: &str,
        action: UiAction,
        subject: String,
    ) -> Result<usize> {
        let room_name: RoomName = room.parse()?;
        let conn = self.registry.lookup(id)?;
        if !conn.joined_rooms.contains(&room_name) {
            return Err(RealtimeError::NotInRoom {
                room: room.to_owned(),
            });
        }
        let user = conn.identity;
        let room = room_name;
        let message = match action {
            UiAction::Viewing => ServerMessage::UserViewing { room, user, subject },
            UiAction::EditingStarted => ServerMessage::UserEditing { room, user, subject },
            UiAction::EditingStopped => ServerMessage::UserStoppedEditing { room, user, subject },
        };
        Ok(self.broadcaster.broadcast_message(room, &message, Some(id)).delivered)
    }

    /// Compose a work-order status event and deliver it on both transports.
    pub fn notify(
        &self,
        subject: WorkOrderSubject,
        old_status: impl Into<String>,
        new_status: impl Into<String>,
        actor: impl Into<String>,
    ) -> Notified {
        self.composer.notify(subject, old_status, new_status, actor)
    }

    /// A private cursor on the event queue.
    pub fn subscribe_events(&self) -> EventCursor {
        self.queue.subscribe()
    }

    /// Tear down a connection: remove it everywhere and announce each departure once.
    ///
    /// Idempotent; only the first call for an id returns `Some`.
    pub fn disconnect(&self, id: &ConnectionId, reason: DisconnectReason) -> Option<Disconnection> {
        let disconnection = self.registry.disconnect(id)?;
        for departure in &disconnection.departures {
            let _ = self.broadcaster.broadcast_message(
                departure.room,
                &ServerMessage::UserLeftRoom {
                    room: departure.room,
                    user: departure.identity.clone(),
                    member_count: departure.remaining.len(),
                },
                None,
            );
        }
        gauge!("realtime_connections", "transport" => transport_label(disconnection.transport))
            .decrement(1.0);
        if reason == DisconnectReason::DeliveryFailure {
            warn!(conn_id = %id, user = %disconnection.identity.username, %reason, "client reaped");
        } else {
            info!(
                conn_id = %id,
                user = %disconnection.identity.username,
                %reason,
                rooms = disconnection.departures.len(),
                "client disconnected"
            );
        }
        Some(disconnection)
    }
}

fn transport_label(kind: TransportKind) -> &'static str {
    match kind {
        TransportKind::Pull => "pull",
        TransportKind::Push => "push",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ClientConnection;
    use crate::queue::CursorRead;
    use crate::registry::Transport;
    use assert_matches::assert_matches;
    use smt_core::Role;
    use std::time::Duration;

    fn hub() -> Arc<NotificationHub> {
        Arc::new(NotificationHub::new(&HubConfig::default()))
    }

    fn frames(rx: &mut mpsc::Receiver<Arc<String>>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(f) = rx.try_recv() {
            out.push(serde_json::from_str(&f).unwrap());
        }
        out
    }

    fn push(
        hub: &NotificationHub,
        name: &str,
        role: Role,
    ) -> (ConnectionId, mpsc::Receiver<Arc<String>>) {
        let (conn, rx) = ClientConnection::channel(ConnectionId::new(), 32);
        hub.attach(
            conn.id.clone(),
            Attachment::new(Identity::new(format!("u-{name}"), name, role), Transport::Push(conn.clone())),
        )
        .unwrap();
        (conn.id.clone(), rx)
    }

    #[test]
    fn join_announces_to_others_not_self() {
        let hub = hub();
        let (a, mut rx_a) = push(&hub, "alice", Role::Scheduler);
        let (b, mut rx_b) = push(&hub, "bob", Role::Supervisor);
        let _ = hub.join(&a, "timeline").unwrap();
        let outcome = hub.join(&b, "timeline").unwrap();
        assert_eq!(outcome.member_count, 2);

        let seen_a = frames(&mut rx_a);
        assert_eq!(seen_a.len(), 1);
        assert_eq!(seen_a[0]["type"], "user_joined_room");
        assert_eq!(seen_a[0]["user"]["username"], "bob");
        assert!(frames(&mut rx_b).is_empty());
    }

    #[test]
    fn rejoin_is_silent() {
        let hub = hub();
        let (a, _rx_a) = push(&hub, "alice", Role::Scheduler);
        let (b, mut rx_b) = push(&hub, "bob", Role::Scheduler);
        let _ = hub.join(&b, "timeline").unwrap();
        let _ = hub.join(&a, "timeline").unwrap();
        let _ = frames(&mut rx_b);
        let again = hub.join(&a, "timeline").unwrap();
        assert!(!again.newly_joined);
        assert!(frames(&mut rx_b).is_empty());
    }

    #[test]
    fn invalid_room_is_rejected_without_state_change() {
        let hub = hub();
        let (a, _rx) = push(&hub, "alice", Role::Scheduler);
        let err = hub.join(&a, "not_a_real_room").unwrap_err();
        assert_matches!(err, RealtimeError::InvalidRoom { ref room } if room == "not_a_real_room");
        assert!(hub.registry().lookup(&a).unwrap().joined_rooms.is_empty());
    }

    #[test]
    fn expired_credential_cannot_join() {
        let hub = hub();
        let (conn, _rx) = ClientConnection::channel(ConnectionId::new(), 4);
        hub.attach(
            conn.id.clone(),
            Attachment::new(Identity::new("u-1", "alice", Role::Admin), Transport::Push(conn.clone()))
                .expiring_at(Utc::now() - chrono::Duration::seconds(1)),
        )
        .unwrap();
        let err = hub.join(&conn.id, "timeline").unwrap_err();
        assert_eq!(err, RealtimeError::AuthRejected { reason: "expired".into() });
        assert!(hub.registry().lookup(&conn.id).unwrap().joined_rooms.is_empty());
    }

    #[test]
    fn leave_announces_and_is_idempotent() {
        let hub = hub();
        let (a, _rx_a) = push(&hub, "alice", Role::Scheduler);
        let (b, mut rx_b) = push(&hub, "bob", Role::Scheduler);
        let _ = hub.join(&a, "floor_display").unwrap();
        let _ = hub.join(&b, "floor_display").unwrap();

        let first = hub.leave(&a, "floor_display").unwrap();
        assert!(first.was_member);
        let second = hub.leave(&a, "floor_display").unwrap();
        assert!(!second.was_member);

        let left: Vec<_> = frames(&mut rx_b)
            .into_iter()
            .filter(|f| f["type"] == "user_left_room")
            .collect();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0]["member_count"], 1);
    }

    #[test]
    fn disconnect_announces_once_per_room() {
        let hub = hub();
        let (a, _rx_a) = push(&hub, "alice", Role::Scheduler);
        let (b, mut rx_b) = push(&hub, "bob", Role::Scheduler);
        for room in ["timeline", "floor_display"] {
            let _ = hub.join(&a, room).unwrap();
            let _ = hub.join(&b, room).unwrap();
        }
        let _ = frames(&mut rx_b);

        assert!(hub.disconnect(&a, DisconnectReason::ClientClosed).is_some());
        assert!(hub.disconnect(&a, DisconnectReason::ReadError).is_none());

        let left = frames(&mut rx_b);
        assert_eq!(left.len(), 2);
        assert!(left.iter().all(|f| f["type"] == "user_left_room"));
        assert_matches!(
            hub.registry().lookup(&a),
            Err(RealtimeError::NotFoundConnection { .. })
        );
        assert_eq!(hub.registry().members(RoomName::Timeline).len(), 1);
    }

    #[test]
    fn ui_sync_requires_membership_and_skips_sender() {
        let hub = hub();
        let (a, mut rx_a) = push(&hub, "alice", Role::Scheduler);
        let (b, mut rx_b) = push(&hub, "bob", Role::Scheduler);

        let err = hub
            .ui_sync(&a, "timeline", UiAction::Viewing, "42".into())
            .unwrap_err();
        assert_matches!(err, RealtimeError::NotInRoom { .. });

        let _ = hub.join(&a, "timeline").unwrap();
        let _ = hub.join(&b, "timeline").unwrap();
        let _ = frames(&mut rx_a);

        let n = hub
            .ui_sync(&a, "timeline", UiAction::EditingStarted, "42".into())
            .unwrap();
        assert_eq!(n, 1);
        let seen = frames(&mut rx_b);
        assert_eq!(seen[0]["type"], "user_editing");
        assert_eq!(seen[0]["subject"], "42");
        assert!(frames(&mut rx_a).is_empty());
    }

    #[test]
    fn notify_reaches_both_transports() {
        let hub = hub();
        let (a, mut rx_a) = push(&hub, "alice", Role::Scheduler);
        let _ = hub.join(&a, "timeline").unwrap();
        let mut cursor = hub.subscribe_events();

        let notified = hub.notify(WorkOrderSubject::new("42", "WO-1"), "Ready", "In Progress", "alice");
        assert!(notified.failed_sinks.is_empty());

        let pulled = assert_matches!(cursor.try_next(), Some(CursorRead::Event(e)) => e);
        let pushed = frames(&mut rx_a);
        assert_eq!(pushed.len(), 1);
        let pulled: serde_json::Value = serde_json::from_str(&pulled.to_json().unwrap()).unwrap();
        assert_eq!(pulled, pushed[0]);
    }

    #[test]
    fn non_members_receive_no_room_broadcasts() {
        let hub = hub();
        let (_a, mut rx_a) = push(&hub, "alice", Role::Scheduler);
        let _ = hub.notify(WorkOrderSubject::new("1", "WO-9"), "Ready", "Completed", "bob");
        assert!(frames(&mut rx_a).is_empty());
    }

    #[test]
    fn closed_outbox_is_reaped_synchronously() {
        let hub = hub();
        let (a, rx_a) = push(&hub, "alice", Role::Scheduler);
        let (b, mut rx_b) = push(&hub, "bob", Role::Scheduler);
        let _ = hub.join(&a, "timeline").unwrap();
        let _ = hub.join(&b, "timeline").unwrap();
        let _ = frames(&mut rx_b);
        drop(rx_a);

        let _ = hub.notify(WorkOrderSubject::new("1", "WO-1"), "Ready", "In Progress", "carol");
        assert_eq!(hub.reap_pending(), 1);
        assert_eq!(hub.registry().members(RoomName::Timeline).len(), 1);

        let types: Vec<_> = frames(&mut rx_b).into_iter().map(|f| f["type"].clone()).collect();
        assert_eq!(types, ["work_order_update", "user_left_room"]);
    }

    #[tokio::test]
    async fn reaper_task_disconnects_stale_connections() {
        let hub = hub();
        let handle = hub.start().unwrap();
        assert!(hub.start().is_none());

        let (a, rx_a) = push(&hub, "alice", Role::Scheduler);
        let _ = hub.join(&a, "timeline").unwrap();
        drop(rx_a);
        let _ = hub.notify(WorkOrderSubject::new("1", "WO-1"), "Ready", "In Progress", "carol");

        tokio::time::timeout(Duration::from_secs(5), async {
            while hub.registry().lookup(&a).is_ok() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        hub.shutdown();
        handle.await.unwrap();
    }

    #[test]
    fn concurrent_disconnects_announce_once() {
        let hub = hub();
        let (a, _rx_a) = push(&hub, "alice", Role::Scheduler);
        let (b, mut rx_b) = push(&hub, "bob", Role::Scheduler);
        let _ = hub.join(&a, "timeline").unwrap();
        let _ = hub.join(&b, "timeline").unwrap();
        let _ = frames(&mut rx_b);

        let wins: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| usize::from(hub.disconnect(&a, DisconnectReason::ReadError).is_some())))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(wins, 1);
        assert_eq!(frames(&mut rx_b).len(), 1);
    }
}
