//! Session and room membership, kept mutually consistent.
//!
//! `c ∈ room.members ⇔ room ∈ c.joined_rooms` holds after every public
//! operation. Mutations lock the connection's state mutex first and the
//! affected room lock second; broadcasts only take room read locks. No lock is
//! ever held across an `.await`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use smt_core::{ConnectionId, Identity, RealtimeError, Result, RoomName};

use crate::connection::ClientConnection;

/// Which transport a connection uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Server-Sent Events stream draining the event queue.
    Pull,
    /// WebSocket session with a per-connection outbox.
    Push,
}

/// Transport handle stored with a connection.
#[derive(Clone)]
pub enum Transport {
    /// Pull clients have no outbox; they read the event queue.
    Pull,
    /// Push clients are reached through their outbox.
    Push(Arc<ClientConnection>),
}

impl Transport {
    /// Kind of this transport.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Pull => TransportKind::Pull,
            Self::Push(_) => TransportKind::Push,
        }
    }

    fn outbox(&self) -> Option<&Arc<ClientConnection>> {
        match self {
            Self::Pull => None,
            Self::Push(conn) => Some(conn),
        }
    }
}

/// Everything needed to register a connection.
#[derive(Clone)]
pub struct Attachment {
    /// Verified identity.
    pub identity: Identity,
    /// Transport handle.
    pub transport: Transport,
    /// When the credential stops being valid.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Attachment {
    /// Attachment without a credential expiry.
    pub fn new(identity: Identity, transport: Transport) -> Self {
        Self {
            identity,
            transport,
            expires_at: None,
        }
    }

    /// Record the credential expiry.
    #[must_use]
    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// Point-in-time snapshot of a registered connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Connection id.
    pub id: ConnectionId,
    /// Verified identity.
    pub identity: Identity,
    /// Transport kind.
    pub transport: TransportKind,
    /// Rooms joined at the time of the snapshot.
    pub joined_rooms: BTreeSet<RoomName>,
    /// When the connection registered.
    pub connected_at: DateTime<Utc>,
    /// Credential expiry, if known.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Connection {
    /// Whether the credential has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now > exp)
    }
}

/// Result of a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Room joined.
    pub room: RoomName,
    /// Members after the join.
    pub member_count: usize,
    /// False when the connection was already a member.
    pub newly_joined: bool,
}

/// Result of a leave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// Room left.
    pub room: RoomName,
    /// Whether the connection was a member.
    pub was_member: bool,
    /// Members after the leave.
    pub member_count: usize,
    /// Identity of the departed member, when it was one.
    pub identity: Option<Identity>,
}

/// One room a connection was removed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomDeparture {
    /// Room.
    pub room: RoomName,
    /// Who left.
    pub identity: Identity,
    /// Members remaining after the removal, in connection id order.
    pub remaining: Vec<Identity>,
}

/// Result of tearing down a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnection {
    /// Connection that went away.
    pub id: ConnectionId,
    /// Its identity.
    pub identity: Identity,
    /// Transport kind.
    pub transport: TransportKind,
    /// Rooms it was removed from.
    pub departures: Vec<RoomDeparture>,
}

pub(crate) struct Member {
    pub(crate) identity: Identity,
    pub(crate) outbox: Option<Arc<ClientConnection>>,
}

struct Slot {
    identity: Identity,
    transport: Transport,
    connected_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    state: Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
    joined: BTreeSet<RoomName>,
    closed: bool,
}

type Members = RwLock<BTreeMap<ConnectionId, Member>>;

#[derive(Default)]
struct Rooms {
    timeline: Members,
    floor_display: Members,
}

impl Rooms {
    fn get(&self, room: RoomName) -> &Members {
        match room {
            RoomName::Timeline => &self.timeline,
            RoomName::FloorDisplay => &self.floor_display,
        }
    }
}

/// Registry of live connections and room memberships.
#[derive(Default)]
pub struct PresenceRegistry {
    slots: DashMap<ConnectionId, Arc<Slot>>,
    rooms: Rooms,
}

impl PresenceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &ConnectionId) -> Option<Arc<Slot>> {
        self.slots.get(id).map(|s| Arc::clone(s.value()))
    }

    /// Register a new connection with no rooms.
    pub fn register(&self, id: ConnectionId, attachment: Attachment) -> Result<()> {
        match self.slots.entry(id) {
            Entry::Occupied(e) => Err(RealtimeError::DuplicateConnection {
                id: e.key().clone(),
            }),
            Entry::Vacant(e) => {
                let _ = e.insert(Arc::new(Slot {
                    identity: attachment.identity,
                    transport: attachment.transport,
                    connected_at: Utc::now(),
                    expires_at: attachment.expires_at,
                    state: Mutex::new(SlotState::default()),
                }));
                Ok(())
            }
        }
    }

    /// Snapshot of a registered connection.
    pub fn lookup(&self, id: &ConnectionId) -> Result<Connection> {
        let slot = self.slot(id).ok_or_else(|| not_found(id))?;
        let state = slot.state.lock();
        if state.closed {
            return Err(not_found(id));
        }
        Ok(Connection {
            id: id.clone(),
            identity: slot.identity.clone(),
            transport: slot.transport.kind(),
            joined_rooms: state.joined.clone(),
            connected_at: slot.connected_at,
            expires_at: slot.expires_at,
        })
    }

    /// Outbox of a push connection.
    pub fn outbox(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.slot(id).and_then(|s| s.transport.outbox().cloned())
    }

    /// Remove a connection and return the rooms it was in.
    ///
    /// Unknown ids yield an empty set.
    pub fn unregister(&self, id: &ConnectionId) -> BTreeSet<RoomName> {
        self.disconnect(id)
            .map(|d| d.departures.into_iter().map(|dep| dep.room).collect())
            .unwrap_or_default()
    }

    /// Remove a connection from the session map and every room.
    ///
    /// Returns `None` when the connection was already gone, so concurrent
    /// callers observe the teardown exactly once.
    pub fn disconnect(&self, id: &ConnectionId) -> Option<Disconnection> {
        let (id, slot) = self.slots.remove(id)?;
        let mut state = slot.state.lock();
        state.closed = true;
        let departures = self.detach(&id, &slot.identity, &mut state);
        Some(Disconnection {
            identity: slot.identity.clone(),
            transport: slot.transport.kind(),
            id,
            departures,
        })
    }

    /// Join `room`, idempotently.
    pub fn join(&self, room: RoomName, id: &ConnectionId) -> Result<JoinOutcome> {
        let slot = self.slot(id).ok_or_else(|| not_found(id))?;
        let mut state = slot.state.lock();
        if state.closed {
            return Err(not_found(id));
        }
        let mut members = self.rooms.get(room).write();
        let newly_joined = !members.contains_key(id);
        if newly_joined {
            let _ = members.insert(
                id.clone(),
                Member {
                    identity: slot.identity.clone(),
                    outbox: slot.transport.outbox().cloned(),
                },
            );
            let _ = state.joined.insert(room);
        }
        Ok(JoinOutcome {
            room,
            member_count: members.len(),
            newly_joined,
        })
    }

    /// Join a room given by its wire name.
    pub fn join_named(&self, room: &str, id: &ConnectionId) -> Result<JoinOutcome> {
        self.join(room.parse()?, id)
    }

    /// Leave `room`. Never fails for non-members or unknown connections.
    pub fn leave(&self, room: RoomName, id: &ConnectionId) -> LeaveOutcome {
        let Some(slot) = self.slot(id) else {
            return LeaveOutcome {
                room,
                was_member: false,
                member_count: self.member_count(room),
                identity: None,
            };
        };
        let mut state = slot.state.lock();
        let mut members = self.rooms.get(room).write();
        let removed = members.remove(id);
        let _ = state.joined.remove(&room);
        LeaveOutcome {
            room,
            was_member: removed.is_some(),
            member_count: members.len(),
            identity: removed.map(|m| m.identity),
        }
    }

    /// Current members of `room`, in connection id order.
    pub fn members(&self, room: RoomName) -> Vec<Identity> {
        self.rooms
            .get(room)
            .read()
            .values()
            .map(|m| m.identity.clone())
            .collect()
    }

    /// Number of members of `room`.
    pub fn member_count(&self, room: RoomName) -> usize {
        self.rooms.get(room).read().len()
    }

    /// Whether `id` is currently a member of `room`.
    pub fn is_member(&self, room: RoomName, id: &ConnectionId) -> bool {
        self.rooms.get(room).read().contains_key(id)
    }

    /// Remove `id` from every room it joined, keeping the connection itself.
    pub fn remove_connection_everywhere(&self, id: &ConnectionId) -> Vec<RoomDeparture> {
        let Some(slot) = self.slot(id) else {
            return Vec::new();
        };
        let mut state = slot.state.lock();
        self.detach(id, &slot.identity, &mut state)
    }

    fn detach(
        &self,
        id: &ConnectionId,
        identity: &Identity,
        state: &mut SlotState,
    ) -> Vec<RoomDeparture> {
        let joined = std::mem::take(&mut state.joined);
        let mut departures = Vec::with_capacity(joined.len());
        for room in joined {
            let mut members = self.rooms.get(room).write();
            if members.remove(id).is_some() {
                departures.push(RoomDeparture {
                    room,
                    identity: identity.clone(),
                    remaining: members.values().map(|m| m.identity.clone()).collect(),
                });
            }
        }
        departures
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of registered connections using `kind`.
    pub fn count_by_transport(&self, kind: TransportKind) -> usize {
        self.slots
            .iter()
            .filter(|s| s.value().transport.kind() == kind)
            .count()
    }

    /// Member count per room.
    pub fn room_counts(&self) -> BTreeMap<RoomName, usize> {
        RoomName::ALL
            .into_iter()
            .map(|room| (room, self.member_count(room)))
            .collect()
    }

    /// Visit every member of `room` while holding the room's read lock.
    pub(crate) fn for_each_member(
        &self,
        room: RoomName,
        mut f: impl FnMut(&ConnectionId, &Member),
    ) {
        for (id, member) in self.rooms.get(room).read().iter() {
            f(id, member);
        }
    }
}

fn not_found(id: &ConnectionId) -> RealtimeError {
    RealtimeError::NotFoundConnection { id: id.clone() }
}
