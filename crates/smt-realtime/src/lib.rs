//! # smt-realtime
//!
//! The realtime notification subsystem, independent of any HTTP framework.
//!
//! - [`registry::PresenceRegistry`]: who is connected and which rooms they joined,
//!   kept consistent by atomic compound operations
//! - [`queue::EventQueue`]: fan-out queue drained by pull (SSE) consumers, each
//!   with a private cursor
//! - [`broadcast::RoomBroadcaster`]: producer-driven delivery to room members'
//!   outboxes
//! - [`composer::NotificationComposer`]: the only constructor of
//!   [`event::NotificationEvent`], delivering each event to every registered sink
//! - [`hub::NotificationHub`]: the service object owning all of the above, with
//!   a start/shutdown lifecycle

#![deny(unsafe_code)]

pub mod broadcast;
pub mod composer;
pub mod connection;
pub mod event;
pub mod hub;
pub mod messages;
pub mod queue;
pub mod registry;

pub use broadcast::{BroadcastReport, RoomBroadcaster};
pub use composer::{NotificationComposer, NotificationSink, Notified, QueueSink, RoomSink, SinkError};
pub use connection::{ClientConnection, DeliveryError};
pub use event::{NotificationEvent, StatusChange, WorkOrderSubject};
pub use hub::{DisconnectReason, HubConfig, NotificationHub, UiAction};
pub use messages::ServerMessage;
pub use queue::{CursorRead, EventCursor, EventQueue};
pub use registry::{
    Attachment, Connection, Disconnection, JoinOutcome, LeaveOutcome, PresenceRegistry,
    RoomDeparture, Transport, TransportKind,
};
