//! # smt-core
//!
//! Foundation types shared by every crate of the SMT schedule realtime service.
//!
//! - **Connection IDs**: [`ConnectionId`] newtype, unique per client attachment
//! - **Identity**: [`Identity`] and the closed [`Role`] enumeration
//! - **Rooms**: the closed [`RoomName`] enumeration
//! - **Errors**: [`RealtimeError`] taxonomy with stable wire codes
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` subscriber

#![deny(unsafe_code)]

pub mod errors;
pub mod identity;
pub mod ids;
pub mod logging;
pub mod rooms;

pub use errors::{RealtimeError, Result};
pub use identity::{Identity, Role};
pub use ids::ConnectionId;
pub use rooms::RoomName;
