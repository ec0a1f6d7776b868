//! Closed enumeration of logical rooms.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::RealtimeError;

/// A named logical channel. Rooms are fixed; clients cannot create new ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomName {
    /// Scheduler timeline dashboards.
    Timeline,
    /// Shop-floor display kiosks.
    FloorDisplay,
}

impl RoomName {
    /// Every room.
    pub const ALL: [RoomName; 2] = [RoomName::Timeline, RoomName::FloorDisplay];

    /// Wire name of the room.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeline => "timeline",
            Self::FloorDisplay => "floor_display",
        }
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomName {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| RealtimeError::InvalidRoom { room: s.to_owned() })
    }
}
