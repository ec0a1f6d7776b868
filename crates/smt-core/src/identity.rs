//! Verified user identity and the closed role enumeration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Dashboard role carried by an identity token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full access.
    Admin,
    /// Plans and edits the schedule.
    Scheduler,
    /// Floor supervisor, may change work-order status.
    Supervisor,
    /// Read-only floor display kiosk.
    FloorView,
}

impl Role {
    /// Every role, in privilege order.
    pub const ALL: [Role; 4] = [Role::Admin, Role::Scheduler, Role::Supervisor, Role::FloorView];

    /// Wire name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Scheduler => "scheduler",
            Self::Supervisor => "supervisor",
            Self::FloorView => "floor_view",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| s.to_owned())
    }
}

/// Identity derived from a verified credential. Never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user identifier from the user store.
    pub user_id: String,
    /// Display name.
    pub username: String,
    /// Authorized role.
    pub role: Role,
}

impl Identity {
    /// Build an identity.
    pub fn new(user_id: impl Into<String>, username: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            role,
        }
    }
}
