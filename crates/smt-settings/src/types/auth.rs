//! Identity token settings.

use serde::{Deserialize, Serialize};
use smt_core::Role;

/// Identity token verification settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HMAC secret shared with the dashboard's login endpoint.
    pub jwt_secret: String,
    /// Clock skew tolerated on `exp`, in seconds.
    pub leeway_secs: u64,
    /// Roles allowed to connect and view presence.
    pub viewer_roles: Vec<Role>,
    /// Roles allowed to trigger status-change notifications.
    pub writer_roles: Vec<Role>,
    /// Lifetime of tokens minted by the development issuer, in seconds.
    pub token_ttl_secs: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            leeway_secs: 0,
            viewer_roles: Role::ALL.to_vec(),
            writer_roles: vec![Role::Admin, Role::Scheduler, Role::Supervisor],
            token_ttl_secs: 8 * 60 * 60,
        }
    }
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("jwt_secret", &"<redacted>")
            .field("leeway_secs", &self.leeway_secs)
            .field("viewer_roles", &self.viewer_roles)
            .field("writer_roles", &self.writer_roles)
            .field("token_ttl_secs", &self.token_ttl_secs)
            .finish()
    }
}
