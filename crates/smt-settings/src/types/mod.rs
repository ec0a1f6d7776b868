//! Settings types.

mod auth;
mod server;

pub use auth::AuthSettings;
pub use server::{RealtimeSettings, ServerSettings};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object (`~/.smt/settings.json`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SmtSettings {
    /// HTTP listener and connection limits.
    pub server: ServerSettings,
    /// Event queue and broadcast settings.
    pub realtime: RealtimeSettings,
    /// Identity token verification.
    pub auth: AuthSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl SmtSettings {
    /// Reject settings the server cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.is_empty() {
            return Err(SettingsError::InvalidValue(
                "auth.jwtSecret is empty (set SMT_JWT_SECRET)".into(),
            ));
        }
        if self.server.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalMs must be positive".into(),
            ));
        }
        if self.server.heartbeat_timeout_ms == 0
            || self.server.heartbeat_timeout_ms > self.server.heartbeat_interval_ms
        {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatTimeoutMs must be positive and at most one heartbeat interval"
                    .into(),
            ));
        }
        if self.realtime.event_retention == 0 {
            return Err(SettingsError::InvalidValue(
                "realtime.eventRetention must be positive".into(),
            ));
        }
        if self.auth.viewer_roles.is_empty() {
            return Err(SettingsError::InvalidValue(
                "auth.viewerRoles must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> SmtSettings {
        let mut s = SmtSettings::default();
        s.auth.jwt_secret = "secret".into();
        s
    }

    #[test]
    fn default_secret_fails_validation() {
        let err = SmtSettings::default().validate().unwrap_err();
        assert!(err.to_string().contains("jwtSecret"));
    }

    #[test]
    fn configured_secret_passes_validation() {
        valid().validate().unwrap();
    }

    #[test]
    fn timeout_longer_than_interval_rejected() {
        let mut s = valid();
        s.server.heartbeat_timeout_ms = s.server.heartbeat_interval_ms + 1;
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("heartbeatTimeoutMs"));
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut s = valid();
        s.server.heartbeat_timeout_ms = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn timeout_equal_to_interval_accepted() {
        let mut s = valid();
        s.server.heartbeat_interval_ms = 100;
        s.server.heartbeat_timeout_ms = 100;
        s.validate().unwrap();
    }

    #[test]
    fn zero_retention_rejected() {
        let mut s = valid();
        s.realtime.event_retention = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn empty_viewer_roles_rejected() {
        let mut s = valid();
        s.auth.viewer_roles.clear();
        assert!(s.validate().is_err());
    }

    #[test]
    fn serializes_camel_case() {
        let v = serde_json::to_value(SmtSettings::default()).unwrap();
        assert!(v["server"]["heartbeatIntervalMs"].is_number());
        assert!(v["realtime"]["eventRetention"].is_number());
        assert!(v["auth"]["viewerRoles"].is_array());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: SmtSettings = serde_json::from_str(r#"{"server":{"port":9000}}"#).unwrap();
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.logging.level, "info");
    }
}
