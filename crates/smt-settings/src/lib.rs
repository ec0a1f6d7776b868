//! # smt-settings
//!
//! Configuration management with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`SmtSettings::default()`]
//! 2. **Settings file**: `~/.smt/settings.json`, or the path in
//!    `SMT_SETTINGS_PATH` (deep-merged over defaults)
//! 3. **Environment variables**: `SMT_*` and `PORT` overrides (highest priority)
//!
//! Settings are loaded once at startup and passed down explicitly; there is
//! no global instance.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use smt_core::{Role, RoomName};

    #[test]
    fn re_exports_work() {
        let _settings = SmtSettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = SmtSettings::default();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 5000);
        assert_eq!(settings.server.heartbeat_interval_ms, 30_000);
        assert_eq!(settings.realtime.event_retention, 256);
        assert_eq!(
            settings.realtime.broadcast_rooms,
            vec![RoomName::Timeline, RoomName::FloorDisplay]
        );
        assert_eq!(settings.auth.viewer_roles.len(), 4);
        assert!(!settings.auth.writer_roles.contains(&Role::FloorView));
        assert_eq!(settings.logging.level, "info");
    }
}
