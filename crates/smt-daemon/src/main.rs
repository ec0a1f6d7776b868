//! # smt-daemon
//!
//! Realtime notification server binary: wires settings, logging, metrics,
//! the notification hub and the HTTP server together. Also mints
//! development identity tokens.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use smt_auth::{IdentityVerifier, TokenIssuer};
use smt_core::{Identity, Role};
use smt_realtime::NotificationHub;
use smt_server::config::{ServerConfig, hub_config};
use smt_server::server::SmtServer;
use smt_settings::loader::{apply_env_overrides, parse_bool, read_settings_file};
use smt_settings::{LoggingSettings, SmtSettings};

/// SMT schedule realtime notification server.
#[derive(Parser, Debug)]
#[command(name = "smt-realtime", about = "SMT schedule realtime notification server")]
struct Cli {
    /// Settings file (defaults to `~/.smt/settings.json` or `SMT_SETTINGS_PATH`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server until ctrl-c.
    Serve {
        /// Host to bind (overrides settings).
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides settings, 0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,

        /// Log level filter (overrides settings; `RUST_LOG` still wins).
        #[arg(long)]
        log_level: Option<String>,
    },
    /// Print a signed identity token for development clients.
    IssueToken {
        /// Stable user id.
        #[arg(long)]
        user_id: String,

        /// Display name.
        #[arg(long)]
        username: String,

        /// Role: admin, scheduler, supervisor or `floor_view`.
        #[arg(long, default_value = "scheduler")]
        role: Role,

        /// Lifetime in seconds (defaults to `auth.tokenTtlSecs`).
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
}

/// Defaults merged with the settings file. Env overrides come later, once
/// logging is up to report invalid values.
fn load_file(path: Option<&Path>) -> Result<SmtSettings> {
    let path = path.map_or_else(smt_settings::settings_path, Path::to_path_buf);
    read_settings_file(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

/// Effective log level and format: `--log-level`, then `SMT_LOG_LEVEL` and
/// `SMT_LOG_JSON`, then the settings file.
fn log_options(
    flag: Option<&str>,
    file: &LoggingSettings,
    env_level: Option<String>,
    env_json: Option<String>,
) -> (String, bool) {
    let level = flag
        .map(str::to_owned)
        .or(env_level.filter(|v| !v.is_empty()))
        .unwrap_or_else(|| file.level.clone());
    let json = env_json.as_deref().and_then(parse_bool).unwrap_or(file.json);
    (level, json)
}

fn apply_overrides(settings: &mut SmtSettings, host: Option<String>, port: Option<u16>) {
    if let Some(host) = host {
        settings.server.host = host;
    }
    if let Some(port) = port {
        settings.server.port = port;
    }
}

async fn serve(settings: SmtSettings) -> Result<()> {
    settings.validate().context("Invalid settings")?;

    let metrics_handle = match smt_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let hub = Arc::new(NotificationHub::new(&hub_config(&settings)));
    let reaper = hub.start();

    let verifier = IdentityVerifier::new(
        settings.auth.jwt_secret.as_bytes(),
        settings.auth.leeway_secs,
    );
    let server = SmtServer::new(
        ServerConfig::from_settings(&settings),
        hub.clone(),
        verifier,
        metrics_handle,
    );
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(%addr, "smt realtime server ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    hub.shutdown();
    let mut handles = vec![handle];
    handles.extend(reaper);
    server.shutdown().graceful_shutdown(handles, None).await;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn issue_token(
    settings: &SmtSettings,
    user_id: String,
    username: String,
    role: Role,
    ttl_secs: Option<u64>,
) -> Result<String> {
    let issuer = TokenIssuer::new(settings.auth.jwt_secret.as_bytes())
        .context("Cannot issue tokens (set SMT_JWT_SECRET)")?;
    let ttl = Duration::from_secs(ttl_secs.unwrap_or(settings.auth.token_ttl_secs));
    issuer
        .issue(&Identity::new(user_id, username, role), ttl)
        .context("Failed to sign token")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_file(cli.settings.as_deref())?;

    let flag = match &cli.command {
        Command::Serve { log_level, .. } => log_level.as_deref(),
        Command::IssueToken { .. } => None,
    };
    let (level, json) = log_options(
        flag,
        &settings.logging,
        std::env::var("SMT_LOG_LEVEL").ok(),
        std::env::var("SMT_LOG_JSON").ok(),
    );
    smt_core::logging::init_subscriber(&level, json);
    apply_env_overrides(&mut settings);
    settings.logging.level = level;
    settings.logging.json = json;

    match cli.command {
        Command::Serve { host, port, .. } => {
            apply_overrides(&mut settings, host, port);
            serve(settings).await
        }
        Command::IssueToken {
            user_id,
            username,
            role,
            ttl_secs,
        } => {
            let token = issue_token(&settings, user_id, username, role, ttl_secs)?;
            println!("{token}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_serve_defaults() {
        let cli = Cli::parse_from(["smt-realtime", "serve"]);
        assert!(cli.settings.is_none());
        match cli.command {
            Command::Serve {
                host,
                port,
                log_level,
            } => {
                assert!(host.is_none());
                assert!(port.is_none());
                assert!(log_level.is_none());
            }
            Command::IssueToken { .. } => panic!("expected serve"),
        }
    }

    #[test]
    fn cli_serve_overrides() {
        let cli = Cli::parse_from([
            "smt-realtime",
            "serve",
            "--host",
            "127.0.0.1",
            "--port",
            "8080",
            "--log-level",
            "debug",
        ]);
        match cli.command {
            Command::Serve {
                host,
                port,
                log_level,
            } => {
                assert_eq!(host.as_deref(), Some("127.0.0.1"));
                assert_eq!(port, Some(8080));
                assert_eq!(log_level.as_deref(), Some("debug"));
            }
            Command::IssueToken { .. } => panic!("expected serve"),
        }
    }

    #[test]
    fn cli_global_settings_after_subcommand() {
        let cli = Cli::parse_from(["smt-realtime", "serve", "--settings", "/tmp/s.json"]);
        assert_eq!(cli.settings, Some(PathBuf::from("/tmp/s.json")));
    }

    #[test]
    fn cli_issue_token_parses_role() {
        let cli = Cli::parse_from([
            "smt-realtime",
            "issue-token",
            "--user-id",
            "7",
            "--username",
            "kiosk",
            "--role",
            "floor_view",
        ]);
        match cli.command {
            Command::IssueToken { role, ttl_secs, .. } => {
                assert_eq!(role, Role::FloorView);
                assert!(ttl_secs.is_none());
            }
            Command::Serve { .. } => panic!("expected issue-token"),
        }
    }

    #[test]
    fn cli_rejects_unknown_role() {
        let result = Cli::try_parse_from([
            "smt-realtime",
            "issue-token",
            "--user-id",
            "7",
            "--username",
            "x",
            "--role",
            "janitor",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn overrides_replace_settings() {
        let mut settings = SmtSettings::default();
        apply_overrides(&mut settings, Some("10.0.0.1".into()), Some(9000));
        assert_eq!(settings.server.host, "10.0.0.1");
        assert_eq!(settings.server.port, 9000);

        apply_overrides(&mut settings, None, None);
        assert_eq!(settings.server.port, 9000);
    }

    #[test]
    fn load_reads_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"auth":{"jwtSecret":"from-file"}}"#).unwrap();
        let settings = load_file(Some(&path)).unwrap();
        assert!(!settings.auth.jwt_secret.is_empty());
    }

    #[test]
    fn load_rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load_file(Some(&path)).is_err());
    }

    #[test]
    fn log_flag_beats_env_and_file() {
        let file = LoggingSettings {
            level: "warn".into(),
            json: true,
        };
        let (level, json) = log_options(Some("trace"), &file, Some("debug".into()), None);
        assert_eq!(level, "trace");
        assert!(json);
    }

    #[test]
    fn log_env_beats_file() {
        let file = LoggingSettings::default();
        let (level, json) =
            log_options(None, &file, Some("debug".into()), Some("yes".into()));
        assert_eq!(level, "debug");
        assert!(json);
    }

    #[test]
    fn log_falls_back_to_file_on_empty_or_invalid_env() {
        let file = LoggingSettings {
            level: "warn".into(),
            json: false,
        };
        let (level, json) = log_options(None, &file, Some(String::new()), Some("maybe".into()));
        assert_eq!(level, "warn");
        assert!(!json);
    }

    #[test]
    fn issued_token_verifies() {
        let mut settings = SmtSettings::default();
        settings.auth.jwt_secret = "daemon-test-secret".into();
        let token =
            issue_token(&settings, "7".into(), "kiosk".into(), Role::FloorView, Some(60)).unwrap();
        let verified = IdentityVerifier::new(b"daemon-test-secret", 0)
            .verify(&token)
            .unwrap();
        assert_eq!(verified.identity.username, "kiosk");
        assert_eq!(verified.identity.role, Role::FloorView);
    }

    #[test]
    fn issue_token_requires_secret() {
        let settings = SmtSettings::default();
        let result = issue_token(&settings, "7".into(), "x".into(), Role::Admin, None);
        assert!(result.is_err());
    }
}
