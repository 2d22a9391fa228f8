use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};

pub const BRIDGE_URL: &str = "ws://127.0.0.1:8085/bridge";

/// Consecutive failed health checks before the "not available" alert fires.
/// The counter resets after firing so a long outage alerts once per crossing.
pub const MAX_FAILED_ATTEMPTS: u32 = 3;

/// Re-initialisation attempts per recovery run.
pub const RECOVERY_MAX_ATTEMPTS: u32 = 3;

/// Health poll interval when HEALTH_CHECK_INTERVAL_SECONDS is unset.
pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

/// Zombie reaper cadence and the idle window that marks a ready session as hung.
pub const ZOMBIE_CHECK_INTERVAL_SECS: u64 = 5 * 60;
pub const ZOMBIE_IDLE_THRESHOLD_SECS: u64 = 15 * 60;
pub const ZOMBIE_REINIT_DELAY_SECS: u64 = 5;

/// Upper bound on a single liveness round-trip to the client.
pub const STATE_CHECK_TIMEOUT_SECS: u64 = 10;

/// Delay before retrying initialisation after clearing a stale profile lock.
pub const LOCK_RETRY_DELAY_SECS: u64 = 3;

/// Timeouts for outbound HTTP collaborators.
pub const WEBHOOK_TIMEOUT_SECS: u64 = 15;
pub const PUSH_TIMEOUT_SECS: u64 = 15;
pub const MEDIA_FETCH_TIMEOUT_SECS: u64 = 30;

/// Bridge reconnect backoff values in milliseconds.
pub const RECONNECT_BACKOFF_MS: &[u64] = &[250, 500, 1_000, 2_000, 5_000];

/// Bridge heartbeat ping interval (seconds).
pub const BRIDGE_PING_INTERVAL_SECS: u64 = 30;

/// Initialisation launches a browser, so it gets a far longer budget than
/// ordinary bridge requests.
pub const BRIDGE_INIT_TIMEOUT_SECS: u64 = 120;
pub const BRIDGE_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Channel capacity for client events and bridge commands.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Housekeeping cadences.
pub const SESSION_BACKUP_INTERVAL_SECS: u64 = 10 * 60;
pub const MEMORY_CHECK_INTERVAL_SECS: u64 = 5 * 60;

/// Grace period for destroying the session on shutdown.
pub const SHUTDOWN_GRACE_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    /// Instance identity (BOT_NAME). Shown in every alert.
    pub bot_name: String,
    pub port: u16,
    /// Bearer token required by POST /send (TOKENACCESS).
    pub access_token: String,
    pub log_level: String,
    pub bridge_url: String,
    pub health_interval: Duration,
    /// Message/call envelope webhook (ONMESSAGE).
    pub webhook_url: Option<String>,
    /// "Client down" webhook (ONDOWN).
    pub down_webhook_url: Option<String>,
    pub fcm_device_token: Option<String>,
    pub fcm_credentials_path: PathBuf,
    /// Browser profile directory; holds the SingletonLock file.
    pub session_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub recovery_settle: Duration,
    pub recovery_backoff: Duration,
    pub send_timeout: Duration,
    pub media_batch_pause: Duration,
    pub memory_limit_mb: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| {
            get(key).ok_or_else(|| AppError::Config(format!("{key} is required")))
        };
        let secs = |key: &str, default: u64| {
            Duration::from_secs(get(key).and_then(|v| v.parse::<u64>().ok()).unwrap_or(default))
        };

        let bot_name = require("BOT_NAME")?;
        let port = require("PORT")?
            .parse::<u16>()
            .map_err(|_| AppError::Config("PORT must be a valid port number".to_string()))?;
        let access_token = require("TOKENACCESS")?;

        let health_interval = secs("HEALTH_CHECK_INTERVAL_SECONDS", HEALTH_CHECK_INTERVAL_SECS);
        let session_dir = get("SESSION_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(format!(".wwebjs_auth/session-{bot_name}")));

        Ok(Self {
            port,
            access_token,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            bridge_url: get("WA_BRIDGE_URL").unwrap_or_else(|| BRIDGE_URL.to_string()),
            health_interval: if health_interval.is_zero() {
                Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS)
            } else {
                health_interval
            },
            webhook_url: get("ONMESSAGE"),
            down_webhook_url: get("ONDOWN"),
            fcm_device_token: get("FCM_DEVICE_TOKEN"),
            fcm_credentials_path: get("FCM_CREDENTIALS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("firebase-credentials.json")),
            session_dir,
            backup_dir: get("BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("backups")),
            recovery_settle: secs("RECOVERY_SETTLE_SECS", 2),
            recovery_backoff: secs("RECOVERY_BACKOFF_SECS", 10),
            send_timeout: secs("SEND_TIMEOUT_SECS", 30),
            media_batch_pause: Duration::from_millis(
                get("MEDIA_BATCH_PAUSE_MS")
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1_000),
            ),
            memory_limit_mb: get("MEMORY_LIMIT_MB")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(1024),
            bot_name,
        })
    }

    /// Persisted session file checked for corruption and backed up.
    pub fn session_file(&self) -> PathBuf {
        self.session_dir.join("session.json")
    }

    pub fn backup_file(&self) -> PathBuf {
        self.backup_dir.join("session-backup.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn required_values_and_defaults() {
        let env = vars(&[("BOT_NAME", "soporte"), ("PORT", "3000"), ("TOKENACCESS", "secret")]);
        let cfg = Config::from_vars(|k| env.get(k).cloned()).expect("valid config");
        assert_eq!(cfg.bot_name, "soporte");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.health_interval, Duration::from_secs(30));
        assert_eq!(cfg.recovery_settle, Duration::from_secs(2));
        assert_eq!(cfg.recovery_backoff, Duration::from_secs(10));
        assert_eq!(cfg.media_batch_pause, Duration::from_millis(1_000));
        assert!(cfg.webhook_url.is_none());
        assert!(cfg.fcm_device_token.is_none());
        assert_eq!(cfg.session_dir, PathBuf::from(".wwebjs_auth/session-soporte"));
    }

    #[test]
    fn missing_token_is_fatal() {
        let env = vars(&[("BOT_NAME", "soporte"), ("PORT", "3000")]);
        let err = Config::from_vars(|k| env.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains("TOKENACCESS"), "got {err}");
    }

    #[test]
    fn bad_port_is_fatal() {
        let env = vars(&[("BOT_NAME", "b"), ("PORT", "http"), ("TOKENACCESS", "t")]);
        assert!(Config::from_vars(|k| env.get(k).cloned()).is_err());
    }

    #[test]
    fn blank_optional_values_are_absent() {
        let env = vars(&[
            ("BOT_NAME", "b"),
            ("PORT", "8080"),
            ("TOKENACCESS", "t"),
            ("ONMESSAGE", "  "),
            ("HEALTH_CHECK_INTERVAL_SECONDS", "45"),
        ]);
        let cfg = Config::from_vars(|k| env.get(k).cloned()).unwrap();
        assert!(cfg.webhook_url.is_none());
        assert_eq!(cfg.health_interval, Duration::from_secs(45));
    }
}
