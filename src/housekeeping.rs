//! Periodic upkeep that runs beside the session: credential backups, the
//! memory ceiling, and the startup preflight.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{Config, MEMORY_CHECK_INTERVAL_SECS, SESSION_BACKUP_INTERVAL_SECS};
use crate::error::{AppError, Result};
use crate::faults::FaultReporter;
use crate::session::ProfileLock;

const PREFLIGHT_PROBE_TIMEOUT_SECS: u64 = 2;

// ---------------------------------------------------------------------------
// Session backup
// ---------------------------------------------------------------------------

pub struct SessionBackup {
    session_file: PathBuf,
    backup_file: PathBuf,
    interval: Duration,
}

impl SessionBackup {
    pub fn new(cfg: &Config) -> Self {
        Self {
            session_file: cfg.session_file(),
            backup_file: cfg.backup_file(),
            interval: Duration::from_secs(SESSION_BACKUP_INTERVAL_SECS),
        }
    }

    /// Replace an unparsable session file with the last backup. Returns true
    /// when a restore happened.
    pub async fn restore_if_corrupt(&self) -> Result<bool> {
        let raw = match tokio::fs::read(&self.session_file).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if serde_json::from_slice::<serde_json::Value>(&raw).is_ok() {
            return Ok(false);
        }

        warn!("session file {} is corrupt, restoring backup", self.session_file.display());
        if !tokio::fs::try_exists(&self.backup_file).await? {
            error!("no session backup available at {}", self.backup_file.display());
            return Ok(false);
        }
        tokio::fs::copy(&self.backup_file, &self.session_file).await?;
        info!("session restored from {}", self.backup_file.display());
        Ok(true)
    }

    /// Returns false when there is no session file yet.
    pub async fn backup(&self) -> Result<bool> {
        if !tokio::fs::try_exists(&self.session_file).await? {
            return Ok(false);
        }
        if let Some(dir) = self.backup_file.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::copy(&self.session_file, &self.backup_file).await?;
        Ok(true)
    }

    pub async fn run(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match self.backup().await {
                Ok(true) => info!("session backup written to {}", self.backup_file.display()),
                Ok(false) => debug!("no session file to back up"),
                Err(e) => error!("session backup failed: {e}"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Memory monitor
// ---------------------------------------------------------------------------

pub struct MemoryMonitor {
    limit_mb: u64,
    reporter: FaultReporter,
    interval: Duration,
}

impl MemoryMonitor {
    pub fn new(limit_mb: u64, reporter: FaultReporter) -> Self {
        Self {
            limit_mb,
            reporter,
            interval: Duration::from_secs(MEMORY_CHECK_INTERVAL_SECS),
        }
    }

    pub async fn run(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match read_rss_mb().await {
                Some(rss) => {
                    self.check(rss);
                }
                None => debug!("RSS unavailable on this platform"),
            }
        }
    }

    /// Returns true when the ceiling was exceeded and a fault was reported.
    pub fn check(&self, rss_mb: u64) -> bool {
        info!(rss_mb, limit_mb = self.limit_mb, "memory report");
        if rss_mb <= self.limit_mb {
            return false;
        }
        error!("RSS {rss_mb}MB exceeds {}MB limit", self.limit_mb);
        self.reporter.report(
            "memory",
            format!("out of memory: RSS {rss_mb}MB exceeds {}MB limit", self.limit_mb),
        );
        true
    }
}

/// Parse `VmRSS` (kB) out of `/proc/self/status` into megabytes.
pub fn parse_vm_rss_mb(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb / 1024)
}

async fn read_rss_mb() -> Option<u64> {
    let status = tokio::fs::read_to_string("/proc/self/status").await.ok()?;
    parse_vm_rss_mb(&status)
}

// ---------------------------------------------------------------------------
// Preflight
// ---------------------------------------------------------------------------

/// Refuse to start beside a live instance, then clear whatever a crashed
/// predecessor left holding the browser profile.
pub async fn preflight(cfg: &Config) -> Result<()> {
    let url = format!("http://127.0.0.1:{}/test", cfg.port);
    info!("[BOOT] checking for another instance at {url}");
    if instance_responds(&url).await {
        return Err(AppError::Startup(format!(
            "another instance is already answering on port {}",
            cfg.port
        )));
    }

    let lock = ProfileLock::new(&cfg.session_dir);
    if lock.is_held() {
        warn!("[BOOT] stale SingletonLock found in {}", cfg.session_dir.display());
    }
    lock.clear_stale().await;
    Ok(())
}

pub async fn instance_responds(url: &str) -> bool {
    let probe = reqwest::Client::new()
        .get(url)
        .timeout(Duration::from_secs(PREFLIGHT_PROBE_TIMEOUT_SECS))
        .send()
        .await;
    match probe {
        Ok(resp) => resp.status() == reqwest::StatusCode::OK,
        Err(e) => {
            debug!("[BOOT] no instance answered: {e}");
            false
        }
    }
}
