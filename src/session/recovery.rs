use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::{Config, RECOVERY_MAX_ATTEMPTS};
use crate::notify::Alerter;
use crate::session::errors::SessionError;
use crate::session::handle::ConnectionHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    pub max_attempts: u32,
    /// Wait after each `initialize()` before re-checking liveness.
    pub settle: Duration,
    /// Wait between failed attempts. Fixed, not exponential.
    pub backoff: Duration,
}

impl RecoveryPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_attempts: RECOVERY_MAX_ATTEMPTS,
            settle: cfg.recovery_settle,
            backoff: cfg.recovery_backoff,
        }
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RECOVERY_MAX_ATTEMPTS,
            settle: Duration::from_secs(2),
            backoff: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Live again after `attempts` calls to `initialize()`; zero means the
    /// session had already come back on its own.
    Recovered { attempts: u32 },
    Exhausted,
    /// Another run holds the guard; this request was dropped.
    AlreadyRunning,
    /// Never paired; there is nothing to recover yet.
    AwaitingPairing,
}

#[derive(Debug)]
pub enum RestartOutcome {
    Restarted,
    Failed(SessionError),
    /// A recovery run owns the session; the restart was skipped.
    AlreadyRunning,
}

/// Releases the single-flight flag when the run ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Bounded re-initialisation. At most one run is in flight process-wide;
/// concurrent requests return `AlreadyRunning` without queuing.
pub struct RecoverySequencer {
    handle: Arc<ConnectionHandle>,
    alerter: Alerter,
    policy: RecoveryPolicy,
    in_flight: AtomicBool,
}

impl RecoverySequencer {
    pub fn new(handle: Arc<ConnectionHandle>, alerter: Alerter, policy: RecoveryPolicy) -> Self {
        Self {
            handle,
            alerter,
            policy,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn in_progress(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn policy(&self) -> RecoveryPolicy {
        self.policy
    }

    pub async fn recover(&self, trigger: &str) -> RecoveryOutcome {
        if !self.handle.state().was_ever_ready() {
            info!("[RECOVERY] skipped ({trigger}): session has never been paired");
            return RecoveryOutcome::AwaitingPairing;
        }
        let Some(_guard) = self.claim(trigger) else {
            return RecoveryOutcome::AlreadyRunning;
        };

        let max = self.policy.max_attempts;
        warn!("[RECOVERY] starting (trigger: {trigger}, max attempts: {max})");

        for attempt in 1..=max {
            if self.handle.is_live().await {
                info!(attempt, "[RECOVERY] session already live, aborting run");
                return RecoveryOutcome::Recovered { attempts: attempt - 1 };
            }

            info!(attempt, "[RECOVERY] re-initialising client ({attempt}/{max})");
            if let Err(e) = self.handle.initialize().await {
                error!(attempt, "[RECOVERY] initialize failed: {e}");
            }
            tokio::time::sleep(self.policy.settle).await;

            if self.handle.is_live().await {
                info!(attempt, "[RECOVERY] session recovered");
                return RecoveryOutcome::Recovered { attempts: attempt };
            }

            if attempt < max {
                warn!(attempt, "[RECOVERY] still down, next attempt in {:?}", self.policy.backoff);
                tokio::time::sleep(self.policy.backoff).await;
            }
        }

        error!("[RECOVERY] exhausted after {max} attempts");
        self.alerter.recovery_exhausted(max).await;
        RecoveryOutcome::Exhausted
    }

    /// Unconditional destroy + initialize, holding the same claim as
    /// `recover` so the two never overlap.
    pub async fn restart(&self, trigger: &str) -> RestartOutcome {
        let Some(_guard) = self.claim(trigger) else {
            return RestartOutcome::AlreadyRunning;
        };
        warn!("[RECOVERY] restarting session (trigger: {trigger})");
        self.handle.destroy().await;
        self.handle.state().mark_not_ready();
        match self.handle.initialize().await {
            Ok(()) => RestartOutcome::Restarted,
            Err(e) => {
                error!("[RECOVERY] restart failed: {e}");
                RestartOutcome::Failed(e)
            }
        }
    }

    fn claim(&self, trigger: &str) -> Option<InFlight<'_>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("[RECOVERY] already in progress, ignoring request from {trigger}");
            return None;
        }
        Some(InFlight(&self.in_flight))
    }

    /// Fire-and-forget variant for callers that must not wait on a run.
    pub fn spawn_recover(self: &Arc<Self>, trigger: &'static str) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.recover(trigger).await;
        });
    }
}
