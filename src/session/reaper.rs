use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{ZOMBIE_CHECK_INTERVAL_SECS, ZOMBIE_IDLE_THRESHOLD_SECS, ZOMBIE_REINIT_DELAY_SECS};
use crate::session::handle::ConnectionHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    NotReady,
    Fresh,
    Reaped,
}

/// Hard-restarts a session that claims to be ready but has done nothing
/// successful for too long. Bypasses the recovery sequencer: the session is
/// known bad, so there is nothing to re-check first.
pub struct ZombieReaper {
    handle: Arc<ConnectionHandle>,
    check_interval: Duration,
    idle_threshold: Duration,
    reinit_delay: Duration,
}

impl ZombieReaper {
    pub fn new(handle: Arc<ConnectionHandle>) -> Self {
        Self {
            handle,
            check_interval: Duration::from_secs(ZOMBIE_CHECK_INTERVAL_SECS),
            idle_threshold: Duration::from_secs(ZOMBIE_IDLE_THRESHOLD_SECS),
            reinit_delay: Duration::from_secs(ZOMBIE_REINIT_DELAY_SECS),
        }
    }

    pub async fn run(self) {
        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    pub async fn tick(&self) -> ReapOutcome {
        let state = self.handle.state();
        if !state.is_ready() {
            return ReapOutcome::NotReady;
        }

        let idle = state.idle_for();
        if idle <= self.idle_threshold {
            debug!("[ZOMBIE] last successful operation {}s ago", idle.as_secs());
            return ReapOutcome::Fresh;
        }

        warn!(
            "[ZOMBIE] client reports ready but idle for {}s, forcing destroy and re-init",
            idle.as_secs()
        );
        self.handle.destroy().await;
        state.mark_not_ready();

        let handle = Arc::clone(&self.handle);
        let delay = self.reinit_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match handle.initialize().await {
                Ok(()) => info!("[ZOMBIE] client re-initialised"),
                Err(e) => error!("[ZOMBIE] re-initialisation failed: {e}"),
            }
        });
        ReapOutcome::Reaped
    }
}
