pub mod dispatcher;
pub mod errors;
pub mod handle;
pub mod health;
pub mod profile_lock;
pub mod reaper;
pub mod recovery;
pub mod send_gate;
pub mod state;

use std::sync::Arc;

use crate::api::latency::LatencyStats;
use crate::client::SessionClient;
use crate::config::{Config, MAX_FAILED_ATTEMPTS};
use crate::notify::{Alerter, Webhook};

pub use dispatcher::EventDispatcher;
pub use handle::ConnectionHandle;
pub use health::HealthMonitor;
pub use profile_lock::ProfileLock;
pub use reaper::ZombieReaper;
pub use recovery::{RecoveryPolicy, RecoverySequencer};
pub use send_gate::{SendError, SendGate, SendRequest};
pub use state::{HealthCounter, SessionState};

/// The one session this process owns, plus the components that share it.
/// Built once in `main`; every background task gets its parts from here.
pub struct Session {
    pub state: Arc<SessionState>,
    pub handle: Arc<ConnectionHandle>,
    pub counter: Arc<HealthCounter>,
    pub recovery: Arc<RecoverySequencer>,
    pub alerter: Alerter,
}

impl Session {
    pub fn new(
        client: Arc<dyn SessionClient>,
        state: Arc<SessionState>,
        cfg: &Config,
        alerter: Alerter,
    ) -> Self {
        let handle = Arc::new(ConnectionHandle::new(
            client,
            Arc::clone(&state),
            ProfileLock::new(&cfg.session_dir),
            cfg.send_timeout,
        ));
        let recovery = Arc::new(RecoverySequencer::new(
            Arc::clone(&handle),
            alerter.clone(),
            RecoveryPolicy::from_config(cfg),
        ));
        Self {
            state,
            handle,
            counter: Arc::new(HealthCounter::new(MAX_FAILED_ATTEMPTS)),
            recovery,
            alerter,
        }
    }

    pub fn dispatcher(&self, webhook: Arc<dyn Webhook>) -> Arc<EventDispatcher> {
        EventDispatcher::new(Arc::clone(&self.handle), webhook, self.alerter.clone())
    }

    pub fn health_monitor(&self, cfg: &Config) -> HealthMonitor {
        HealthMonitor::new(
            Arc::clone(&self.handle),
            Arc::clone(&self.counter),
            Arc::clone(&self.recovery),
            self.alerter.clone(),
            cfg.health_interval,
        )
    }

    pub fn reaper(&self) -> ZombieReaper {
        ZombieReaper::new(Arc::clone(&self.handle))
    }

    pub fn send_gate(&self, latency: Arc<LatencyStats>, cfg: &Config) -> SendGate {
        SendGate::new(
            Arc::clone(&self.handle),
            Arc::clone(&self.recovery),
            latency,
            cfg.media_batch_pause,
        )
    }
}
