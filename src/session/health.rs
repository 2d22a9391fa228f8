use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::notify::Alerter;
use crate::session::handle::{ConnectionHandle, ConnectionStatus};
use crate::session::recovery::{RecoveryOutcome, RecoverySequencer};
use crate::session::state::HealthCounter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Never paired; polling now would only trigger spurious recovery.
    Skipped,
    Healthy,
    Unhealthy { failures: u32, recovery: RecoveryOutcome },
}

/// Periodic liveness poll, independent of the cached ready flag.
pub struct HealthMonitor {
    handle: Arc<ConnectionHandle>,
    counter: Arc<HealthCounter>,
    recovery: Arc<RecoverySequencer>,
    alerter: Alerter,
    interval: Duration,
    was_down: AtomicBool,
}

impl HealthMonitor {
    pub fn new(
        handle: Arc<ConnectionHandle>,
        counter: Arc<HealthCounter>,
        recovery: Arc<RecoverySequencer>,
        alerter: Alerter,
        interval: Duration,
    ) -> Self {
        Self {
            handle,
            counter,
            recovery,
            alerter,
            interval,
            was_down: AtomicBool::new(false),
        }
    }

    pub async fn run(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // first tick is immediate; the client is still starting
        info!("[HEALTH] monitor started (every {:?})", self.interval);

        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    pub async fn tick(&self) -> TickOutcome {
        if !self.handle.state().was_ever_ready() {
            debug!("[HEALTH] skipped: waiting for first pairing");
            return TickOutcome::Skipped;
        }

        let status = self.handle.connection_state().await;
        if status == ConnectionStatus::Connected {
            self.counter.record_success();
            if self.was_down.swap(false, Ordering::SeqCst) {
                info!("[HEALTH] client is healthy again");
            }
            return TickOutcome::Healthy;
        }

        self.was_down.store(true, Ordering::SeqCst);
        let tally = self.counter.record_failure();
        warn!(failures = tally.failures, "[HEALTH] client not available: {status:?}");
        if tally.crossed {
            self.alerter.health_degraded(tally.failures).await;
        }

        let recovery = self.recovery.recover("health check").await;
        TickOutcome::Unhealthy {
            failures: tally.failures,
            recovery,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_FAILED_ATTEMPTS;
    use crate::notify::{TITLE_AUTH_FAILURE, TITLE_UNAVAILABLE};
    use crate::session::dispatcher::EventDispatcher;
    use crate::session::profile_lock::ProfileLock;
    use crate::session::recovery::RecoveryPolicy;
    use crate::testing::{FakeClient, RecordingPush, RecordingWebhook};

    fn monitor(client: &Arc<FakeClient>) -> (HealthMonitor, Arc<RecordingPush>) {
        let push = RecordingPush::new();
        let alerter = Alerter::new(push.clone(), RecordingWebhook::new());
        let handle = Arc::new(ConnectionHandle::new(
            client.clone(),
            client.state(),
            ProfileLock::new(std::env::temp_dir().join("wa-gateway-health-test")),
            Duration::from_secs(30),
        ));
        let recovery = Arc::new(RecoverySequencer::new(
            Arc::clone(&handle),
            alerter.clone(),
            RecoveryPolicy {
                max_attempts: 1,
                settle: Duration::from_secs(2),
                backoff: Duration::from_secs(10),
            },
        ));
        let monitor = HealthMonitor::new(
            handle,
            Arc::new(HealthCounter::new(MAX_FAILED_ATTEMPTS)),
            recovery,
            alerter,
            Duration::from_secs(30),
        );
        (monitor, push)
    }

    #[tokio::test(start_paused = true)]
    async fn skips_until_first_pairing() {
        let client = FakeClient::new();
        let (monitor, _) = monitor(&client);
        assert_eq!(monitor.tick().await, TickOutcome::Skipped);
        assert_eq!(client.state_checks(), 0);
        assert_eq!(client.initialize_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_ticks_never_recover() {
        let client = FakeClient::new();
        client.state().mark_ready();
        let (monitor, push) = monitor(&client);

        for _ in 0..10 {
            assert_eq!(monitor.tick().await, TickOutcome::Healthy);
        }
        assert_eq!(client.initialize_calls(), 0);
        assert!(push.titles().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn every_failure_recovers_but_alert_fires_per_crossing() {
        let client = FakeClient::new();
        client.state().mark_ready();
        client.set_remote_state("CONFLICT");
        let (monitor, push) = monitor(&client);

        let mut failures = Vec::new();
        for _ in 0..6 {
            match monitor.tick().await {
                TickOutcome::Unhealthy { failures: n, .. } => failures.push(n),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(failures, vec![1, 2, 3, 1, 2, 3]);
        assert_eq!(push.count(TITLE_UNAVAILABLE), 2);
        // One attempt per run, one run per failed tick.
        assert_eq!(client.initialize_calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_counter() {
        let client = FakeClient::new();
        client.state().mark_ready();
        client.set_remote_state("OPENING");
        let (monitor, _) = monitor(&client);

        assert!(matches!(monitor.tick().await, TickOutcome::Unhealthy { failures: 1, .. }));
        // A later ready event from the client.
        client.set_remote_state("CONNECTED");
        client.state().mark_ready();
        assert_eq!(monitor.tick().await, TickOutcome::Healthy);
        assert_eq!(monitor.counter.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_still_gets_recovered() {
        let client = FakeClient::new();
        client.state().mark_ready();
        client.become_ready_on_init();
        let (monitor, push) = monitor(&client);
        let dispatcher = EventDispatcher::new(
            Arc::clone(&monitor.handle),
            RecordingWebhook::new(),
            monitor.alerter.clone(),
        );

        dispatcher.on_auth_failure("invalid session");
        assert!(!client.state().is_ready());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(push.count(TITLE_AUTH_FAILURE), 1);

        let outcome = monitor.tick().await;
        assert_eq!(
            outcome,
            TickOutcome::Unhealthy {
                failures: 1,
                recovery: RecoveryOutcome::Recovered { attempts: 1 },
            }
        );
        assert_eq!(client.initialize_calls(), 1);
        assert!(client.state().is_ready());
        assert_eq!(push.count(TITLE_AUTH_FAILURE), 1);
    }
}
