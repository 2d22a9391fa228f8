//! Process-wide connection state. There is one session per process; the
//! gateway builds exactly one `SessionState` in `main` and hands `Arc`s to
//! every component.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

pub struct SessionState {
    /// True between a ready event and the next observed failure.
    is_ready: AtomicBool,
    /// Set on the first ready event, never cleared. Before that the gateway is
    /// awaiting pairing, not down.
    was_ever_ready: AtomicBool,
    /// Whether the current down period has already been alerted.
    down_alerted: AtomicBool,
    last_successful_op: Mutex<Instant>,
}

impl SessionState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            is_ready: AtomicBool::new(false),
            was_ever_ready: AtomicBool::new(false),
            down_alerted: AtomicBool::new(false),
            last_successful_op: Mutex::new(Instant::now()),
        })
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready.load(Ordering::SeqCst)
    }

    pub fn was_ever_ready(&self) -> bool {
        self.was_ever_ready.load(Ordering::SeqCst)
    }

    pub fn mark_ready(&self) {
        self.was_ever_ready.store(true, Ordering::SeqCst);
        self.is_ready.store(true, Ordering::SeqCst);
        self.down_alerted.store(false, Ordering::SeqCst);
        self.touch();
    }

    /// Returns whether the session was ready before this call.
    pub fn mark_not_ready(&self) -> bool {
        self.is_ready.swap(false, Ordering::SeqCst)
    }

    /// Claims the single down alert for the current outage. Only the first
    /// caller after a ready transition gets `true`.
    pub fn claim_down_alert(&self) -> bool {
        !self.down_alerted.swap(true, Ordering::SeqCst)
    }

    /// Record a successful operation (forwarded event, send, or state poll).
    pub fn touch(&self) {
        if let Ok(mut at) = self.last_successful_op.lock() {
            *at = Instant::now();
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.last_successful_op
            .lock()
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }
}

/// Consecutive failed health checks.
pub struct HealthCounter {
    consecutive_failures: AtomicU32,
    threshold: u32,
}

/// Result of recording one failed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureTally {
    pub failures: u32,
    /// True exactly when this failure crossed the threshold; the counter has
    /// been reset.
    pub crossed: bool,
}

impl HealthCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            threshold: threshold.max(1),
        }
    }

    pub fn record_failure(&self) -> FailureTally {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.threshold {
            self.consecutive_failures.store(0, Ordering::SeqCst);
            FailureTally { failures, crossed: true }
        } else {
            FailureTally { failures, crossed: false }
        }
    }

    /// Returns the failure count that was cleared.
    pub fn record_success(&self) -> u32 {
        self.consecutive_failures.swap(0, Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unpaired() {
        let state = SessionState::new();
        assert!(!state.is_ready());
        assert!(!state.was_ever_ready());
    }

    #[test]
    fn ready_is_sticky_in_was_ever_ready() {
        let state = SessionState::new();
        state.mark_ready();
        assert!(state.mark_not_ready());
        assert!(!state.mark_not_ready());
        assert!(!state.is_ready());
        assert!(state.was_ever_ready());
    }

    #[test]
    fn down_alert_claimed_once_per_outage() {
        let state = SessionState::new();
        state.mark_ready();
        assert!(state.claim_down_alert());
        assert!(!state.claim_down_alert());
        state.mark_ready();
        assert!(state.claim_down_alert());
    }

    #[test]
    fn counter_fires_once_per_crossing() {
        let counter = HealthCounter::new(3);
        let tallies: Vec<bool> = (0..6).map(|_| counter.record_failure().crossed).collect();
        assert_eq!(tallies, vec![false, false, true, false, false, true]);
        assert_eq!(counter.consecutive_failures(), 0);
    }

    #[test]
    fn success_resets_counter() {
        let counter = HealthCounter::new(3);
        counter.record_failure();
        counter.record_failure();
        assert_eq!(counter.record_success(), 2);
        assert!(!counter.record_failure().crossed);
    }
}
