//! Operator snapshot served by GET /health.

use serde::Serialize;

use crate::api::latency::{LatencySnapshot, LatencyStats};
use crate::session::{HealthCounter, RecoverySequencer, SessionState};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub ready: bool,
    pub was_ever_ready: bool,
    pub consecutive_failures: u32,
    /// Seconds since the last successful operation.
    pub idle_secs: u64,
    pub recovery_in_progress: bool,
    pub send_latency: LatencySnapshot,
}

impl HealthSnapshot {
    pub fn capture(
        state: &SessionState,
        counter: &HealthCounter,
        recovery: &RecoverySequencer,
        latency: &LatencyStats,
    ) -> Self {
        Self {
            ready: state.is_ready(),
            was_ever_ready: state.was_ever_ready(),
            consecutive_failures: counter.consecutive_failures(),
            idle_secs: state.idle_for().as_secs(),
            recovery_in_progress: recovery.in_progress(),
            send_latency: latency.snapshot(),
        }
    }
}
