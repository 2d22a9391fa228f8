//! Process-level fault handling.
//!
//! Panics (via the panic hook) and other unrecoverable conditions are
//! reported to a single `FaultSupervisor` task. Each fault is classified by
//! message; a fixed subset of causes ends the process with status 1 so the
//! external supervisor restarts it. Everything else is logged, alerted and
//! answered with a session restart, taken through the recovery guard so it
//! never overlaps a recovery run.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::notify::Alerter;
use crate::session::recovery::RestartOutcome;
use crate::session::RecoverySequencer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCause {
    ResourceExhaustion,
    LaunchFailure,
    AddressInUse,
    ConnectionRefused,
    SessionClosed,
    Unknown,
}

/// Ordered (pattern, cause) rules matched case-insensitively; first wins.
const FAULT_RULES: &[(&str, FaultCause)] = &[
    ("out of memory", FaultCause::ResourceExhaustion),
    ("failed to launch the browser process", FaultCause::LaunchFailure),
    ("eaddrinuse", FaultCause::AddressInUse),
    ("address already in use", FaultCause::AddressInUse),
    ("econnrefused", FaultCause::ConnectionRefused),
    ("connection refused", FaultCause::ConnectionRefused),
    ("session closed", FaultCause::SessionClosed),
];

impl FaultCause {
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        FAULT_RULES
            .iter()
            .find(|(pattern, _)| lower.contains(pattern))
            .map(|(_, cause)| *cause)
            .unwrap_or(FaultCause::Unknown)
    }

    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            FaultCause::ResourceExhaustion
                | FaultCause::LaunchFailure
                | FaultCause::AddressInUse
                | FaultCause::ConnectionRefused
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FaultCause::ResourceExhaustion => "memory",
            FaultCause::LaunchFailure => "chrome_launch",
            FaultCause::AddressInUse => "address_in_use",
            FaultCause::ConnectionRefused => "connection_refused",
            FaultCause::SessionClosed => "session_closed",
            FaultCause::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Fault {
    pub origin: &'static str,
    pub message: String,
}

#[derive(Clone)]
pub struct FaultReporter {
    tx: mpsc::UnboundedSender<Fault>,
}

impl FaultReporter {
    pub fn report(&self, origin: &'static str, message: impl Into<String>) {
        let fault = Fault {
            origin,
            message: message.into(),
        };
        if self.tx.send(fault).is_err() {
            warn!("[FAULT] supervisor gone, fault from {origin} dropped");
        }
    }
}

pub fn channel() -> (FaultReporter, mpsc::UnboundedReceiver<Fault>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FaultReporter { tx }, rx)
}

/// Route panics from any thread to the supervisor. The default hook still
/// runs so the backtrace reaches stderr.
pub fn install_panic_hook(reporter: FaultReporter) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        let location = info
            .location()
            .map(|l| format!(" at {}:{}", l.file(), l.line()))
            .unwrap_or_default();
        error!("[FAULT] panic{location}: {payload}");
        reporter.report("panic", format!("{payload}{location}"));
        default_hook(info);
    }));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    /// Fatal cause; the process must exit with this status.
    Exit(i32),
    Recovered,
    RecoveryFailed,
    /// A recovery run already owns the session.
    Deferred,
}

pub struct FaultSupervisor {
    faults: mpsc::UnboundedReceiver<Fault>,
    recovery: Arc<RecoverySequencer>,
    alerter: Alerter,
    restarts: u32,
}

impl FaultSupervisor {
    pub fn new(
        faults: mpsc::UnboundedReceiver<Fault>,
        recovery: Arc<RecoverySequencer>,
        alerter: Alerter,
    ) -> Self {
        Self {
            faults,
            recovery,
            alerter,
            restarts: 0,
        }
    }

    pub async fn run(mut self) {
        while let Some(fault) = self.faults.recv().await {
            if let FaultAction::Exit(code) = self.handle_fault(fault).await {
                error!("[FAULT] exiting with status {code} for supervisor restart");
                std::process::exit(code);
            }
        }
    }

    pub async fn handle_fault(&mut self, fault: Fault) -> FaultAction {
        let cause = FaultCause::classify(&fault.message);
        self.restarts += 1;
        error!(
            origin = fault.origin,
            cause = cause.as_str(),
            restarts = self.restarts,
            "[FAULT] {}",
            fault.message
        );
        self.alerter
            .bot_down(fault.origin, cause.as_str(), &fault.message)
            .await;

        if cause.is_fatal() {
            return FaultAction::Exit(1);
        }

        match self.recovery.restart("fault").await {
            RestartOutcome::Restarted => {
                info!(restarts = self.restarts, "[FAULT] session re-initialised");
                self.alerter.bot_recovered(self.restarts).await;
                FaultAction::Recovered
            }
            RestartOutcome::Failed(e) => {
                error!("[FAULT] re-initialisation failed: {e}");
                FaultAction::RecoveryFailed
            }
            RestartOutcome::AlreadyRunning => {
                info!("[FAULT] recovery already running, leaving the session to it");
                FaultAction::Deferred
            }
        }
    }
}
