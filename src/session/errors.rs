use std::time::Duration;

use thiserror::Error;

use crate::client::ClientError;

/// Classified failure of a session operation. Produced once, where the raw
/// client error is caught; everything downstream matches on the variant.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The underlying transport or browser session dropped mid-operation.
    #[error("session lost: {0}")]
    SessionLost(String),

    /// A stale profile lock from an earlier process blocks initialisation.
    #[error("session profile locked: {0}")]
    LockConflict(String),

    #[error("operation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SessionLost,
    LockConflict,
    Other,
}

/// Ordered (pattern, kind) rules; first match wins. Patterns are matched
/// case-insensitively against the error message.
const ERROR_RULES: &[(&str, ErrorKind)] = &[
    ("singletonlock", ErrorKind::LockConflict),
    ("session closed", ErrorKind::SessionLost),
    ("protocol error", ErrorKind::SessionLost),
    ("target closed", ErrorKind::SessionLost),
    ("connection lost", ErrorKind::SessionLost),
    ("navigation failed", ErrorKind::SessionLost),
    ("websocket connection", ErrorKind::SessionLost),
    ("execution context was destroyed", ErrorKind::SessionLost),
];

pub fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    ERROR_RULES
        .iter()
        .find(|(pattern, _)| lower.contains(pattern))
        .map(|(_, kind)| *kind)
        .unwrap_or(ErrorKind::Other)
}

impl SessionError {
    pub fn classify(message: &str) -> Self {
        match classify_message(message) {
            ErrorKind::SessionLost => SessionError::SessionLost(message.to_string()),
            ErrorKind::LockConflict => SessionError::LockConflict(message.to_string()),
            ErrorKind::Other => SessionError::Failed(message.to_string()),
        }
    }

    pub fn is_session_lost(&self) -> bool {
        matches!(self, SessionError::SessionLost(_))
    }
}

impl From<ClientError> for SessionError {
    fn from(e: ClientError) -> Self {
        SessionError::classify(&e.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_session_loss_messages() {
        for msg in [
            "Protocol error (Runtime.callFunctionOn): Session closed. Most likely the page has been closed.",
            "Target closed",
            "Connection lost: bridge socket closed",
            "Execution context was destroyed, most likely because of a navigation.",
        ] {
            assert!(SessionError::classify(msg).is_session_lost(), "{msg}");
        }
    }

    #[test]
    fn lock_marker_wins_over_session_patterns() {
        let err = SessionError::classify(
            "Failed to launch: SingletonLock exists; protocol error while opening profile",
        );
        assert!(matches!(err, SessionError::LockConflict(_)));
    }

    #[test]
    fn unrelated_errors_are_failures() {
        let err = SessionError::from(ClientError::new("invalid wid"));
        assert!(matches!(err, SessionError::Failed(_)));
        assert!(!err.is_session_lost());
    }
}
