use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::client::SessionClient;
use crate::config::{LOCK_RETRY_DELAY_SECS, STATE_CHECK_TIMEOUT_SECS};
use crate::session::errors::SessionError;
use crate::session::profile_lock::ProfileLock;
use crate::session::state::SessionState;
use crate::types::{MediaPayload, OutgoingContent};

/// Liveness as seen by a live round-trip to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    /// The client answered with a non-connected state, or the session was
    /// not ready to ask.
    NotConnected(String),
    /// The round-trip itself failed.
    Unreachable(String),
}

/// Wraps the client capability and keeps `SessionState` honest about what
/// the client actually reports.
pub struct ConnectionHandle {
    client: Arc<dyn SessionClient>,
    state: Arc<SessionState>,
    profile_lock: ProfileLock,
    send_timeout: Duration,
    lock_retry_delay: Duration,
}

impl ConnectionHandle {
    pub fn new(
        client: Arc<dyn SessionClient>,
        state: Arc<SessionState>,
        profile_lock: ProfileLock,
        send_timeout: Duration,
    ) -> Self {
        Self {
            client,
            state,
            profile_lock,
            send_timeout,
            lock_retry_delay: Duration::from_secs(LOCK_RETRY_DELAY_SECS),
        }
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    /// (Re)establish the session. A stale profile lock is cleared and the
    /// initialisation retried once; any other failure is returned as is.
    pub async fn initialize(&self) -> Result<(), SessionError> {
        match self.client.initialize().await.map_err(SessionError::from) {
            Err(SessionError::LockConflict(msg)) => {
                warn!("[INIT] profile lock conflict, clearing stale lock and retrying: {msg}");
                self.profile_lock.clear_stale().await;
                tokio::time::sleep(self.lock_retry_delay).await;
                self.client.initialize().await.map_err(SessionError::from)
            }
            other => other,
        }
    }

    /// Round-trip to the client. Anything but `CONNECTED` flips the session to
    /// not-ready immediately.
    pub async fn connection_state(&self) -> ConnectionStatus {
        if !self.state.is_ready() {
            return ConnectionStatus::NotConnected("not ready".to_string());
        }

        let check = timeout(
            Duration::from_secs(STATE_CHECK_TIMEOUT_SECS),
            self.client.get_state(),
        )
        .await;

        match check {
            Ok(Ok(state)) if state == "CONNECTED" => {
                self.state.touch();
                ConnectionStatus::Connected
            }
            Ok(Ok(state)) => {
                warn!(state = %state, "client reports non-connected state");
                self.state.mark_not_ready();
                ConnectionStatus::NotConnected(state)
            }
            Ok(Err(e)) => {
                warn!("client state check failed: {e}");
                self.state.mark_not_ready();
                ConnectionStatus::Unreachable(e.0)
            }
            Err(_) => {
                warn!("client state check timed out after {STATE_CHECK_TIMEOUT_SECS}s");
                self.state.mark_not_ready();
                ConnectionStatus::Unreachable("state check timed out".to_string())
            }
        }
    }

    pub async fn is_live(&self) -> bool {
        self.connection_state().await == ConnectionStatus::Connected
    }

    /// Release the underlying session. Failures are logged and swallowed;
    /// teardown often races an engine that is already dying.
    pub async fn destroy(&self) {
        match self.client.destroy().await {
            Ok(()) => info!("client destroyed"),
            Err(e) => error!("error destroying client: {e}"),
        }
    }

    /// Send with a hard timeout. Session-loss failures flip the session to
    /// not-ready; retrying is the caller's decision.
    pub async fn send(&self, chat_id: &str, content: &OutgoingContent) -> Result<String, SessionError> {
        match timeout(self.send_timeout, self.client.send_message(chat_id, content)).await {
            Ok(Ok(message_id)) => {
                self.state.touch();
                debug!(chat_id, message_id = %message_id, "message sent");
                Ok(message_id)
            }
            Ok(Err(e)) => Err(self.note_failure(e.into())),
            Err(_) => Err(SessionError::Timeout(self.send_timeout)),
        }
    }

    pub async fn is_registered(&self, chat_id: &str) -> Result<bool, SessionError> {
        self.client
            .get_number_id(chat_id)
            .await
            .map(|id| id.is_some())
            .map_err(|e| self.note_failure(e.into()))
    }

    pub async fn reject_call(&self, call_id: &str) -> Result<(), SessionError> {
        self.client
            .reject_call(call_id)
            .await
            .map_err(|e| self.note_failure(e.into()))
    }

    pub async fn download_media(&self, message_id: &str) -> Result<Option<MediaPayload>, SessionError> {
        self.client
            .download_media(message_id)
            .await
            .map_err(|e| self.note_failure(e.into()))
    }

    fn note_failure(&self, err: SessionError) -> SessionError {
        if err.is_session_lost() && self.state.mark_not_ready() {
            warn!("session loss detected, marking client not ready: {err}");
        }
        err
    }
}
