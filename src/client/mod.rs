//! The messaging-client capability: an external browser-backed engine that
//! owns the actual WhatsApp session. The gateway only orchestrates it.

pub mod bridge;
pub mod protocol;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{MediaPayload, OutgoingContent};

pub use bridge::BridgeClient;

/// Raw failure reported by the client. Classified into a `SessionError`
/// where it is caught.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ClientError(pub String);

impl ClientError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Operations the gateway needs from the client. Events arrive separately on
/// the channel handed to the implementation at construction.
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// (Re)establish the session. Implementations serialize concurrent calls.
    async fn initialize(&self) -> Result<(), ClientError>;

    /// Live round-trip; `"CONNECTED"` when the session is usable.
    async fn get_state(&self) -> Result<String, ClientError>;

    /// Returns the id of the sent message.
    async fn send_message(
        &self,
        chat_id: &str,
        content: &OutgoingContent,
    ) -> Result<String, ClientError>;

    async fn destroy(&self) -> Result<(), ClientError>;

    async fn reject_call(&self, call_id: &str) -> Result<(), ClientError>;

    async fn download_media(&self, message_id: &str) -> Result<Option<MediaPayload>, ClientError>;

    /// `None` when the chat id has no WhatsApp account behind it.
    async fn get_number_id(&self, chat_id: &str) -> Result<Option<String>, ClientError>;
}
