pub mod push;
pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::AppError;
use crate::types::WebhookPayload;

pub use push::FcmNotifier;
pub use webhook::HttpWebhook;

/// Receives inbound envelopes and "client down" notices.
#[async_trait]
pub trait Webhook: Send + Sync {
    async fn forward(&self, payload: &WebhookPayload) -> Result<(), AppError>;

    /// Best effort; failures are logged by the implementation.
    async fn notify_down(&self, reason: &str);
}

/// Operator push channel. Never fails from the caller's point of view.
#[async_trait]
pub trait PushNotifier: Send + Sync {
    async fn push(&self, title: &str, body: &str);
}

pub const TITLE_PAIRING: &str = "WhatsApp requires pairing";
pub const TITLE_SESSION_CLOSED: &str = "WhatsApp session closed";
pub const TITLE_AUTH_FAILURE: &str = "WhatsApp authentication failed";
pub const TITLE_UNAVAILABLE: &str = "WhatsApp unavailable";
pub const TITLE_RECOVERY_FAILED: &str = "WhatsApp could not recover";
pub const TITLE_BOT_DOWN: &str = "Bot down";
pub const TITLE_BOT_RECOVERED: &str = "Bot recovered";

/// The fixed catalogue of operator alerts.
#[derive(Clone)]
pub struct Alerter {
    push: Arc<dyn PushNotifier>,
    webhook: Arc<dyn Webhook>,
}

impl Alerter {
    pub fn new(push: Arc<dyn PushNotifier>, webhook: Arc<dyn Webhook>) -> Self {
        Self { push, webhook }
    }

    pub async fn pairing_required(&self) {
        self.push
            .push(TITLE_PAIRING, "The bot is waiting for the QR code to be scanned.")
            .await;
    }

    pub async fn session_down(&self, reason: &str) {
        info!("[ALERT] session down: {reason}");
        self.webhook.notify_down(reason).await;
        self.push
            .push(
                TITLE_SESSION_CLOSED,
                &format!("The WhatsApp session was closed. Action required. Reason: {reason}"),
            )
            .await;
    }

    pub async fn auth_failure(&self, reason: &str) {
        info!("[ALERT] authentication failure: {reason}");
        self.webhook.notify_down(reason).await;
        self.push
            .push(TITLE_AUTH_FAILURE, &format!("Authentication was rejected: {reason}"))
            .await;
    }

    pub async fn health_degraded(&self, failures: u32) {
        self.push
            .push(
                TITLE_UNAVAILABLE,
                &format!("Client not ready after {failures} consecutive health checks."),
            )
            .await;
    }

    pub async fn recovery_exhausted(&self, attempts: u32) {
        self.push
            .push(
                TITLE_RECOVERY_FAILED,
                &format!("Could not restart the session after {attempts} attempts. Manual intervention required."),
            )
            .await;
    }

    pub async fn bot_down(&self, origin: &str, cause: &str, detail: &str) {
        self.push
            .push(TITLE_BOT_DOWN, &format!("{origin} ({cause}): {detail}"))
            .await;
    }

    pub async fn bot_recovered(&self, restarts: u32) {
        self.push
            .push(
                TITLE_BOT_RECOVERED,
                &format!("The session was re-initialised after a fault (restart #{restarts})."),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingPush, RecordingWebhook};

    #[tokio::test]
    async fn session_down_notifies_webhook_and_push() {
        let push = RecordingPush::new();
        let webhook = RecordingWebhook::new();
        let alerter = Alerter::new(push.clone(), webhook.clone());

        alerter.session_down("NAVIGATION").await;
        assert_eq!(webhook.down_notices(), vec!["NAVIGATION".to_string()]);
        assert_eq!(push.count(TITLE_SESSION_CLOSED), 1);
    }

    #[tokio::test]
    async fn pairing_is_push_only() {
        let push = RecordingPush::new();
        let webhook = RecordingWebhook::new();
        let alerter = Alerter::new(push.clone(), webhook.clone());

        alerter.pairing_required().await;
        assert!(webhook.down_notices().is_empty());
        assert_eq!(push.titles(), vec![TITLE_PAIRING.to_string()]);
    }
}
