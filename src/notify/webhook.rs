use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::WEBHOOK_TIMEOUT_SECS;
use crate::error::AppError;
use crate::notify::Webhook;
use crate::types::WebhookPayload;

#[derive(Debug, Serialize)]
struct DownNotice<'a> {
    message: &'static str,
    reason: &'a str,
    timestamp: String,
}

/// Posts envelopes to ONMESSAGE and down notices to ONDOWN. Either URL may be
/// absent, in which case that half is a no-op.
pub struct HttpWebhook {
    http: reqwest::Client,
    message_url: Option<String>,
    down_url: Option<String>,
}

impl HttpWebhook {
    pub fn new(message_url: Option<String>, down_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            message_url,
            down_url,
        }
    }
}

#[async_trait]
impl Webhook for HttpWebhook {
    async fn forward(&self, payload: &WebhookPayload) -> Result<(), AppError> {
        let Some(url) = &self.message_url else {
            debug!(id = payload.id(), "ONMESSAGE not configured, dropping envelope");
            return Ok(());
        };

        self.http
            .post(url)
            .json(payload)
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .send()
            .await?
            .error_for_status()?;

        info!(id = payload.id(), "posted envelope to {url}");
        Ok(())
    }

    async fn notify_down(&self, reason: &str) {
        let Some(url) = &self.down_url else {
            return;
        };

        let notice = DownNotice {
            message: "WhatsApp client is down",
            reason,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let result = self
            .http
            .post(url)
            .json(&notice)
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(_) => info!("notified ONDOWN ({url}): {reason}"),
            Err(e) => error!("failed to notify ONDOWN ({url}): {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CallEnvelope;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn call_payload() -> WebhookPayload {
        WebhookPayload::Call(CallEnvelope {
            phone_number: "5491100000000@c.us".to_string(),
            message: "Rejected call from 5491100000000@c.us".to_string(),
            kind: "call".to_string(),
            is_video: false,
            timestamp: "2024-01-01T00:00:00Z".to_string(),
        })
    }

    #[tokio::test]
    async fn forwards_json_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({ "type": "call", "isVideo": false })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let webhook = HttpWebhook::new(Some(format!("{}/hook", server.uri())), None);
        webhook.forward(&call_payload()).await.expect("forwarded");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let webhook = HttpWebhook::new(Some(server.uri()), None);
        assert!(webhook.forward(&call_payload()).await.is_err());
    }

    #[tokio::test]
    async fn down_notice_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/down"))
            .and(body_partial_json(serde_json::json!({
                "message": "WhatsApp client is down",
                "reason": "LOGOUT",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let webhook = HttpWebhook::new(None, Some(format!("{}/down", server.uri())));
        webhook.notify_down("LOGOUT").await;
    }

    #[tokio::test]
    async fn unconfigured_urls_are_noops() {
        let webhook = HttpWebhook::new(None, None);
        webhook.forward(&call_payload()).await.unwrap();
        webhook.notify_down("whatever").await;
    }
}
