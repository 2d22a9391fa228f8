//! Outbound sends on behalf of HTTP callers.
//!
//! A request is planned into text, an image batch, or a document, checked
//! against live session state, and delivered. A session loss mid-send buys
//! one synchronous recovery and one retry per request; nothing more.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::api::latency::LatencyStats;
use crate::config::MEDIA_FETCH_TIMEOUT_SECS;
use crate::session::errors::SessionError;
use crate::session::handle::ConnectionHandle;
use crate::session::recovery::RecoverySequencer;
use crate::types::{is_status_pseudo_id, MediaPayload, OutgoingContent};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// Malformed request or disallowed target.
    #[error("{0}")]
    Invalid(String),

    #[error("{0} is not registered on WhatsApp")]
    NotRegistered(String),

    #[error("WhatsApp session unavailable")]
    Unavailable { retry: bool },

    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub phone_number: Option<String>,
    pub message: Option<String>,
    pub image_url: Option<String>,
    pub image_urls: Option<Vec<String>>,
    pub pdf_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendPlan {
    Text(String),
    /// Only the first image carries the caption.
    Images { urls: Vec<String>, caption: Option<String> },
    Document { url: String, caption: Option<String> },
}

fn non_blank(v: &Option<String>) -> Option<String> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

impl SendRequest {
    /// Resolve the target chat and the content to deliver. Precedence when
    /// several content fields are present: imageUrls, imageUrl, pdfUrl,
    /// message. The message becomes the caption of media sends.
    pub fn plan(&self) -> Result<(String, SendPlan), SendError> {
        let phone = non_blank(&self.phone_number)
            .ok_or_else(|| SendError::Invalid("phoneNumber is required".to_string()))?;
        let chat_id = chat_id_for(&phone)?;
        let message = non_blank(&self.message);

        let urls: Vec<String> = self
            .image_urls
            .iter()
            .flatten()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();

        let plan = if !urls.is_empty() {
            SendPlan::Images { urls, caption: message }
        } else if let Some(url) = non_blank(&self.image_url) {
            SendPlan::Images { urls: vec![url], caption: message }
        } else if let Some(url) = non_blank(&self.pdf_url) {
            SendPlan::Document { url, caption: message }
        } else if let Some(text) = message {
            SendPlan::Text(text)
        } else {
            return Err(SendError::Invalid(
                "one of message, imageUrl, imageUrls or pdfUrl is required".to_string(),
            ));
        };
        Ok((chat_id, plan))
    }
}

/// `+54 9 11 0000-0000` becomes `5491100000000@c.us`. Ids that already carry
/// a server suffix pass through unless they are status/broadcast ids.
pub fn chat_id_for(phone: &str) -> Result<String, SendError> {
    let phone = phone.trim();
    if phone.contains('@') {
        if is_status_pseudo_id(phone) {
            return Err(SendError::Invalid(format!("cannot send to {phone}")));
        }
        return Ok(phone.to_string());
    }
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(SendError::Invalid(format!("invalid phoneNumber: {phone}")));
    }
    Ok(format!("{digits}@c.us"))
}

pub struct SendGate {
    handle: Arc<ConnectionHandle>,
    recovery: Arc<RecoverySequencer>,
    latency: Arc<LatencyStats>,
    http: reqwest::Client,
    batch_pause: Duration,
}

impl SendGate {
    pub fn new(
        handle: Arc<ConnectionHandle>,
        recovery: Arc<RecoverySequencer>,
        latency: Arc<LatencyStats>,
        batch_pause: Duration,
    ) -> Self {
        Self {
            handle,
            recovery,
            latency,
            http: reqwest::Client::new(),
            batch_pause,
        }
    }

    /// Returns the number of messages delivered.
    pub async fn send(&self, request: &SendRequest) -> Result<usize, SendError> {
        let (chat_id, plan) = request.plan()?;

        if !self.handle.is_live().await {
            return Err(self.unavailable_before_send());
        }

        match self.handle.is_registered(&chat_id).await {
            Ok(true) => {}
            Ok(false) => return Err(SendError::NotRegistered(chat_id)),
            Err(e) if e.is_session_lost() => {
                warn!(chat_id, "[SEND] session lost during number lookup: {e}");
                self.recovery.spawn_recover("send");
                return Err(SendError::Unavailable { retry: true });
            }
            Err(e) => return Err(SendError::Failed(e.to_string())),
        }

        let mut recovery_used = false;
        match plan {
            SendPlan::Text(body) => {
                self.deliver(&chat_id, &OutgoingContent::Text { body }, &mut recovery_used)
                    .await?;
                Ok(1)
            }
            SendPlan::Document { url, caption } => {
                let media = self.fetch_media(&url).await?;
                self.deliver(&chat_id, &OutgoingContent::media(media, caption), &mut recovery_used)
                    .await?;
                Ok(1)
            }
            SendPlan::Images { urls, caption } => {
                self.send_batch(&chat_id, &urls, caption, &mut recovery_used).await
            }
        }
    }

    /// Sequential, paced; per-image failures are skipped. Losing the session
    /// past the recovery budget aborts the rest of the batch.
    async fn send_batch(
        &self,
        chat_id: &str,
        urls: &[String],
        caption: Option<String>,
        recovery_used: &mut bool,
    ) -> Result<usize, SendError> {
        let mut sent = 0;
        for (i, url) in urls.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.batch_pause).await;
            }
            let media = match self.fetch_media(url).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(chat_id, index = i, "[SEND] skipping image {url}: {e}");
                    continue;
                }
            };
            let content = OutgoingContent::media(media, if i == 0 { caption.clone() } else { None });
            match self.deliver(chat_id, &content, recovery_used).await {
                Ok(_) => sent += 1,
                Err(e @ SendError::Unavailable { .. }) => return Err(e),
                Err(e) => warn!(chat_id, index = i, "[SEND] skipping image {url}: {e}"),
            }
        }

        info!(chat_id, "[SEND] image batch: {sent}/{} delivered", urls.len());
        if sent == 0 {
            return Err(SendError::Failed("no image could be sent".to_string()));
        }
        Ok(sent)
    }

    async fn deliver(
        &self,
        chat_id: &str,
        content: &OutgoingContent,
        recovery_used: &mut bool,
    ) -> Result<String, SendError> {
        loop {
            let started = Instant::now();
            match self.handle.send(chat_id, content).await {
                Ok(id) => {
                    self.latency.record(started.elapsed());
                    info!(chat_id, id = %id, "[SEND] delivered");
                    return Ok(id);
                }
                Err(SessionError::Timeout(d)) => {
                    warn!(chat_id, "[SEND] timed out after {}s", d.as_secs());
                    return Err(SendError::Unavailable { retry: true });
                }
                Err(e) if e.is_session_lost() => {
                    if *recovery_used {
                        warn!(chat_id, "[SEND] session lost again after recovery: {e}");
                        return Err(SendError::Unavailable { retry: true });
                    }
                    *recovery_used = true;
                    warn!(chat_id, "[SEND] session lost, recovering before one retry: {e}");
                    let outcome = self.recovery.recover("send").await;
                    info!(chat_id, "[SEND] recovery outcome: {outcome:?}");
                    tokio::time::sleep(self.recovery.policy().settle).await;
                }
                Err(e) => return Err(SendError::Failed(e.to_string())),
            }
        }
    }

    /// Paired sessions get a background recovery and a retry hint; a session
    /// that never paired has nothing to recover yet.
    fn unavailable_before_send(&self) -> SendError {
        if self.handle.state().was_ever_ready() {
            self.recovery.spawn_recover("send");
            SendError::Unavailable { retry: true }
        } else {
            SendError::Unavailable { retry: false }
        }
    }

    async fn fetch_media(&self, url: &str) -> Result<MediaPayload, SendError> {
        let fetch_err = |e: reqwest::Error| SendError::Failed(format!("could not fetch {url}: {e}"));
        let resp = self
            .http
            .get(url)
            .timeout(Duration::from_secs(MEDIA_FETCH_TIMEOUT_SECS))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(fetch_err)?;

        let filename = filename_from_url(url);
        let mimetype = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty() && v != "application/octet-stream")
            .unwrap_or_else(|| guess_mimetype(filename.as_deref()).to_string());
        let bytes = resp.bytes().await.map_err(fetch_err)?;

        Ok(MediaPayload {
            mimetype,
            filename,
            data: base64::engine::general_purpose::STANDARD.encode(&bytes),
        })
    }
}

fn filename_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && s.contains('.'))
        .map(str::to_string)
}

fn guess_mimetype(filename: Option<&str>) -> &'static str {
    let ext = filename
        .and_then(|f| f.rsplit('.').next())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}
