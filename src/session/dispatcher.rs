//! Translates client events into state transitions and webhook calls.

use std::future::Future;
use std::sync::Arc;

use base64::Engine;
use qrcode::render::unicode::Dense1x2;
use qrcode::QrCode;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::notify::{Alerter, Webhook};
use crate::session::errors::SessionError;
use crate::session::handle::ConnectionHandle;
use crate::types::{
    is_status_pseudo_id, phone_from_chat_id, AlbumEnvelope, AlbumItem, CallEnvelope, ClientEvent,
    Envelope, EnvelopeData, InboundCall, InboundMessage, MediaPayload, OutgoingContent,
    WebhookPayload,
};

/// Message kinds that never reach the webhook.
pub const IGNORED_KINDS: &[&str] = &[
    "call_log",
    "e2e_notification",
    "notification_template",
    "protocol",
    "revoked",
    "order",
    "product",
    "list",
    "list_response",
    "buttons_response",
    "poll",
    "poll_response",
];

const MEDIA_KINDS: &[&str] = &["image", "video", "audio", "ptt", "document", "sticker"];

pub const CALL_REPLY: &str = "Calls cannot be received";

pub fn is_ignored_kind(kind: &str) -> bool {
    IGNORED_KINDS.contains(&kind)
}

pub fn is_media_kind(kind: &str) -> bool {
    MEDIA_KINDS.contains(&kind)
}

/// Normalise one inbound message into webhook envelopes. Multi-contact
/// messages fan out into one envelope per card.
pub fn build_envelopes(msg: &InboundMessage, media: Option<MediaPayload>) -> Vec<Envelope> {
    let base = Envelope {
        phone_number: phone_from_chat_id(&msg.from),
        kind: msg.kind.clone(),
        from: msg.from.clone(),
        id: msg.id.clone(),
        timestamp: msg.timestamp,
        body: msg.body.clone(),
        has_media: msg.has_media,
        is_forwarded: msg.forwarded(),
        data: None,
    };

    if msg.kind == "multi_vcard" {
        return msg
            .vcards
            .iter()
            .enumerate()
            .map(|(i, card)| Envelope {
                kind: "vcard".to_string(),
                id: format!("{}_contact_{i}", msg.id),
                data: Some(EnvelopeData::Contact { vcard: card.clone() }),
                ..base.clone()
            })
            .collect();
    }

    let caption = || msg.caption.clone().unwrap_or_default();
    let envelope = match msg.kind.as_str() {
        "image" | "video" => Envelope {
            body: caption(),
            data: media.map(EnvelopeData::Media),
            ..base
        },
        "document" => Envelope {
            body: caption(),
            data: media.map(|m| {
                EnvelopeData::Media(MediaPayload {
                    filename: msg.filename.clone().or(m.filename),
                    ..m
                })
            }),
            ..base
        },
        "audio" | "ptt" | "sticker" => Envelope {
            body: String::new(),
            data: media.map(EnvelopeData::Media),
            ..base
        },
        "location" => Envelope {
            data: Some(EnvelopeData::Location(msg.location.clone().unwrap_or_default())),
            ..base
        },
        "contact" | "vcard" => Envelope {
            data: Some(EnvelopeData::Contact {
                vcard: msg.vcard.clone().unwrap_or_default(),
            }),
            ..base
        },
        "ciphertext" => Envelope {
            data: Some(EnvelopeData::Ciphertext { ciphertext: true }),
            ..base
        },
        _ => base,
    };
    vec![envelope]
}

/// One grouped media message as an album envelope. `None` when nothing was
/// downloaded, in which case nothing is forwarded.
pub fn build_album(msg: &InboundMessage, media: Option<MediaPayload>) -> Option<AlbumEnvelope> {
    let media = media?;
    let size = base64::engine::general_purpose::STANDARD
        .decode(&media.data)
        .map(|bytes| bytes.len())
        .unwrap_or(0);
    let item = AlbumItem {
        index: 0,
        mimetype: media.mimetype,
        filename: media
            .filename
            .or_else(|| msg.filename.clone())
            .unwrap_or_else(|| "album_item_0".to_string()),
        data: media.data,
        size,
    };
    let body = if msg.body.is_empty() {
        msg.caption.clone().unwrap_or_default()
    } else {
        msg.body.clone()
    };
    Some(AlbumEnvelope {
        id: msg.grouped_message_id.clone().unwrap_or_else(|| msg.id.clone()),
        kind: "album".to_string(),
        phone_number: phone_from_chat_id(&msg.from),
        from: msg.from.clone(),
        timestamp: msg.timestamp,
        body,
        has_media: true,
        is_forwarded: msg.forwarded(),
        media_count: 1,
        media: vec![item],
    })
}

/// Terminal rendering of a pairing code.
pub fn render_qr(qr: &str) -> Option<String> {
    match QrCode::new(qr.as_bytes()) {
        Ok(code) => Some(code.render::<Dense1x2>().quiet_zone(true).build()),
        Err(e) => {
            warn!("QR payload could not be rendered: {e}");
            None
        }
    }
}

pub struct EventDispatcher {
    handle: Arc<ConnectionHandle>,
    webhook: Arc<dyn Webhook>,
    alerter: Alerter,
}

impl EventDispatcher {
    pub fn new(handle: Arc<ConnectionHandle>, webhook: Arc<dyn Webhook>, alerter: Alerter) -> Arc<Self> {
        Arc::new(Self { handle, webhook, alerter })
    }

    /// Lifecycle events are applied in order and their alerts run detached.
    /// Message and call handling is spawned per event.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<ClientEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::Qr(qr) => self.on_qr(&qr),
                ClientEvent::Ready => self.on_ready(),
                ClientEvent::Disconnected(reason) => self.on_disconnected(&reason),
                ClientEvent::AuthFailure(reason) => self.on_auth_failure(&reason),
                ClientEvent::Message(msg) => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move { this.on_message(msg).await });
                }
                ClientEvent::Call(call) => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move { this.on_call(call).await });
                }
            }
        }
        info!("client event stream closed");
    }

    pub fn on_qr(&self, qr: &str) {
        info!("QR code generated, scan it to pair: {qr}");
        if let Some(rendered) = render_qr(qr) {
            info!("\n{rendered}");
        }
        self.spawn_alert(|alerter| async move { alerter.pairing_required().await });
    }

    pub fn on_ready(&self) {
        self.handle.state().mark_ready();
        info!("WhatsApp client is ready");
    }

    pub fn on_disconnected(&self, reason: &str) {
        let state = self.handle.state();
        state.mark_not_ready();
        warn!("WhatsApp client disconnected: {reason}");
        if state.was_ever_ready() && state.claim_down_alert() {
            let reason = reason.to_string();
            self.spawn_alert(move |alerter| async move { alerter.session_down(&reason).await });
        }
    }

    pub fn on_auth_failure(&self, reason: &str) {
        self.handle.state().mark_not_ready();
        error!("authentication failure: {reason}");
        let reason = reason.to_string();
        self.spawn_alert(move |alerter| async move { alerter.auth_failure(&reason).await });
    }

    fn spawn_alert<F, Fut>(&self, alert: F)
    where
        F: FnOnce(Alerter) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(alert(self.alerter.clone()));
    }

    pub async fn on_message(&self, msg: InboundMessage) {
        if is_status_pseudo_id(&msg.from) {
            debug!(from = %msg.from, kind = %msg.kind, id = %msg.id, "ignoring status update");
            return;
        }
        if is_ignored_kind(&msg.kind) {
            info!(from = %msg.from, kind = %msg.kind, "ignoring non-actionable message");
            return;
        }
        info!(from = %msg.from, kind = %msg.kind, id = %msg.id, "received message");

        if msg.is_album_item() {
            let media = self.fetch_media(&msg).await;
            match build_album(&msg, media) {
                Some(album) => {
                    info!(id = %album.id, count = album.media_count, "[ALBUM] forwarding album");
                    self.forward(WebhookPayload::Album(album)).await;
                }
                None => warn!(id = %msg.id, "[ALBUM] no media downloaded, album not forwarded"),
            }
            return;
        }

        let media = if is_media_kind(&msg.kind) {
            self.fetch_media(&msg).await
        } else {
            None
        };

        for envelope in build_envelopes(&msg, media) {
            self.forward(WebhookPayload::Message(envelope)).await;
        }
    }

    pub async fn on_call(&self, call: InboundCall) {
        info!(
            from = %call.from,
            "incoming {} call",
            if call.is_video { "video" } else { "voice" }
        );

        match self.handle.reject_call(&call.id).await {
            Ok(()) => info!(from = %call.from, "call rejected"),
            Err(e) => error!(from = %call.from, "failed to reject call: {e}"),
        }
        let reply = OutgoingContent::Text { body: CALL_REPLY.to_string() };
        if let Err(e) = self.handle.send(&call.from, &reply).await {
            warn!(from = %call.from, "failed to send call reply: {e}");
        }

        let envelope = CallEnvelope {
            phone_number: call.from.clone(),
            message: format!("Rejected call from {}", call.from),
            kind: "call".to_string(),
            is_video: call.is_video,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        self.forward(WebhookPayload::Call(envelope)).await;
    }

    async fn fetch_media(&self, msg: &InboundMessage) -> Option<MediaPayload> {
        match self.handle.download_media(&msg.id).await {
            Ok(Some(media)) => Some(media),
            Ok(None) => {
                warn!(id = %msg.id, kind = %msg.kind, "media download returned nothing");
                None
            }
            Err(e) => {
                warn!(id = %msg.id, kind = %msg.kind, "media download failed: {e}");
                None
            }
        }
    }

    async fn forward(&self, payload: WebhookPayload) {
        match self.webhook.forward(&payload).await {
            Ok(()) => self.handle.state().touch(),
            Err(e) => {
                error!(id = payload.id(), "failed to forward to webhook: {e}");
                let err = SessionError::classify(&e.to_string());
                if err.is_session_lost() {
                    self.on_disconnected(&err.to_string());
                }
            }
        }
    }
}
