use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Client events
// ---------------------------------------------------------------------------

/// Lifecycle and domain events emitted by the client capability.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Pairing required; payload is the raw QR string.
    Qr(String),
    Ready,
    Disconnected(String),
    AuthFailure(String),
    Message(InboundMessage),
    Call(InboundCall),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub id: String,
    pub from: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub has_media: bool,
    #[serde(default)]
    pub is_forwarded: bool,
    #[serde(default)]
    pub forwarding_score: u32,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub vcard: Option<String>,
    /// Only populated on `multi_vcard` messages.
    #[serde(default)]
    pub vcards: Vec<String>,
    /// Album membership; either flag marks the message as part of a group.
    #[serde(default)]
    pub is_grouped: bool,
    #[serde(default)]
    pub grouped_message_id: Option<String>,
}

impl InboundMessage {
    pub fn forwarded(&self) -> bool {
        self.is_forwarded || self.forwarding_score > 0
    }

    pub fn is_album_item(&self) -> bool {
        self.has_media && (self.is_grouped || self.grouped_message_id.is_some())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundCall {
    pub id: String,
    pub from: String,
    #[serde(default)]
    pub is_video: bool,
}

/// Downloaded or outbound media. `data` is base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPayload {
    pub mimetype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub data: String,
}

// ---------------------------------------------------------------------------
// Outbound content
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutgoingContent {
    Text {
        body: String,
    },
    Media {
        mimetype: String,
        data: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
}

impl OutgoingContent {
    pub fn media(media: MediaPayload, caption: Option<String>) -> Self {
        OutgoingContent::Media {
            mimetype: media.mimetype,
            data: media.data,
            filename: media.filename,
            caption,
        }
    }
}

// ---------------------------------------------------------------------------
// Webhook envelopes
// ---------------------------------------------------------------------------

/// Normalized inbound message forwarded to the webhook.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub phone_number: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub from: String,
    pub id: String,
    pub timestamp: i64,
    pub body: String,
    pub has_media: bool,
    pub is_forwarded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<EnvelopeData>,
}

/// Kind-specific envelope payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EnvelopeData {
    Media(MediaPayload),
    Location(Location),
    Contact { vcard: String },
    Ciphertext { ciphertext: bool },
}

/// Envelope for a rejected incoming call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEnvelope {
    pub phone_number: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub is_video: bool,
    pub timestamp: String,
}

/// Grouped media forwarded as one `type: "album"` envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub phone_number: String,
    pub from: String,
    pub timestamp: i64,
    pub body: String,
    pub has_media: bool,
    pub is_forwarded: bool,
    pub media: Vec<AlbumItem>,
    pub media_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlbumItem {
    pub index: usize,
    pub mimetype: String,
    pub filename: String,
    pub data: String,
    /// Decoded size in bytes.
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WebhookPayload {
    Message(Envelope),
    Album(AlbumEnvelope),
    Call(CallEnvelope),
}

impl WebhookPayload {
    pub fn id(&self) -> &str {
        match self {
            WebhookPayload::Message(e) => &e.id,
            WebhookPayload::Album(a) => &a.id,
            WebhookPayload::Call(_) => "call",
        }
    }
}

/// Strip the `@c.us` suffix of a direct chat. Group and other server ids
/// are kept whole.
pub fn phone_from_chat_id(chat_id: &str) -> String {
    chat_id.replacen("@c.us", "", 1)
}

/// Status updates and broadcast lists are never real conversation partners.
pub fn is_status_pseudo_id(chat_id: &str) -> bool {
    chat_id == "status@broadcast" || chat_id == "status@c.us" || chat_id.ends_with("@broadcast")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_content_serializes_flat() {
        let content = OutgoingContent::media(
            MediaPayload {
                mimetype: "image/png".to_string(),
                filename: None,
                data: "AAAA".to_string(),
            },
            Some("hola".to_string()),
        );
        let v = serde_json::to_value(&content).unwrap();
        assert_eq!(v["type"], "media");
        assert_eq!(v["mimetype"], "image/png");
        assert_eq!(v["caption"], "hola");
        assert!(v.get("filename").is_none());
    }

    #[test]
    fn envelope_uses_webhook_field_names() {
        let env = Envelope {
            phone_number: "5491100000000".to_string(),
            kind: "vcard".to_string(),
            from: "5491100000000@c.us".to_string(),
            id: "ABC_contact_0".to_string(),
            timestamp: 1_700_000_000,
            body: String::new(),
            has_media: false,
            is_forwarded: true,
            data: Some(EnvelopeData::Contact { vcard: "BEGIN:VCARD".to_string() }),
        };
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["phoneNumber"], "5491100000000");
        assert_eq!(v["type"], "vcard");
        assert_eq!(v["isForwarded"], true);
        assert_eq!(v["data"]["vcard"], "BEGIN:VCARD");
    }

    #[test]
    fn status_pseudo_ids() {
        assert!(is_status_pseudo_id("status@broadcast"));
        assert!(is_status_pseudo_id("status@c.us"));
        assert!(is_status_pseudo_id("12345@broadcast"));
        assert!(!is_status_pseudo_id("5491100000000@c.us"));
    }

    #[test]
    fn only_direct_chats_lose_their_suffix() {
        assert_eq!(phone_from_chat_id("5491100000000@c.us"), "5491100000000");
        assert_eq!(phone_from_chat_id("120363025555555555@g.us"), "120363025555555555@g.us");
        assert_eq!(phone_from_chat_id("5491100000000@lid"), "5491100000000@lid");
    }

    #[test]
    fn album_membership() {
        let mut msg = InboundMessage { has_media: true, ..Default::default() };
        assert!(!msg.is_album_item());
        msg.grouped_message_id = Some("album-1".to_string());
        assert!(msg.is_album_item());
        msg.has_media = false;
        assert!(!msg.is_album_item());
    }
}
