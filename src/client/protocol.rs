use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::types::{ClientEvent, InboundCall, InboundMessage};

static PARSE_FAILURES: AtomicU64 = AtomicU64::new(0);

/// Raw deserializable shape covering every frame the bridge sends.
/// Replies carry `id` plus `result` or `error`; events carry `event` + `data`.
#[derive(Debug, Deserialize)]
struct RawBridgeMsg {
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub event: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// Parsed bridge frame.
#[derive(Debug)]
pub enum BridgeFrame {
    /// Reply to an earlier request.
    Reply {
        id: u64,
        outcome: Result<Value, String>,
    },
    Event(ClientEvent),
}

/// Parse a raw WebSocket text frame. Unknown or malformed frames yield `None`.
pub fn parse_bridge_frame(raw: &str) -> Option<BridgeFrame> {
    let msg = match serde_json::from_str::<RawBridgeMsg>(raw) {
        Ok(m) => m,
        Err(_) => {
            note_parse_failure(raw);
            return None;
        }
    };

    if let Some(id) = msg.id {
        let outcome = match msg.error {
            Some(e) => Err(e),
            None => Ok(msg.result.unwrap_or(Value::Null)),
        };
        return Some(BridgeFrame::Reply { id, outcome });
    }

    let event = match msg.event.as_deref()? {
        "qr" => ClientEvent::Qr(str_field(&msg.data, "qr")),
        "ready" => ClientEvent::Ready,
        "disconnected" => ClientEvent::Disconnected(str_field(&msg.data, "reason")),
        "auth_failure" => ClientEvent::AuthFailure(str_field(&msg.data, "message")),
        "message" => match serde_json::from_value::<InboundMessage>(msg.data) {
            Ok(m) => ClientEvent::Message(m),
            Err(e) => {
                warn!("[BRIDGE] message event with unexpected shape: {e}");
                return None;
            }
        },
        "call" => match serde_json::from_value::<InboundCall>(msg.data) {
            Ok(c) => ClientEvent::Call(c),
            Err(e) => {
                warn!("[BRIDGE] call event with unexpected shape: {e}");
                return None;
            }
        },
        _ => return None,
    };
    Some(BridgeFrame::Event(event))
}

/// Build a request frame.
pub fn build_request(id: u64, method: &str, params: Value) -> String {
    serde_json::json!({
        "id": id,
        "method": method,
        "params": params,
    })
    .to_string()
}

fn str_field(data: &Value, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

fn note_parse_failure(raw: &str) {
    let count = PARSE_FAILURES.fetch_add(1, Ordering::Relaxed) + 1;
    if count <= 10 || count % 1000 == 0 {
        let end = raw
            .char_indices()
            .nth(500)
            .map(|(i, _)| i)
            .unwrap_or(raw.len());
        warn!(count, "[BRIDGE PARSE] unrecognized frame: {}", &raw[..end]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_success_reply() {
        let frame = parse_bridge_frame(r#"{"id":7,"result":"CONNECTED"}"#);
        match frame {
            Some(BridgeFrame::Reply { id, outcome }) => {
                assert_eq!(id, 7);
                assert_eq!(outcome.unwrap(), Value::String("CONNECTED".to_string()));
            }
            other => panic!("expected Reply, got {other:?}"),
        }
    }

    #[test]
    fn parses_error_reply() {
        let frame = parse_bridge_frame(r#"{"id":3,"error":"Protocol error (Runtime.callFunctionOn): Session closed."}"#);
        match frame {
            Some(BridgeFrame::Reply { id, outcome }) => {
                assert_eq!(id, 3);
                assert!(outcome.unwrap_err().contains("Session closed"));
            }
            other => panic!("expected Reply, got {other:?}"),
        }
    }

    #[test]
    fn reply_without_result_is_null() {
        match parse_bridge_frame(r#"{"id":1}"#) {
            Some(BridgeFrame::Reply { outcome, .. }) => assert_eq!(outcome.unwrap(), Value::Null),
            other => panic!("expected Reply, got {other:?}"),
        }
    }

    #[test]
    fn parses_lifecycle_events() {
        assert!(matches!(
            parse_bridge_frame(r#"{"event":"ready"}"#),
            Some(BridgeFrame::Event(ClientEvent::Ready))
        ));
        match parse_bridge_frame(r#"{"event":"disconnected","data":{"reason":"NAVIGATION"}}"#) {
            Some(BridgeFrame::Event(ClientEvent::Disconnected(reason))) => assert_eq!(reason, "NAVIGATION"),
            other => panic!("expected Disconnected, got {other:?}"),
        }
        match parse_bridge_frame(r#"{"event":"qr","data":{"qr":"2@abc"}}"#) {
            Some(BridgeFrame::Event(ClientEvent::Qr(qr))) => assert_eq!(qr, "2@abc"),
            other => panic!("expected Qr, got {other:?}"),
        }
    }

    #[test]
    fn parses_message_event() {
        let raw = r#"{"event":"message","data":{"id":"false_549@c.us_AAA","from":"549@c.us","type":"multi_vcard","timestamp":1700000000,"vcards":["BEGIN:VCARD 1","BEGIN:VCARD 2"],"forwardingScore":2}}"#;
        match parse_bridge_frame(raw) {
            Some(BridgeFrame::Event(ClientEvent::Message(m))) => {
                assert_eq!(m.kind, "multi_vcard");
                assert_eq!(m.vcards.len(), 2);
                assert!(m.forwarded());
                assert!(!m.has_media);
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn parses_call_event() {
        let raw = r#"{"event":"call","data":{"id":"call-1","from":"549@c.us","isVideo":true}}"#;
        match parse_bridge_frame(raw) {
            Some(BridgeFrame::Event(ClientEvent::Call(c))) => {
                assert_eq!(c.id, "call-1");
                assert!(c.is_video);
            }
            other => panic!("expected Call, got {other:?}"),
        }
    }

    #[test]
    fn unknown_event_returns_none() {
        assert!(parse_bridge_frame(r#"{"event":"loading_screen","data":{}}"#).is_none());
    }

    #[test]
    fn garbage_returns_none() {
        assert!(parse_bridge_frame("not json").is_none());
        assert!(parse_bridge_frame(r#"{"totally":"unrelated"}"#).is_none());
    }

    #[test]
    fn request_frame_shape() {
        let raw = build_request(9, "getState", Value::Null);
        let v: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["id"], 9);
        assert_eq!(v["method"], "getState");
    }
}
