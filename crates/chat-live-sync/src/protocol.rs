//! Frames exchanged with the chat backend.
//!
//! The socket speaks JSON text frames: the client sends objects tagged by
//! `action`, the server answers with objects tagged by `type`. The HTTP side
//! returns plain JSON documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::model::{Message, MessageId};

/// Client → server socket frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OutboundFrame {
    Send {
        text: String,
        client_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reply_to_id: Option<MessageId>,
    },
    Typing {
        typing: bool,
    },
}

impl OutboundFrame {
    pub fn to_text(&self) -> String {
        // Plain enums of strings and integers cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Server → client socket frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Backlog sent right after the socket is accepted, oldest first.
    History {
        #[serde(default)]
        messages: Vec<Message>,
    },
    Message(Message),
    Typing {
        #[serde(default)]
        user: String,
    },
    MessageRemoved {
        id: MessageId,
    },
}

impl InboundFrame {
    /// Best-effort decode; malformed or unknown frames yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str(text) {
            Ok(frame) => Some(frame),
            Err(err) => {
                debug!(target: "chat.socket", error = %err, "discarding undecodable frame");
                None
            }
        }
    }
}

/// Body of `GET <messages-endpoint>[?since_id=<id>]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Body returned by the form-post send endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub id: Option<MessageId>,
    #[serde(default)]
    pub errors: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

pub const DEFAULT_SEND_ERROR: &str = "message could not be sent";

impl PostResponse {
    /// Flattens `errors` (a list, or a map of field → list) and `error` into
    /// display strings.
    pub fn error_messages(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(errors) = &self.errors {
            collect_strings(errors, &mut out);
        }
        if out.is_empty() {
            if let Some(error) = &self.error {
                out.push(error.clone());
            }
        }
        if out.is_empty() {
            out.push(DEFAULT_SEND_ERROR.to_string());
        }
        out
    }
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(text) => out.push(text.clone()),
        Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
        Value::Object(fields) => fields.values().for_each(|item| collect_strings(item, out)),
        Value::Null => {}
        other => out.push(other.to_string()),
    }
}

/// Confirmation returned by a successful form post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostReceipt {
    pub id: Option<MessageId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InviteReceipt {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub created: bool,
    #[serde(default)]
    pub invite_id: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn send_frame_omits_missing_reply() {
        let frame = OutboundFrame::Send {
            text: "hello".into(),
            client_id: "c123".into(),
            reply_to_id: None,
        };
        let value: Value = serde_json::from_str(&frame.to_text()).unwrap();
        assert_eq!(
            value,
            json!({"action": "send", "text": "hello", "client_id": "c123"})
        );

        let reply = OutboundFrame::Send {
            text: "re".into(),
            client_id: "c9".into(),
            reply_to_id: Some(4),
        };
        let value: Value = serde_json::from_str(&reply.to_text()).unwrap();
        assert_eq!(value["reply_to_id"], 4);
    }

    #[test]
    fn typing_frame_shape() {
        let value: Value =
            serde_json::from_str(&OutboundFrame::Typing { typing: true }.to_text()).unwrap();
        assert_eq!(value, json!({"action": "typing", "typing": true}));
    }

    #[test]
    fn decodes_every_inbound_tag() {
        let history = InboundFrame::parse(
            r#"{"type":"history","messages":[{"id":1,"user":"a","text":"x"}]}"#,
        );
        assert!(matches!(history, Some(InboundFrame::History { ref messages }) if messages.len() == 1));

        let message = InboundFrame::parse(
            r#"{"type":"message","id":42,"client_id":"ctok","text":"hello","user":"A","can_delete":true}"#,
        );
        match message {
            Some(InboundFrame::Message(m)) => {
                assert_eq!(m.id, Some(42));
                assert_eq!(m.client_id.as_deref(), Some("ctok"));
                assert!(m.can_delete);
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        assert_eq!(
            InboundFrame::parse(r#"{"type":"typing","user":"kasia"}"#),
            Some(InboundFrame::Typing {
                user: "kasia".into()
            })
        );
        assert_eq!(
            InboundFrame::parse(r#"{"type":"message_removed","id":9}"#),
            Some(InboundFrame::MessageRemoved { id: 9 })
        );
    }

    #[test]
    fn malformed_frames_are_discarded() {
        assert!(InboundFrame::parse("not json").is_none());
        assert!(InboundFrame::parse(r#"{"type":"presence"}"#).is_none());
        assert!(InboundFrame::parse(r#"{"type":"message_removed"}"#).is_none());
    }

    #[test]
    fn flattens_form_errors() {
        let response: PostResponse = serde_json::from_value(json!({
            "ok": false,
            "errors": {"text": ["This field is required."], "__all__": ["Too fast"]}
        }))
        .unwrap();
        let mut messages = response.error_messages();
        messages.sort();
        assert_eq!(messages, vec!["This field is required.", "Too fast"]);

        let single: PostResponse = serde_json::from_value(json!({"error": "forbidden"})).unwrap();
        assert_eq!(single.error_messages(), vec!["forbidden"]);

        assert_eq!(
            PostResponse::default().error_messages(),
            vec![DEFAULT_SEND_ERROR]
        );
    }
}
