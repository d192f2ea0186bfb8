use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Server-assigned message identifier.
pub type MessageId = u64;

/// Reply excerpts are capped to this many characters, matching the server.
pub const REPLY_EXCERPT_CHARS: usize = 120;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp", "svg"];

/// A chat message as delivered by the socket, the poll endpoint, or built
/// locally for an optimistic echo (then `id` is `None`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(default, with = "timestamp")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyPreview>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attachments: Vec<Attachment>,
    /// Correlation token; only meaningful until the server confirms the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub can_delete: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_current_user: bool,
}

impl Message {
    pub fn is_confirmed(&self) -> bool {
        self.id.is_some()
    }

    /// Whether `username` wrote this message.
    pub fn authored_by(&self, username: &str) -> bool {
        self.is_current_user || (!self.user.is_empty() && self.user == username)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
}

impl Attachment {
    /// Images get an inline thumbnail; everything else is a plain link.
    pub fn is_image(&self) -> bool {
        let candidate = if self.name.is_empty() {
            &self.url
        } else {
            &self.name
        };
        candidate
            .rsplit_once('.')
            .map(|(_, ext)| {
                let ext = ext.to_ascii_lowercase();
                IMAGE_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false)
    }
}

/// Author and excerpt of the message being replied to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReplyPreview {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
}

impl ReplyPreview {
    pub fn new(id: Option<MessageId>, user: impl Into<String>, text: &str) -> Self {
        Self {
            id,
            user: user.into(),
            text: excerpt(text),
        }
    }

    /// `"user: text"`, trimmed.
    pub fn label(&self) -> String {
        format!("{}: {}", self.user, self.text).trim().to_string()
    }
}

fn excerpt(text: &str) -> String {
    text.chars().take(REPLY_EXCERPT_CHARS).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Live,
    DegradedPolling,
}

impl ConnectionState {
    pub fn is_live(self) -> bool {
        matches!(self, ConnectionState::Live)
    }

    pub fn polls(self) -> bool {
        matches!(self, ConnectionState::DegradedPolling)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Live => "live",
            ConnectionState::DegradedPolling => "degraded-polling",
        };
        f.write_str(label)
    }
}

/// Treats an explicit JSON `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// RFC 3339 timestamps; anything unparseable is dropped instead of failing
/// the whole message.
mod timestamp {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::format_description::well_known::Rfc3339;
    use time::OffsetDateTime;

    pub fn serialize<S>(value: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => {
                let formatted = ts.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
                serializer.serialize_some(&formatted)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(raw
            .as_ref()
            .and_then(|value| value.as_str())
            .and_then(|text| OffsetDateTime::parse(text, &Rfc3339).ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_server_message_with_nulls() {
        let message: Message = serde_json::from_value(json!({
            "id": 7,
            "user": "ola",
            "text": "cześć",
            "created_at": "2024-05-01T10:00:00.123456+00:00",
            "attachments": null,
            "client_id": null,
            "reply_to": null,
            "can_delete": true
        }))
        .expect("message");
        assert_eq!(message.id, Some(7));
        assert!(message.attachments.is_empty());
        assert!(message.client_id.is_none());
        assert!(message.can_delete);
        assert_eq!(message.created_at.map(|ts| ts.year()), Some(2024));
    }

    #[test]
    fn unparseable_timestamp_is_dropped() {
        let message: Message = serde_json::from_value(json!({
            "id": 1,
            "user": "a",
            "text": "b",
            "created_at": "yesterday-ish"
        }))
        .expect("message");
        assert!(message.created_at.is_none());
    }

    #[test]
    fn image_detection_prefers_name_then_url() {
        let img = Attachment {
            name: "Photo.JPG".into(),
            url: "/media/x".into(),
        };
        let pdf = Attachment {
            name: "report.pdf".into(),
            url: "/media/report.pdf".into(),
        };
        let by_url = Attachment {
            name: String::new(),
            url: "/media/chat_attachments/a.webp".into(),
        };
        assert!(img.is_image());
        assert!(!pdf.is_image());
        assert!(by_url.is_image());
    }

    #[test]
    fn reply_preview_caps_excerpt() {
        let long = "x".repeat(300);
        let preview = ReplyPreview::new(Some(3), "kasia", &long);
        assert_eq!(preview.text.chars().count(), REPLY_EXCERPT_CHARS);
        assert!(preview.label().starts_with("kasia: x"));
    }

    #[test]
    fn authorship_uses_flag_or_username() {
        let mut message = Message {
            user: "ola".into(),
            ..Message::default()
        };
        assert!(message.authored_by("ola"));
        assert!(!message.authored_by("kasia"));
        message.is_current_user = true;
        assert!(message.authored_by("kasia"));
    }

    #[test]
    fn only_server_ids_confirm_and_only_degraded_polls() {
        let mut message = Message::default();
        assert!(!message.is_confirmed());
        message.id = Some(3);
        assert!(message.is_confirmed());

        assert!(ConnectionState::DegradedPolling.polls());
        assert!(!ConnectionState::Live.polls());
        assert!(!ConnectionState::Connecting.polls());
    }
}
