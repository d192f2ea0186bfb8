use chat_live_sync::{ConnectionState, Message, MessageId};

pub fn message_line(message: &Message, pending: bool) -> String {
    let id = match message.id {
        Some(id) => format!("#{id}"),
        None => "…".to_string(),
    };
    let mut line = format!("[{id}] {}: {}", message.user, message.text);
    if let Some(reply) = &message.reply_to {
        line.push_str(&format!("  (↪ {})", reply.label()));
    }
    for attachment in &message.attachments {
        let kind = if attachment.is_image() { "image" } else { "file" };
        line.push_str(&format!("  [{kind}: {}]", attachment.name));
    }
    if pending {
        line.push_str("  (sending)");
    }
    line
}

pub fn delivered_line(id: MessageId) -> String {
    format!("-- #{id} delivered")
}

pub fn connection_line(state: ConnectionState) -> String {
    match state {
        ConnectionState::Connecting => "-- connecting".to_string(),
        ConnectionState::Live => "-- live".to_string(),
        ConnectionState::DegradedPolling => "-- socket unavailable, polling".to_string(),
    }
}

pub fn unseen_line(count: u32) -> Option<String> {
    match count {
        0 => None,
        1 => Some("-- 1 new message below".to_string()),
        n => Some(format!("-- {n} new messages below")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_live_sync::{Attachment, ReplyPreview};

    #[test]
    fn confirmed_message_with_reply_and_image() {
        let message = Message {
            id: Some(12),
            user: "bob".into(),
            text: "look".into(),
            reply_to: Some(ReplyPreview::new(Some(9), "alice", "hi")),
            attachments: vec![Attachment {
                name: "cat.png".into(),
                url: "/media/cat.png".into(),
            }],
            ..Message::default()
        };
        assert_eq!(
            message_line(&message, false),
            "[#12] bob: look  (↪ alice: hi)  [image: cat.png]"
        );
    }

    #[test]
    fn pending_echo_has_no_id_yet() {
        let message = Message {
            user: "alice".into(),
            text: "hello".into(),
            client_id: Some("c1".into()),
            ..Message::default()
        };
        assert_eq!(message_line(&message, true), "[…] alice: hello  (sending)");
        assert_eq!(delivered_line(42), "-- #42 delivered");
    }

    #[test]
    fn unseen_banner_text() {
        assert_eq!(unseen_line(0), None);
        assert_eq!(unseen_line(1).as_deref(), Some("-- 1 new message below"));
        assert_eq!(unseen_line(4).as_deref(), Some("-- 4 new messages below"));
    }
}
