use serde::{Deserialize, Serialize};

/// Name of the distinguished, unique conversation every user can join.
pub const GENERAL_CHAT_NAME: &str = "General Chat";

/// Rendered in place of a reply target that has since been soft-deleted.
pub const DELETED_PLACEHOLDER: &str = "[message deleted]";

/// Conversation preview for a latest message that only carries media.
pub const ATTACHMENT_PREVIEW: &str = "Sent an attachment";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub name: Option<String>,
    pub participant_ids: Vec<String>,
    /// Pin state as seen by the requesting participant.
    pub is_pinned: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Conversation {
    pub fn is_general(&self) -> bool {
        self.name.as_deref() == Some(GENERAL_CHAT_NAME)
    }
}

/// A conversation as returned by the listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub preview: Option<String>,
    pub last_message_at: Option<i64>,
}

/// Opaque reference to an uploaded blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub url: String,
    pub mime_type: String,
}

/// One-hop view of the message a reply points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplySnapshot {
    pub message_id: String,
    pub sender_id: String,
    pub content: Option<String>,
    pub has_media: bool,
    pub is_deleted: bool,
}

impl ReplySnapshot {
    pub fn display_text(&self) -> &str {
        if self.is_deleted {
            return DELETED_PLACEHOLDER;
        }
        match self.content.as_deref() {
            Some(text) if !text.is_empty() => text,
            _ if self.has_media => ATTACHMENT_PREVIEW,
            _ => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub replied_to_id: Option<String>,
    pub replied_to: Option<ReplySnapshot>,
    pub is_pinned: bool,
    pub created_at: i64,
    /// Bumped by every pin change or delete; a higher value supersedes a lower.
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn has_media(&self) -> bool {
        self.media_url.is_some()
    }

    pub fn media(&self) -> Option<MediaRef> {
        match (&self.media_url, &self.media_type) {
            (Some(url), Some(mime_type)) => Some(MediaRef {
                url: url.clone(),
                mime_type: mime_type.clone(),
            }),
            _ => None,
        }
    }

    /// Whether `self` should replace `held`, an earlier copy of the same
    /// message. Deletion is one-way, and older versions never win.
    pub fn supersedes(&self, held: &Message) -> bool {
        if held.is_deleted() && !self.is_deleted() {
            return false;
        }
        self.updated_at >= held.updated_at
    }

    /// Text used for the conversation list preview. Deleted messages have none.
    pub fn preview_text(&self) -> Option<&str> {
        if self.is_deleted() {
            return None;
        }
        match self.content.as_deref() {
            Some(text) if !text.trim().is_empty() => Some(text),
            _ if self.has_media() => Some(ATTACHMENT_PREVIEW),
            _ => None,
        }
    }

    /// Text to render in a message bubble.
    pub fn display_text(&self) -> &str {
        if self.is_deleted() {
            DELETED_PLACEHOLDER
        } else {
            self.preview_text().unwrap_or("")
        }
    }
}

/// A window of history in ascending `created_at` order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// Pass back as `cursor` to continue after the last message of this page.
    pub next_cursor: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(content: Option<&str>, media: bool, deleted: bool) -> Message {
        Message {
            id: "m1".to_string(),
            conversation_id: "c1".to_string(),
            sender_id: "u1".to_string(),
            content: content.map(String::from),
            media_url: media.then(|| "https://cdn.example/a.png".to_string()),
            media_type: media.then(|| "image/png".to_string()),
            replied_to_id: None,
            replied_to: None,
            is_pinned: false,
            created_at: 1,
            updated_at: if deleted { 2 } else { 1 },
            deleted_at: deleted.then_some(2),
        }
    }

    #[test]
    fn test_preview_prefers_content() {
        assert_eq!(message(Some("hi"), true, false).preview_text(), Some("hi"));
    }

    #[test]
    fn test_preview_falls_back_to_attachment() {
        assert_eq!(
            message(Some("  "), true, false).preview_text(),
            Some(ATTACHMENT_PREVIEW)
        );
        assert_eq!(message(None, true, false).preview_text(), Some(ATTACHMENT_PREVIEW));
    }

    #[test]
    fn test_deleted_message_has_no_preview() {
        let deleted = message(None, false, true);
        assert_eq!(deleted.preview_text(), None);
        assert_eq!(deleted.display_text(), DELETED_PLACEHOLDER);
    }

    #[test]
    fn test_older_or_undeleted_copy_does_not_supersede() {
        let original = message(Some("hi"), false, false);
        let deleted = message(None, false, true);
        assert!(deleted.supersedes(&original));
        assert!(!original.supersedes(&deleted));

        let mut pinned = original.clone();
        pinned.is_pinned = true;
        pinned.updated_at = 5;
        assert!(!original.supersedes(&pinned));
        assert!(pinned.supersedes(&original));
    }

    #[test]
    fn test_message_serializes_camel_case() {
        let json = serde_json::to_value(message(Some("hi"), false, false)).unwrap();
        assert_eq!(json["conversationId"], "c1");
        assert_eq!(json["isPinned"], false);
        assert!(json["repliedToId"].is_null());
        assert!(json["deletedAt"].is_null());
        assert_eq!(json["updatedAt"], 1);
    }

    #[test]
    fn test_summary_flattens_conversation() {
        let summary = ConversationSummary {
            conversation: Conversation {
                id: "c1".to_string(),
                name: Some(GENERAL_CHAT_NAME.to_string()),
                participant_ids: vec!["u1".to_string()],
                is_pinned: false,
                created_at: 1,
                updated_at: 2,
            },
            preview: Some("hi".to_string()),
            last_message_at: Some(2),
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["id"], "c1");
        assert_eq!(json["preview"], "hi");
        assert!(summary.conversation.is_general());
    }

    #[test]
    fn test_reply_snapshot_placeholder() {
        let snapshot = ReplySnapshot {
            message_id: "m1".to_string(),
            sender_id: "u1".to_string(),
            content: Some(DELETED_PLACEHOLDER.to_string()),
            has_media: false,
            is_deleted: true,
        };
        assert_eq!(snapshot.display_text(), DELETED_PLACEHOLDER);
    }
}
