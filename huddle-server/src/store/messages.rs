use huddle_proto::input::{SendMessageInput, MAX_PAGE_SIZE};
use huddle_proto::{Message, MessagePage, ReplySnapshot, DELETED_PLACEHOLDER};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use super::conversations::touch_conversation;
use super::{now_millis, require_participant, Store};
use crate::error::{ChatError, ChatResult};

/// Message columns plus a one-hop LEFT JOIN onto the reply target
const MESSAGE_SELECT: &str = "
    SELECT m.id, m.conversation_id, m.sender_id, m.content, m.media_url, m.media_type,
           m.replied_to_id, m.is_pinned, m.created_at, m.deleted_at,
           r.id, r.sender_id, r.content, r.media_url, r.deleted_at, m.updated_at
    FROM messages m
    LEFT JOIN messages r ON r.id = m.replied_to_id";

fn map_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let replied_to_id: Option<String> = row.get(6)?;
    let replied_to = match &replied_to_id {
        Some(target_id) => Some(reply_snapshot(row, target_id)?),
        None => None,
    };

    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        media_url: row.get(4)?,
        media_type: row.get(5)?,
        replied_to_id,
        replied_to,
        is_pinned: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(15)?,
        deleted_at: row.get(9)?,
    })
}

/// A target that is soft-deleted (or somehow missing) renders as a placeholder.
fn reply_snapshot(row: &Row<'_>, target_id: &str) -> rusqlite::Result<ReplySnapshot> {
    let found: Option<String> = row.get(10)?;
    let deleted_at: Option<i64> = row.get(14)?;
    if found.is_none() || deleted_at.is_some() {
        return Ok(ReplySnapshot {
            message_id: target_id.to_string(),
            sender_id: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
            content: Some(DELETED_PLACEHOLDER.to_string()),
            has_media: false,
            is_deleted: true,
        });
    }
    Ok(ReplySnapshot {
        message_id: target_id.to_string(),
        sender_id: row.get(11)?,
        content: row.get(12)?,
        has_media: row.get::<_, Option<String>>(13)?.is_some(),
        is_deleted: false,
    })
}

fn load_message(conn: &Connection, message_id: &str) -> ChatResult<Message> {
    conn.query_row(
        &format!("{} WHERE m.id = ?1", MESSAGE_SELECT),
        [message_id],
        map_message,
    )
    .optional()?
    .ok_or_else(|| ChatError::not_found(format!("message {}", message_id)))
}

/// Strictly after the message's current version, even within one millisecond
fn next_version(message: &Message) -> i64 {
    now_millis().max(message.updated_at + 1)
}

/// Newest message that has not been soft-deleted
pub(super) fn latest_visible_message(
    conn: &Connection,
    conversation_id: &str,
) -> ChatResult<Option<Message>> {
    Ok(conn
        .query_row(
            &format!(
                "{} WHERE m.conversation_id = ?1 AND m.deleted_at IS NULL
                 ORDER BY m.created_at DESC LIMIT 1",
                MESSAGE_SELECT
            ),
            [conversation_id],
            map_message,
        )
        .optional()?)
}

impl Store {
    /// Persist a new message and bump the conversation's `updated_at`.
    pub fn post_message(&self, sender_id: &str, input: &SendMessageInput) -> ChatResult<Message> {
        let content = input.normalized_content();
        let media = input.media().map_err(ChatError::Validation)?;
        if content.is_none() && media.is_none() {
            return Err(ChatError::validation(
                "a message needs content or a media attachment",
            ));
        }
        let conversation_id = input.conversation_id.as_str();

        self.write(|conn| {
            require_participant(conn, conversation_id, sender_id)?;

            // Strictly increasing per conversation, even within one millisecond
            let last: Option<i64> = conn.query_row(
                "SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?;
            let created_at = last.map_or(now_millis(), |last| now_millis().max(last + 1));

            if let Some(target_id) = input.replied_to_id.as_deref() {
                let target: Option<(String, i64)> = conn
                    .query_row(
                        "SELECT conversation_id, created_at FROM messages WHERE id = ?1",
                        [target_id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                match target {
                    Some((target_conversation, target_created))
                        if target_conversation == conversation_id =>
                    {
                        if target_created >= created_at {
                            return Err(ChatError::validation(
                                "a reply must point at an earlier message",
                            ));
                        }
                    }
                    _ => {
                        return Err(ChatError::not_found(format!(
                            "reply target {} in conversation {}",
                            target_id, conversation_id
                        )))
                    }
                }
            }

            let id = uuid::Uuid::new_v4().to_string();
            let (media_url, media_type) = match &media {
                Some(media) => (Some(media.url.as_str()), Some(media.mime_type.as_str())),
                None => (None, None),
            };
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content, media_url,
                                       media_type, replied_to_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    id,
                    conversation_id,
                    sender_id,
                    content,
                    media_url,
                    media_type,
                    input.replied_to_id,
                    created_at
                ],
            )?;
            touch_conversation(conn, conversation_id, created_at)?;

            debug!(message_id = %id, conversation_id, sender_id, "Message stored");
            load_message(conn, &id)
        })
    }

    pub fn set_message_pin(&self, message_id: &str, user_id: &str, pinned: bool) -> ChatResult<Message> {
        self.write(|conn| {
            let message = load_message(conn, message_id)?;
            require_participant(conn, &message.conversation_id, user_id)?;
            if pinned && message.is_deleted() {
                return Err(ChatError::validation("a deleted message cannot be pinned"));
            }
            if message.is_pinned == pinned {
                return Ok(message);
            }
            conn.execute(
                "UPDATE messages SET is_pinned = ?1, updated_at = ?2 WHERE id = ?3",
                (pinned, next_version(&message), message_id),
            )?;
            load_message(conn, message_id)
        })
    }

    /// Blank the payload and mark the message deleted. The row stays so replies
    /// keep a valid target.
    pub fn soft_delete_message(&self, message_id: &str, user_id: &str) -> ChatResult<Message> {
        self.write(|conn| {
            let message = load_message(conn, message_id)?;
            if message.sender_id != user_id {
                return Err(ChatError::forbidden("only the sender can delete a message"));
            }
            if message.is_deleted() {
                return Ok(message);
            }
            let version = next_version(&message);
            conn.execute(
                "UPDATE messages
                 SET content = NULL, media_url = NULL, media_type = NULL,
                     is_pinned = 0, deleted_at = ?1, updated_at = ?1
                 WHERE id = ?2",
                (version, message_id),
            )?;
            info!(message_id, conversation_id = %message.conversation_id, "Message deleted");
            load_message(conn, message_id)
        })
    }

    pub fn get_message(&self, message_id: &str) -> ChatResult<Message> {
        let conn = self.conn()?;
        load_message(&conn, message_id)
    }

    /// History after `cursor` (exclusive), oldest first.
    pub fn list_messages(
        &self,
        conversation_id: &str,
        user_id: &str,
        cursor: Option<i64>,
        limit: u32,
    ) -> ChatResult<MessagePage> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        self.read(|conn| {
            require_participant(conn, conversation_id, user_id)?;
            let mut stmt = conn.prepare(&format!(
                "{} WHERE m.conversation_id = ?1 AND m.created_at > ?2
                 ORDER BY m.created_at ASC LIMIT ?3",
                MESSAGE_SELECT
            ))?;
            // One extra row tells us whether another page exists
            let mut messages: Vec<Message> = stmt
                .query_map(
                    params![conversation_id, cursor.unwrap_or(i64::MIN), limit + 1],
                    map_message,
                )?
                .collect::<Result<_, _>>()?;

            let has_more = messages.len() > limit as usize;
            messages.truncate(limit as usize);
            let next_cursor = if has_more {
                messages.last().map(|m| m.created_at)
            } else {
                None
            };
            Ok(MessagePage {
                messages,
                next_cursor,
            })
        })
    }

    /// Pinned messages in chronological order.
    pub fn list_pinned_messages(&self, conversation_id: &str, user_id: &str) -> ChatResult<Vec<Message>> {
        self.read(|conn| {
            require_participant(conn, conversation_id, user_id)?;
            let mut stmt = conn.prepare(&format!(
                "{} WHERE m.conversation_id = ?1 AND m.is_pinned = 1
                 ORDER BY m.created_at ASC",
                MESSAGE_SELECT
            ))?;
            let pinned = stmt
                .query_map([conversation_id], map_message)?
                .collect::<Result<_, _>>()?;
            Ok(pinned)
        })
    }
}
