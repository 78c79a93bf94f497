use huddle_proto::{Conversation, ConversationSummary, GENERAL_CHAT_NAME};
use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use super::messages::latest_visible_message;
use super::{now_millis, require_participant, Store};
use crate::error::{ChatError, ChatResult};

impl Store {
    /// Create a conversation. The creator always becomes a participant.
    pub fn create_conversation(
        &self,
        creator: &str,
        participant_ids: &[String],
        name: Option<&str>,
    ) -> ChatResult<Conversation> {
        let mut members: Vec<String> = Vec::with_capacity(participant_ids.len() + 1);
        for id in participant_ids.iter().map(|id| id.trim()) {
            if !id.is_empty() && !members.iter().any(|m| m == id) {
                members.push(id.to_string());
            }
        }
        if members.is_empty() {
            return Err(ChatError::validation("participantIds must not be empty"));
        }
        if !members.iter().any(|m| m == creator) {
            members.insert(0, creator.to_string());
        }
        let name = normalize_name(name);

        self.write(|conn| {
            if name.as_deref() == Some(GENERAL_CHAT_NAME) && find_general_chat(conn)?.is_some() {
                return Err(ChatError::validation(format!(
                    "'{}' already exists",
                    GENERAL_CHAT_NAME
                )));
            }
            let id = uuid::Uuid::new_v4().to_string();
            insert_conversation(conn, &id, name.as_deref(), &members)?;
            info!(conversation_id = %id, participants = members.len(), "Conversation created");
            load_conversation(conn, &id, creator)
        })
    }

    /// Add the user to the General Chat, creating it on first use.
    pub fn join_general_chat(&self, user_id: &str) -> ChatResult<Conversation> {
        self.write(|conn| {
            let id = match find_general_chat(conn)? {
                Some(id) => {
                    conn.execute(
                        "INSERT OR IGNORE INTO participants (conversation_id, user_id, joined_at)
                         VALUES (?1, ?2, ?3)",
                        (&id, user_id, now_millis()),
                    )?;
                    id
                }
                None => {
                    let id = uuid::Uuid::new_v4().to_string();
                    insert_conversation(conn, &id, Some(GENERAL_CHAT_NAME), &[user_id.to_string()])?;
                    info!(conversation_id = %id, "General Chat created");
                    id
                }
            };
            load_conversation(conn, &id, user_id)
        })
    }

    /// Pin or unpin a conversation for one participant.
    pub fn set_conversation_pin(
        &self,
        conversation_id: &str,
        user_id: &str,
        pinned: bool,
    ) -> ChatResult<Conversation> {
        self.write(|conn| {
            require_participant(conn, conversation_id, user_id)?;
            conn.execute(
                "UPDATE participants SET is_pinned = ?1 WHERE conversation_id = ?2 AND user_id = ?3",
                (pinned, conversation_id, user_id),
            )?;
            load_conversation(conn, conversation_id, user_id)
        })
    }

    pub fn rename_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
        name: Option<&str>,
    ) -> ChatResult<Conversation> {
        let name = normalize_name(name);
        if name.as_deref() == Some(GENERAL_CHAT_NAME) {
            return Err(ChatError::validation(format!(
                "'{}' is reserved",
                GENERAL_CHAT_NAME
            )));
        }
        self.write(|conn| {
            require_participant(conn, conversation_id, user_id)?;
            let current: Option<String> = conn.query_row(
                "SELECT name FROM conversations WHERE id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?;
            if current.as_deref() == Some(GENERAL_CHAT_NAME) {
                return Err(ChatError::validation(format!(
                    "'{}' cannot be renamed",
                    GENERAL_CHAT_NAME
                )));
            }
            conn.execute(
                "UPDATE conversations SET name = ?1 WHERE id = ?2",
                (&name, conversation_id),
            )?;
            load_conversation(conn, conversation_id, user_id)
        })
    }

    pub fn get_conversation(&self, conversation_id: &str, viewer: &str) -> ChatResult<Conversation> {
        self.read(|conn| {
            require_participant(conn, conversation_id, viewer)?;
            load_conversation(conn, conversation_id, viewer)
        })
    }

    /// Every conversation the user belongs to, in listing order.
    pub fn list_conversations(&self, user_id: &str) -> ChatResult<Vec<ConversationSummary>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id FROM conversations c
                 JOIN participants p ON p.conversation_id = c.id
                 WHERE p.user_id = ?1",
            )?;
            let ids: Vec<String> = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<Result<_, _>>()?;

            let mut summaries = Vec::with_capacity(ids.len());
            for id in ids {
                let conversation = load_conversation(conn, &id, user_id)?;
                let latest = latest_visible_message(conn, &id)?;
                summaries.push(ConversationSummary {
                    conversation,
                    preview: latest
                        .as_ref()
                        .and_then(|m| m.preview_text())
                        .map(String::from),
                    last_message_at: latest.map(|m| m.created_at),
                });
            }

            order_conversations(&mut summaries);
            Ok(summaries)
        })
    }
}

/// Pinned first, then an unpinned General Chat, then the rest; most recently
/// updated first inside each group.
pub fn order_conversations(summaries: &mut [ConversationSummary]) {
    fn group(summary: &ConversationSummary) -> u8 {
        let conversation = &summary.conversation;
        if conversation.is_pinned {
            0
        } else if conversation.is_general() {
            1
        } else {
            2
        }
    }

    summaries.sort_by(|a, b| {
        group(a)
            .cmp(&group(b))
            .then_with(|| b.conversation.updated_at.cmp(&a.conversation.updated_at))
            .then_with(|| a.conversation.id.cmp(&b.conversation.id))
    });
}

fn normalize_name(name: Option<&str>) -> Option<String> {
    name.map(str::trim)
        .filter(|n| !n.is_empty())
        .map(String::from)
}

fn find_general_chat(conn: &Connection) -> ChatResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT id FROM conversations WHERE name = ?1",
            [GENERAL_CHAT_NAME],
            |row| row.get(0),
        )
        .optional()?)
}

fn insert_conversation(
    conn: &Connection,
    id: &str,
    name: Option<&str>,
    members: &[String],
) -> ChatResult<()> {
    let now = now_millis();
    conn.execute(
        "INSERT INTO conversations (id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
        (id, name, now),
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO participants (conversation_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
    )?;
    for member in members {
        stmt.execute((id, member, now))?;
    }
    Ok(())
}

/// Load a conversation with its participants; `is_pinned` is the viewer's flag.
pub(super) fn load_conversation(
    conn: &Connection,
    conversation_id: &str,
    viewer: &str,
) -> ChatResult<Conversation> {
    let row = conn
        .query_row(
            "SELECT id, name, created_at, updated_at FROM conversations WHERE id = ?1",
            [conversation_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;
    let Some((id, name, created_at, updated_at)) = row else {
        return Err(ChatError::not_found(format!(
            "conversation {}",
            conversation_id
        )));
    };

    let mut stmt = conn.prepare(
        "SELECT user_id, is_pinned FROM participants
         WHERE conversation_id = ?1
         ORDER BY joined_at ASC, user_id ASC",
    )?;
    let members: Vec<(String, bool)> = stmt
        .query_map([conversation_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<_, _>>()?;

    let is_pinned = members
        .iter()
        .any(|(user_id, pinned)| *pinned && user_id == viewer);

    Ok(Conversation {
        id,
        name,
        participant_ids: members.into_iter().map(|(user_id, _)| user_id).collect(),
        is_pinned,
        created_at,
        updated_at,
    })
}

/// Bump `updated_at`, never moving it backwards.
pub(super) fn touch_conversation(conn: &Connection, conversation_id: &str, at: i64) -> ChatResult<()> {
    conn.execute(
        "UPDATE conversations SET updated_at = MAX(updated_at, ?1) WHERE id = ?2",
        (at, conversation_id),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{ids, text};

    fn set_updated_at(store: &Store, conversation_id: &str, at: i64) {
        store
            .conn()
            .unwrap()
            .execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                (at, conversation_id),
            )
            .unwrap();
    }

    #[test]
    fn test_creator_is_added_once() {
        let store = Store::in_memory().unwrap();
        let conversation = store
            .create_conversation("u1", &ids(&["u2", "u2", " u3 ", "u1"]), Some("  Team "))
            .unwrap();

        let mut members = conversation.participant_ids.clone();
        members.sort();
        assert_eq!(members, vec!["u1", "u2", "u3"]);
        assert_eq!(conversation.name.as_deref(), Some("Team"));
        assert_eq!(conversation.created_at, conversation.updated_at);
        assert!(!conversation.is_pinned);
    }

    #[test]
    fn test_create_without_participants_fails() {
        let store = Store::in_memory().unwrap();
        let err = store.create_conversation("u1", &ids(&[" "]), None).unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[test]
    fn test_general_chat_is_unique() {
        let store = Store::in_memory().unwrap();
        store
            .create_conversation("u1", &ids(&["u2"]), Some(GENERAL_CHAT_NAME))
            .unwrap();
        let err = store
            .create_conversation("u3", &ids(&["u4"]), Some(GENERAL_CHAT_NAME))
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[test]
    fn test_join_general_chat_creates_then_joins() {
        let store = Store::in_memory().unwrap();
        let first = store.join_general_chat("u1").unwrap();
        assert!(first.is_general());

        let second = store.join_general_chat("u2").unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.participant_ids, vec!["u1", "u2"]);

        let again = store.join_general_chat("u2").unwrap();
        assert_eq!(again.participant_ids.len(), 2);
    }

    #[test]
    fn test_pin_is_per_participant() {
        let store = Store::in_memory().unwrap();
        let conversation = store.create_conversation("u1", &ids(&["u2"]), None).unwrap();

        let pinned = store.set_conversation_pin(&conversation.id, "u1", true).unwrap();
        assert!(pinned.is_pinned);
        assert!(!store.get_conversation(&conversation.id, "u2").unwrap().is_pinned);

        let err = store
            .set_conversation_pin(&conversation.id, "u9", true)
            .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
    }

    #[test]
    fn test_rename_rules() {
        let store = Store::in_memory().unwrap();
        let conversation = store.create_conversation("u1", &ids(&["u2"]), None).unwrap();

        let renamed = store
            .rename_conversation(&conversation.id, "u2", Some("Barn"))
            .unwrap();
        assert_eq!(renamed.name.as_deref(), Some("Barn"));
        assert_eq!(renamed.updated_at, conversation.updated_at);

        let cleared = store.rename_conversation(&conversation.id, "u2", Some("")).unwrap();
        assert!(cleared.name.is_none());

        let err = store
            .rename_conversation(&conversation.id, "u1", Some(GENERAL_CHAT_NAME))
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));

        let general = store.join_general_chat("u1").unwrap();
        let err = store
            .rename_conversation(&general.id, "u1", Some("Lounge"))
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));

        let err = store
            .rename_conversation(&conversation.id, "u3", Some("Nope"))
            .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
    }

    #[test]
    fn test_listing_order_pinned_general_then_recent() {
        let store = Store::in_memory().unwrap();
        let general = store.join_general_chat("u1").unwrap();
        let team = store
            .create_conversation("u1", &ids(&["u2"]), Some("Team"))
            .unwrap();
        let other = store
            .create_conversation("u1", &ids(&["u3"]), Some("Other"))
            .unwrap();

        set_updated_at(&store, &general.id, 1_000);
        set_updated_at(&store, &team.id, 2_000);
        set_updated_at(&store, &other.id, 3_000);
        store.set_conversation_pin(&team.id, "u1", true).unwrap();

        let listed: Vec<String> = store
            .list_conversations("u1")
            .unwrap()
            .into_iter()
            .map(|s| s.conversation.id)
            .collect();
        assert_eq!(listed, vec![team.id.clone(), general.id, other.id]);

        // u2 has not pinned anything
        let for_u2 = store.list_conversations("u2").unwrap();
        assert_eq!(for_u2.len(), 1);
        assert!(!for_u2[0].conversation.is_pinned);
    }

    #[test]
    fn test_new_message_moves_conversation_up() {
        let store = Store::in_memory().unwrap();
        let older = store.create_conversation("u1", &ids(&["u2"]), None).unwrap();
        let newer = store.create_conversation("u1", &ids(&["u3"]), None).unwrap();
        set_updated_at(&store, &older.id, 1_000);
        set_updated_at(&store, &newer.id, 2_000);

        store.post_message("u2", &text(&older.id, "bump")).unwrap();

        let listed = store.list_conversations("u1").unwrap();
        assert_eq!(listed[0].conversation.id, older.id);
        assert_eq!(listed[0].preview.as_deref(), Some("bump"));
        assert!(listed[1].preview.is_none());
        assert!(listed[1].last_message_at.is_none());
    }
}
