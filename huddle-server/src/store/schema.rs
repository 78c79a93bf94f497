use rusqlite::Connection;

use crate::error::ChatResult;

/// Idempotent; safe to run on every start.
pub(super) fn migrate(conn: &Connection) -> ChatResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            name TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Only one 'General Chat' may exist
        CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_general
            ON conversations(name) WHERE name = 'General Chat';

        -- Membership; pin state is per participant
        CREATE TABLE IF NOT EXISTS participants (
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            user_id TEXT NOT NULL,
            is_pinned INTEGER NOT NULL DEFAULT 0,
            joined_at INTEGER NOT NULL,
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            sender_id TEXT NOT NULL,
            content TEXT,
            media_url TEXT,
            media_type TEXT,
            replied_to_id TEXT REFERENCES messages(id),
            is_pinned INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER,
            CHECK (content IS NOT NULL OR media_url IS NOT NULL OR deleted_at IS NOT NULL)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_user_id ON participants(user_id);
        -- created_at is strictly increasing per conversation
        CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_conversation_created
            ON messages(conversation_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_pinned
            ON messages(conversation_id, created_at) WHERE is_pinned = 1;
        ",
    )?;

    // Migration: message version column for databases created before it existed
    let has_updated_at: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM pragma_table_info('messages') WHERE name = 'updated_at'",
            [],
            |row| row.get::<_, i32>(0),
        )
        .map(|count| count > 0)?;

    if !has_updated_at {
        conn.execute_batch(
            "ALTER TABLE messages ADD COLUMN updated_at INTEGER NOT NULL DEFAULT 0;
             UPDATE messages SET updated_at = COALESCE(deleted_at, created_at);",
        )?;
    }

    Ok(())
}
