//! Conversation & message store.
//!
//! SQLite behind an `r2d2` pool. Every public operation runs in its own
//! transaction on a pooled connection. Under WAL, readers never wait on the
//! writer. Writes use `BEGIN IMMEDIATE`, which takes the database-wide write
//! lock up front, so there is a single writer at a time across all
//! conversations. Write transactions are kept short (a few indexed statements)
//! and their read-then-write checks cannot interleave.
//!
//! All methods are blocking; async callers go through `spawn_blocking`.

mod conversations;
mod messages;
mod schema;

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tracing::info;

use crate::error::{ChatError, ChatResult};
use crate::hub::MembershipCheck;

pub use conversations::order_conversations;

pub type ConnectionPool = Pool<SqliteConnectionManager>;
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Runs on every new pooled connection.
#[derive(Debug)]
struct PragmaCustomizer;

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;\
             PRAGMA busy_timeout = {};\
             PRAGMA foreign_keys = ON;\
             PRAGMA synchronous = NORMAL;",
            BUSY_TIMEOUT_MS
        ))
    }
}

#[derive(Clone)]
pub struct Store {
    pool: ConnectionPool,
}

impl Store {
    /// Open (or create) a file-backed store and bring its schema up to date
    pub fn open(path: &str, pool_size: u32) -> ChatResult<Self> {
        let builder = Pool::builder().max_size(pool_size.max(1));
        let store = Self::with_manager(builder, SqliteConnectionManager::file(path))?;
        info!(path, pool_size, "Conversation store ready");
        Ok(store)
    }

    /// Private in-memory database. Each SQLite memory connection is its own
    /// database, so the pool is pinned to a single connection.
    pub fn in_memory() -> ChatResult<Self> {
        let builder = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None);
        Self::with_manager(builder, SqliteConnectionManager::memory())
    }

    fn with_manager(
        builder: r2d2::Builder<SqliteConnectionManager>,
        manager: SqliteConnectionManager,
    ) -> ChatResult<Self> {
        let pool = builder
            .connection_timeout(Duration::from_secs(5))
            .connection_customizer(Box::new(PragmaCustomizer))
            .build(manager)?;
        let conn = pool.get()?;
        schema::migrate(&conn)?;
        drop(conn);
        Ok(Self { pool })
    }

    fn conn(&self) -> ChatResult<PooledConnection> {
        Ok(self.pool.get()?)
    }

    /// Run `f` inside an immediate (write-locking) transaction and commit.
    fn write<T>(&self, f: impl FnOnce(&Connection) -> ChatResult<T>) -> ChatResult<T> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&*tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Run `f` inside a read transaction so multi-query reads see one snapshot.
    fn read<T>(&self, f: impl FnOnce(&Connection) -> ChatResult<T>) -> ChatResult<T> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let out = f(&*tx)?;
        tx.finish()?;
        Ok(out)
    }

    pub fn is_participant(&self, conversation_id: &str, user_id: &str) -> ChatResult<bool> {
        let conn = self.conn()?;
        is_participant(&conn, conversation_id, user_id)
    }
}

impl MembershipCheck for Store {
    fn check_membership(&self, conversation_id: &str, user_id: &str) -> ChatResult<()> {
        let conn = self.conn()?;
        require_participant(&conn, conversation_id, user_id)
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn conversation_exists(conn: &Connection, conversation_id: &str) -> ChatResult<bool> {
    let found: Option<i32> = conn
        .query_row(
            "SELECT 1 FROM conversations WHERE id = ?1",
            [conversation_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn is_participant(conn: &Connection, conversation_id: &str, user_id: &str) -> ChatResult<bool> {
    let found: Option<i32> = conn
        .query_row(
            "SELECT 1 FROM participants WHERE conversation_id = ?1 AND user_id = ?2",
            [conversation_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// NotFound when the conversation is missing, Forbidden when the user is not in it
fn require_participant(conn: &Connection, conversation_id: &str, user_id: &str) -> ChatResult<()> {
    if !conversation_exists(conn, conversation_id)? {
        return Err(ChatError::not_found(format!(
            "conversation {}",
            conversation_id
        )));
    }
    if !is_participant(conn, conversation_id, user_id)? {
        return Err(ChatError::forbidden(format!(
            "{} is not a participant of conversation {}",
            user_id, conversation_id
        )));
    }
    Ok(())
}
