//! Conversation persistence contract and its `SQLite` implementation.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;
use tracing::debug;

use super::errors::{StoreError, StoreResult};
use super::ids::{ConversationId, UserId};
use super::model::{Conversation, ConversationType, Message};

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Persistence operations for conversations.
///
/// Each `replace_messages` call is atomic on its own. Two writers racing on
/// the same id are not ordered: the last write wins.
pub trait ConversationStore: Send + Sync {
    /// Create an empty conversation with a fresh id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn create(
        &self,
        owner: UserId,
        conversation_type: ConversationType,
        title: &str,
    ) -> StoreFuture<'_, StoreResult<Conversation>>;

    /// Fetch a conversation by id.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if no such conversation exists.
    fn get_by_id(&self, id: ConversationId) -> StoreFuture<'_, StoreResult<Conversation>>;

    /// Replace the whole message list and refresh `updated_at`.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if no such conversation exists, in
    /// which case nothing is written.
    fn replace_messages(
        &self,
        id: ConversationId,
        messages: Vec<Message>,
    ) -> StoreFuture<'_, StoreResult<Conversation>>;

    /// List the conversations of one owner, most recently updated first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_by_owner(&self, owner: UserId) -> StoreFuture<'_, StoreResult<Vec<Conversation>>>;

    /// Permanently delete a conversation.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if no such conversation exists.
    fn delete_by_id(&self, id: ConversationId) -> StoreFuture<'_, StoreResult<()>>;
}

type RawRow = (String, String, String, String, String, i64, i64);

const COLUMNS: &str = "id, user_id, conversation_type, title, messages_json, created_at, updated_at";

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn millis_to_datetime(ms: i64) -> StoreResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::InvalidRecord(format!("invalid timestamp: {ms}")))
}

fn decode_row(raw: RawRow) -> StoreResult<Conversation> {
    let (id, user_id, conversation_type, title, messages_json, created_at, updated_at) = raw;
    Ok(Conversation {
        id: ConversationId::from_str(&id)
            .map_err(|err| StoreError::InvalidRecord(format!("invalid conversation id: {err}")))?,
        user_id: UserId::from_str(&user_id)
            .map_err(|err| StoreError::InvalidRecord(format!("invalid user id: {err}")))?,
        conversation_type: ConversationType::from_str(&conversation_type)
            .map_err(|err| StoreError::InvalidRecord(err.to_string()))?,
        title,
        messages: serde_json::from_str(&messages_json)?,
        created_at: millis_to_datetime(created_at)?,
        updated_at: millis_to_datetime(updated_at)?,
    })
}

/// `SQLite` implementation of the conversation store.
///
/// The message list lives in a JSON column, so a replace is a single-row
/// update and never exposes a partially written transcript.
pub struct SqliteConversationStore {
    conn: Arc<Connection>,
    table: String,
}

impl SqliteConversationStore {
    /// Table name for conversations.
    pub const DEFAULT_TABLE: &'static str = "conversations";

    /// Open (or create) the database at `path`. `":memory:"` gives a private
    /// in-memory database.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn open(path: &str) -> StoreResult<Self> {
        let conn = Connection::open(path).await?;
        Self::new(Arc::new(conn)).await
    }

    /// Initialize the store on an existing connection and create the table if
    /// it doesn't exist.
    ///
    /// # Errors
    /// Returns an error if database operations fail.
    pub async fn new(conn: Arc<Connection>) -> StoreResult<Self> {
        let table = Self::DEFAULT_TABLE.to_string();
        let table_name = table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    conversation_type TEXT NOT NULL,
                    title TEXT NOT NULL DEFAULT '',
                    messages_json TEXT NOT NULL DEFAULT '[]',
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{table_name}_owner
                    ON {table_name} (user_id, updated_at DESC);"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, table })
    }
}

impl ConversationStore for SqliteConversationStore {
    fn create(
        &self,
        owner: UserId,
        conversation_type: ConversationType,
        title: &str,
    ) -> StoreFuture<'_, StoreResult<Conversation>> {
        let title = title.to_string();
        Box::pin(async move {
            let mut conversation = Conversation::new(owner, conversation_type, title);
            // Stored at millisecond precision; keep the returned value identical.
            let now_ms = conversation.created_at.timestamp_millis();
            conversation.created_at = millis_to_datetime(now_ms)?;
            conversation.updated_at = conversation.created_at;

            let table = self.table.clone();
            let params = (
                conversation.id.to_string(),
                owner.to_string(),
                conversation_type.as_str(),
                conversation.title.clone(),
                serde_json::to_string(&conversation.messages)?,
            );

            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT INTO {table} ({COLUMNS})
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)"
                        ),
                        rusqlite::params![params.0, params.1, params.2, params.3, params.4, now_ms],
                    )?;
                    Ok(())
                })
                .await?;

            debug!(conversation_id = %conversation.id, "Inserted conversation row");
            Ok(conversation)
        })
    }

    fn get_by_id(&self, id: ConversationId) -> StoreFuture<'_, StoreResult<Conversation>> {
        Box::pin(async move {
            let table = self.table.clone();
            let id_str = id.to_string();
            let raw = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            &format!("SELECT {COLUMNS} FROM {table} WHERE id = ?1"),
                            [&id_str],
                            read_raw,
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;

            raw.map_or(Err(StoreError::NotFound(id)), decode_row)
        })
    }

    fn replace_messages(
        &self,
        id: ConversationId,
        messages: Vec<Message>,
    ) -> StoreFuture<'_, StoreResult<Conversation>> {
        Box::pin(async move {
            let table = self.table.clone();
            let id_str = id.to_string();
            let messages_json = serde_json::to_string(&messages)?;
            let now_ms = Utc::now().timestamp_millis();

            let raw = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let changed = tx.execute(
                        &format!(
                            "UPDATE {table}
                             SET messages_json = ?1, updated_at = MAX(updated_at, ?2)
                             WHERE id = ?3"
                        ),
                        rusqlite::params![messages_json, now_ms, id_str],
                    )?;
                    if changed == 0 {
                        return Ok(None);
                    }
                    let row = tx.query_row(
                        &format!("SELECT {COLUMNS} FROM {table} WHERE id = ?1"),
                        [&id_str],
                        read_raw,
                    )?;
                    tx.commit()?;
                    Ok(Some(row))
                })
                .await?;

            raw.map_or(Err(StoreError::NotFound(id)), decode_row)
        })
    }

    fn list_by_owner(&self, owner: UserId) -> StoreFuture<'_, StoreResult<Vec<Conversation>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let owner_str = owner.to_string();
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {COLUMNS} FROM {table}
                         WHERE user_id = ?1
                         ORDER BY updated_at DESC, id"
                    ))?;
                    let rows = stmt
                        .query_map([&owner_str], read_raw)?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;

            rows.into_iter().map(decode_row).collect()
        })
    }

    fn delete_by_id(&self, id: ConversationId) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let table = self.table.clone();
            let id_str = id.to_string();
            let deleted = self
                .conn
                .call(move |conn| {
                    let n = conn.execute(
                        &format!("DELETE FROM {table} WHERE id = ?1"),
                        rusqlite::params![id_str],
                    )?;
                    Ok(n)
                })
                .await?;

            if deleted == 0 {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        })
    }
}
