use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task;
use uuid::Uuid;

use crate::config::APP_NAME;
use crate::models::{Conversation, ConversationPatch, Message, NewMessage, Role};
use crate::services::remote::{RemoteStore, StoreError};

/// SQLite mirror of the hosted schema, used when no backend is configured.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Database(format!(
                    "Failed to create data directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    pub fn open_default() -> Result<Self, StoreError> {
        Self::open(&Self::default_path())
    }

    /// Create an in-memory store (used for testing)
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn default_path() -> PathBuf {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".local/share")
            });
        data_dir.join(APP_NAME).join(format!("{APP_NAME}.db"))
    }

    fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            );",
        )?;

        let version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if version < 1 {
            conn.execute_batch(
                "CREATE TABLE conversations (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    title TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE messages (
                    id TEXT PRIMARY KEY,
                    conversation_id TEXT NOT NULL,
                    role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
                );

                CREATE INDEX idx_conversations_user ON conversations(user_id, updated_at DESC);
                CREATE INDEX idx_messages_conversation ON messages(conversation_id, created_at);

                INSERT INTO schema_version (version) VALUES (1);",
            )?;
        }

        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::Database("Connection lock poisoned".to_string()))?;
            f(&conn)
        })
        .await?
    }

    fn timestamp(ts: &DateTime<Utc>) -> String {
        // Fixed width so that text ordering matches time ordering.
        ts.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::Database(format!("Bad timestamp {raw:?}: {e}")))
    }

    fn row_to_conversation(row: &rusqlite::Row) -> Result<Conversation, StoreError> {
        let created_str: String = row.get(3)?;
        let updated_str: String = row.get(4)?;
        Ok(Conversation {
            id: row.get(0)?,
            user_id: Some(row.get(1)?),
            title: row.get(2)?,
            created_at: Self::parse_timestamp(&created_str)?,
            updated_at: Self::parse_timestamp(&updated_str)?,
        })
    }

    fn row_to_message(row: &rusqlite::Row) -> Result<Message, StoreError> {
        let role_str: String = row.get(2)?;
        let created_str: String = row.get(4)?;
        Ok(Message {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            role: Role::from_str(&role_str)
                .ok_or_else(|| StoreError::Database(format!("Unknown role: {role_str}")))?,
            content: row.get(3)?,
            created_at: Self::parse_timestamp(&created_str)?,
        })
    }

    fn query_conversation(conn: &Connection, id: &str) -> Result<Conversation, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT id, user_id, title, created_at, updated_at FROM conversations WHERE id = ?1",
        )?;
        let result = stmt
            .query_row(params![id], |row| Ok(Self::row_to_conversation(row)))
            .optional()?;
        match result {
            Some(conversation) => conversation,
            None => Err(StoreError::NotFound {
                entity: "conversation",
                id: id.to_string(),
            }),
        }
    }
}

#[async_trait]
impl RemoteStore for SqliteStore {
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError> {
        let user_id = user_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, title, created_at, updated_at
                 FROM conversations WHERE user_id = ?1
                 ORDER BY updated_at DESC, rowid DESC",
            )?;
            let conversations = stmt
                .query_map(params![user_id], |row| Ok(Self::row_to_conversation(row)))?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;
            Ok(conversations)
        })
        .await
    }

    async fn get_conversation(&self, id: &str) -> Result<Conversation, StoreError> {
        let id = id.to_string();
        self.run(move |conn| Self::query_conversation(conn, &id)).await
    }

    async fn insert_conversation(
        &self,
        user_id: &str,
        title: &str,
    ) -> Result<Conversation, StoreError> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            user_id: Some(user_id.to_string()),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        };
        let row = conversation.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO conversations (id, user_id, title, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    row.id,
                    row.user_id,
                    row.title,
                    Self::timestamp(&row.created_at),
                    Self::timestamp(&row.updated_at),
                ],
            )?;
            // Read back so the returned timestamps carry the stored precision.
            Self::query_conversation(conn, &row.id)
        })
        .await
    }

    async fn update_conversation(
        &self,
        id: &str,
        patch: &ConversationPatch,
    ) -> Result<Conversation, StoreError> {
        let id = id.to_string();
        let patch = patch.clone();
        self.run(move |conn| {
            let updated_at = Self::timestamp(&patch.updated_at);
            let changed = match &patch.title {
                Some(title) => conn.execute(
                    "UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3",
                    params![title, updated_at, id],
                )?,
                None => conn.execute(
                    "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                    params![updated_at, id],
                )?,
            };
            if changed == 0 {
                return Err(StoreError::NotFound {
                    entity: "conversation",
                    id,
                });
            }
            Self::query_conversation(conn, &id)
        })
        .await
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        let conversation_id = conversation_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, role, content, created_at
                 FROM messages WHERE conversation_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let messages = stmt
                .query_map(params![conversation_id], |row| Ok(Self::row_to_message(row)))?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
        .await
    }

    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let conversation_id = conversation_id.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, role, content, created_at
                 FROM messages WHERE conversation_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2",
            )?;
            let messages = stmt
                .query_map(params![conversation_id, limit], |row| {
                    Ok(Self::row_to_message(row))
                })?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
        .await
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Message, StoreError> {
        let row = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: message.conversation_id.clone(),
            role: message.role,
            content: message.content.clone(),
            created_at: Utc::now(),
        };
        self.run(move |conn| {
            let created_at = Self::timestamp(&row.created_at);
            conn.execute(
                "INSERT INTO messages (id, conversation_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    row.id,
                    row.conversation_id,
                    row.role.as_str(),
                    row.content,
                    created_at,
                ],
            )?;
            Ok(Message {
                created_at: Self::parse_timestamp(&created_at)?,
                ..row
            })
        })
        .await
    }
}
