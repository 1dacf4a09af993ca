use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chat_core::{ConversationSummary, Message};
use rusqlite::{params, Connection};

use crate::{MessageStore, StoreError, StoreResult};

/// Sqlite-backed [`MessageStore`].
///
/// Every call opens a short-lived connection on the blocking pool; the
/// session manager issues these fire-and-forget, so holding a long-lived
/// connection hostage to one slow write is not worth it here.
#[derive(Debug, Clone)]
pub struct SqliteMessageStore {
    db_path: PathBuf,
}

impl SqliteMessageStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    async fn with_connection<T, F>(&self, func: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let connection = open_connection(&db_path)?;
            func(&connection)
        })
        .await
        .map_err(|error| StoreError::Task(error.to_string()))?
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn init(&self) -> StoreResult<()> {
        self.with_connection(|connection| {
            connection.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS messages (
                    id TEXT PRIMARY KEY,
                    content TEXT NOT NULL,
                    is_user INTEGER NOT NULL,
                    timestamp INTEGER NOT NULL,
                    conversation_id INTEGER NOT NULL,
                    attachment_ref TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_messages_conversation
                    ON messages(conversation_id, timestamp);
                "#,
            )?;
            Ok(())
        })
        .await
    }

    async fn read_range(&self, conversation_id: i64) -> StoreResult<Vec<Message>> {
        self.with_connection(move |connection| {
            let mut stmt = connection.prepare(
                "SELECT id, content, is_user, timestamp, conversation_id, attachment_ref
                 FROM messages WHERE conversation_id = ?1 ORDER BY timestamp ASC",
            )?;
            let mut rows = stmt.query(params![conversation_id])?;
            let mut messages = Vec::new();

            while let Some(row) = rows.next()? {
                messages.push(Message {
                    id: row.get(0)?,
                    content: row.get(1)?,
                    is_user: row.get::<_, i64>(2)? != 0,
                    timestamp: row.get(3)?,
                    conversation_id: row.get(4)?,
                    attachment_ref: row.get(5)?,
                });
            }

            Ok(messages)
        })
        .await
    }

    async fn append(&self, message: &Message) -> StoreResult<()> {
        let message = message.clone();
        self.with_connection(move |connection| {
            connection.execute(
                r#"
                INSERT INTO messages (id, content, is_user, timestamp, conversation_id, attachment_ref)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO UPDATE SET
                    content = excluded.content,
                    is_user = excluded.is_user,
                    timestamp = excluded.timestamp,
                    conversation_id = excluded.conversation_id,
                    attachment_ref = excluded.attachment_ref
                "#,
                params![
                    message.id,
                    message.content,
                    message.is_user as i64,
                    message.timestamp,
                    message.conversation_id,
                    message.attachment_ref,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_content(&self, id: &str, content: &str) -> StoreResult<()> {
        let id = id.to_string();
        let content = content.to_string();
        self.with_connection(move |connection| {
            connection.execute(
                "UPDATE messages SET content = ?1 WHERE id = ?2",
                params![content, id],
            )?;
            Ok(())
        })
        .await
    }

    async fn clear(&self, conversation_id: i64) -> StoreResult<()> {
        self.with_connection(move |connection| {
            let deleted = connection.execute(
                "DELETE FROM messages WHERE conversation_id = ?1",
                params![conversation_id],
            )?;
            log::debug!("cleared {deleted} messages for conversation {conversation_id}");
            Ok(())
        })
        .await
    }

    async fn summaries(&self) -> StoreResult<Vec<ConversationSummary>> {
        self.with_connection(|connection| {
            let mut stmt = connection.prepare(
                "SELECT conversation_id, MAX(timestamp) AS latest
                 FROM messages GROUP BY conversation_id ORDER BY latest DESC",
            )?;
            let mut rows = stmt.query([])?;
            let mut summaries = Vec::new();

            while let Some(row) = rows.next()? {
                summaries.push(ConversationSummary {
                    conversation_id: row.get(0)?,
                    latest: row.get(1)?,
                });
            }

            Ok(summaries)
        })
        .await
    }
}

fn open_connection(path: &Path) -> StoreResult<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let connection = Connection::open(path)?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        "#,
    )?;
    Ok(connection)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    async fn open_store(dir: &tempfile::TempDir) -> SqliteMessageStore {
        let store = SqliteMessageStore::new(dir.path().join("chat.db"));
        store.init().await.expect("init store");
        store
    }

    fn message(id: &str, content: &str, is_user: bool, timestamp: i64, conversation: i64) -> Message {
        Message {
            id: id.to_string(),
            content: content.to_string(),
            is_user,
            timestamp,
            conversation_id: conversation,
            attachment_ref: None,
        }
    }

    #[tokio::test]
    async fn read_range_returns_one_conversation_ordered_by_time() {
        let dir = tempdir().expect("temp dir");
        let store = open_store(&dir).await;

        store
            .append(&message("b", "second", false, 200, 1))
            .await
            .expect("append");
        store
            .append(&message("a", "first", true, 100, 1))
            .await
            .expect("append");
        store
            .append(&message("c", "other conversation", true, 150, 2))
            .await
            .expect("append");

        let loaded = store.read_range(1).await.expect("read");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].content, "first");
        assert_eq!(loaded[1].content, "second");
    }

    #[tokio::test]
    async fn append_replaces_rows_with_the_same_id() {
        let dir = tempdir().expect("temp dir");
        let store = open_store(&dir).await;

        store
            .append(&message("a", "draft", false, 100, 1))
            .await
            .expect("append");
        store
            .append(&message("a", "final", false, 100, 1))
            .await
            .expect("append again");

        let loaded = store.read_range(1).await.expect("read");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, "final");
    }

    #[tokio::test]
    async fn update_content_is_a_point_update_by_id() {
        let dir = tempdir().expect("temp dir");
        let store = open_store(&dir).await;

        store
            .append(&message("a", "", false, 100, 1))
            .await
            .expect("append");
        store
            .append(&message("b", "untouched", true, 50, 1))
            .await
            .expect("append");
        store.update_content("a", "你好").await.expect("update");

        let loaded = store.read_range(1).await.expect("read");
        assert_eq!(loaded[0].content, "untouched");
        assert_eq!(loaded[1].content, "你好");
    }

    #[tokio::test]
    async fn clear_removes_only_the_given_conversation() {
        let dir = tempdir().expect("temp dir");
        let store = open_store(&dir).await;

        store
            .append(&message("a", "gone", true, 100, 1))
            .await
            .expect("append");
        store
            .append(&message("b", "kept", true, 100, 2))
            .await
            .expect("append");
        store.clear(1).await.expect("clear");

        assert!(store.read_range(1).await.expect("read").is_empty());
        assert_eq!(store.read_range(2).await.expect("read").len(), 1);
    }

    #[tokio::test]
    async fn summaries_group_by_conversation_newest_first() {
        let dir = tempdir().expect("temp dir");
        let store = open_store(&dir).await;

        store
            .append(&message("a", "old", true, 100, 1))
            .await
            .expect("append");
        store
            .append(&message("b", "newer", false, 300, 1))
            .await
            .expect("append");
        store
            .append(&message("c", "newest elsewhere", true, 500, 2))
            .await
            .expect("append");

        let summaries = store.summaries().await.expect("summaries");
        assert_eq!(
            summaries,
            vec![
                ConversationSummary {
                    conversation_id: 2,
                    latest: 500
                },
                ConversationSummary {
                    conversation_id: 1,
                    latest: 300
                },
            ]
        );
    }

    #[tokio::test]
    async fn attachment_refs_survive_a_round_trip() {
        let dir = tempdir().expect("temp dir");
        let store = open_store(&dir).await;

        let stored = message("a", "[图片]", true, 100, 1);
        store
            .append(&stored.clone().with_attachment("content://img/9"))
            .await
            .expect("append");

        let loaded = store.read_range(1).await.expect("read");
        assert_eq!(loaded[0].attachment_ref.as_deref(), Some("content://img/9"));
    }
}
