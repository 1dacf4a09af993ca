//! Durable per-conversation message log.
//!
//! The store is a shared, append-mostly resource addressed by conversation
//! id plus message id. Callers treat it as eventually consistent with their
//! in-memory state; a store failure must never take down a turn.

mod sqlite;

pub use sqlite::SqliteMessageStore;

use async_trait::async_trait;
use chat_core::{ConversationSummary, Message};
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage task join error: {0}")]
    Task(String),
}

/// Key-ordered message log.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Create the schema if it does not exist yet.
    async fn init(&self) -> StoreResult<()>;

    /// All messages of one conversation, ordered by timestamp ascending.
    async fn read_range(&self, conversation_id: i64) -> StoreResult<Vec<Message>>;

    /// Insert a message; an existing row with the same id is replaced.
    async fn append(&self, message: &Message) -> StoreResult<()>;

    /// Point update of one message's content by id.
    async fn update_content(&self, id: &str, content: &str) -> StoreResult<()>;

    /// Delete every message of one conversation.
    async fn clear(&self, conversation_id: i64) -> StoreResult<()>;

    /// Grouped-latest projection over all conversations, newest first.
    async fn summaries(&self) -> StoreResult<Vec<ConversationSummary>>;
}
