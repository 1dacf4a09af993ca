//! Message and conversation types.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current wall clock as milliseconds since the Unix epoch.
///
/// Message timestamps and conversation ids are both minted from this clock.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Mints unique, monotonic-ish message ids.
///
/// An id is the creation clock reading plus a process-wide sequence suffix,
/// so two messages created in the same millisecond still get distinct ids.
#[derive(Debug, Default)]
pub struct MessageIdGenerator {
    seq: AtomicU64,
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", now_millis(), seq)
    }
}

/// A single chat message, user or assistant.
///
/// `content` is mutable while a stream is appending to it; once the turn
/// terminates the message is immutable until a new turn starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub is_user: bool,
    /// Milliseconds since the Unix epoch, assigned at creation.
    pub timestamp: i64,
    pub conversation_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_ref: Option<String>,
}

impl Message {
    pub fn user(id: impl Into<String>, content: impl Into<String>, conversation_id: i64) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            is_user: true,
            timestamp: now_millis(),
            conversation_id,
            attachment_ref: None,
        }
    }

    pub fn assistant(
        id: impl Into<String>,
        content: impl Into<String>,
        conversation_id: i64,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            is_user: false,
            timestamp: now_millis(),
            conversation_id,
            attachment_ref: None,
        }
    }

    /// The empty assistant message appended at turn start and grown by the
    /// stream.
    pub fn placeholder(id: impl Into<String>, conversation_id: i64) -> Self {
        Self::assistant(id, "", conversation_id)
    }

    pub fn with_attachment(mut self, attachment_ref: impl Into<String>) -> Self {
        self.attachment_ref = Some(attachment_ref.into());
        self
    }
}

/// Read-only projection of a conversation for history listings.
///
/// Never persisted on its own; always recomputed from stored messages or
/// fetched from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: i64,
    /// Timestamp of the newest message in the conversation.
    pub latest: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_generator_produces_distinct_ids_within_one_millisecond() {
        let ids = MessageIdGenerator::new();
        let a = ids.next_id();
        let b = ids.next_id();
        assert_ne!(a, b);
    }

    #[test]
    fn placeholder_is_an_empty_assistant_message() {
        let message = Message::placeholder("m-1", 42);
        assert!(!message.is_user);
        assert!(message.content.is_empty());
        assert_eq!(message.conversation_id, 42);
        assert!(message.attachment_ref.is_none());
    }

    #[test]
    fn with_attachment_sets_the_reference() {
        let message = Message::user("m-2", "[图片]", 7).with_attachment("content://img/3");
        assert_eq!(message.attachment_ref.as_deref(), Some("content://img/3"));
    }
}
