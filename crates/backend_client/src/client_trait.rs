//! The backend seam consumed by the session manager.

use std::pin::Pin;

use async_trait::async_trait;
use chat_core::{ConversationSummary, Message};
use futures::Stream;

use crate::error::TransportResult;
use crate::protocol::StreamEvent;
use crate::stream::StreamHandle;

/// Lazy sequence of decoded stream events. Not restartable; cancellation
/// closes the underlying connection.
pub type EventStream = Pin<Box<dyn Stream<Item = TransportResult<StreamEvent>> + Send>>;

/// An accepted streaming request: the cancellation handle plus the event
/// sequence it feeds.
pub struct OpenStream {
    pub handle: StreamHandle,
    pub events: EventStream,
}

/// Attachment payload for a multimodal turn, already validated and read
/// fully into memory.
#[derive(Debug, Clone)]
pub struct AttachmentUpload {
    pub file_name: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// `GET /stream/{conversation}?prompt&model`, `text/event-stream` body.
    async fn open_text_stream(
        &self,
        conversation_id: i64,
        prompt: &str,
        model: &str,
    ) -> TransportResult<OpenStream>;

    /// `POST /multimodal/{conversation}` multipart, same line protocol.
    async fn open_attachment_stream(
        &self,
        conversation_id: i64,
        model: &str,
        upload: AttachmentUpload,
    ) -> TransportResult<OpenStream>;

    /// `GET /messages/{conversation}?page&size`.
    async fn fetch_messages(
        &self,
        conversation_id: i64,
        page: u32,
        size: u32,
    ) -> TransportResult<Vec<Message>>;

    /// `GET /conversations?page&size`.
    async fn fetch_conversations(
        &self,
        page: u32,
        size: u32,
    ) -> TransportResult<Vec<ConversationSummary>>;

    /// `GET /models`.
    async fn fetch_models(&self) -> TransportResult<Vec<String>>;
}
