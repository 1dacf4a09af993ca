//! Session state containers.

use chat_core::{ConversationSummary, Message};

use crate::machine::TurnMachine;

/// Cursor over a paged remote listing.
///
/// `has_more` latches false on the first empty or failed page and stays
/// false until the listing is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub page: u32,
    pub has_more: bool,
}

impl PageCursor {
    pub fn reset(&mut self) {
        self.page = 0;
        self.has_more = true;
    }
}

impl Default for PageCursor {
    fn default() -> Self {
        Self {
            page: 0,
            has_more: true,
        }
    }
}

/// Which channel a stream belongs to. One stream per channel may be live at
/// a time; the two channels share the global stream cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamChannel {
    Text,
    Attachment,
}

/// In-memory state for the active conversation.
///
/// Owned exclusively by the session actor; the UI observes snapshots through
/// watch channels and never mutates this directly.
#[derive(Debug)]
pub struct SessionState {
    pub conversation_id: i64,
    pub messages: Vec<Message>,
    /// True while a text turn is in flight. Attachment turns do not set it.
    pub is_loading: bool,
    pub model: String,
    pub conversations: Vec<ConversationSummary>,
    pub models: Vec<String>,
    /// Streams whose 2xx body is currently being consumed, both channels.
    pub active_streams: u32,
    pub message_cursor: PageCursor,
    pub conversation_cursor: PageCursor,
    pub turn: TurnMachine,
}

impl SessionState {
    pub fn new(conversation_id: i64, model: String) -> Self {
        Self {
            conversation_id,
            messages: Vec::new(),
            is_loading: false,
            model,
            conversations: Vec::new(),
            models: Vec::new(),
            active_streams: 0,
            message_cursor: PageCursor::default(),
            conversation_cursor: PageCursor::default(),
            turn: TurnMachine::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_resets_to_first_page_with_more_expected() {
        let mut cursor = PageCursor {
            page: 4,
            has_more: false,
        };
        cursor.reset();
        assert_eq!(cursor, PageCursor::default());
    }
}
