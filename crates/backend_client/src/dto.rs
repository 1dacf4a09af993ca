//! Wire shapes of the paginated endpoints.
//!
//! Each response is decoded against a full schema; a mismatch fails the
//! whole fetch so callers fall back to local data instead of acting on a
//! partially extracted list.

use chat_core::{ConversationSummary, Message};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageDto {
    pub id: String,
    pub content: String,
    pub is_user: bool,
    pub timestamp: i64,
    pub conversation_id: i64,
    #[serde(default)]
    pub image_uri: Option<String>,
}

impl From<MessageDto> for Message {
    fn from(dto: MessageDto) -> Self {
        Message {
            id: dto.id,
            content: dto.content,
            is_user: dto.is_user,
            timestamp: dto.timestamp,
            conversation_id: dto.conversation_id,
            attachment_ref: dto.image_uri,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SummaryDto {
    pub conversation_id: i64,
    pub latest: i64,
}

impl From<SummaryDto> for ConversationSummary {
    fn from(dto: SummaryDto) -> Self {
        ConversationSummary {
            conversation_id: dto.conversation_id,
            latest: dto.latest,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ModelDto {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_dto_decodes_the_wire_field_names() {
        let json = r#"{"id":"1716","content":"你好","isUser":true,"timestamp":1716000000000,"conversationId":9}"#;
        let message: Message = serde_json::from_str::<MessageDto>(json)
            .expect("decode")
            .into();
        assert!(message.is_user);
        assert_eq!(message.conversation_id, 9);
        assert!(message.attachment_ref.is_none());
    }

    #[test]
    fn message_dto_carries_an_optional_image_uri() {
        let json = r#"{"id":"1","content":"[图片]","isUser":true,"timestamp":1,"conversationId":2,"imageUri":"content://img/5"}"#;
        let message: Message = serde_json::from_str::<MessageDto>(json)
            .expect("decode")
            .into();
        assert_eq!(message.attachment_ref.as_deref(), Some("content://img/5"));
    }

    #[test]
    fn missing_fields_fail_the_decode() {
        let json = r#"{"id":"1","content":"x"}"#;
        assert!(serde_json::from_str::<MessageDto>(json).is_err());
    }
}
