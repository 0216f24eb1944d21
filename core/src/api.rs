/// Data-fetch boundary: the request/response collaborator the core pulls from
///
/// REST transport, serialization shapes and mock data all live behind this
/// trait; the core only consumes it as a trait object.
use crate::error::Result;
use crate::types::{Conversation, MediaAttachment, Message, MessageKind};
use async_trait::async_trait;

#[async_trait]
pub trait MessageApi: Send + Sync {
    /// Snapshot of every conversation for one user
    async fn get_conversations(&self, user_id: &str) -> Result<Vec<Conversation>>;

    /// Full message history for one conversation
    async fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Transmit a text message; returns the server-confirmed message
    async fn send_text_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<Message>;

    /// Transmit a media message; the attachment must already be uploaded
    async fn send_media_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        receiver_id: &str,
        media: &MediaAttachment,
        kind: MessageKind,
        caption: Option<&str>,
    ) -> Result<Message>;

    /// Acknowledge every message in the conversation as read by `user_id`
    async fn mark_as_read(&self, conversation_id: &str, user_id: &str) -> Result<bool>;
}
