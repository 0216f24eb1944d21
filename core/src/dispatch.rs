/// Outgoing message lifecycle: composition, delivery status, typing signals
use crate::api::MessageApi;
use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::error::{ChatError, Result};
use crate::protocol::Envelope;
use crate::store::ConversationStore;
use crate::types::{DeliveryStatus, MediaAttachment, Message, MessageKind};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

/// Typing indicator state. Only edge transitions go over the wire: one
/// "started" per composition burst, one "stopped" when the quiet timer fires
/// or the input is cleared.
struct TypingState {
    /// Conversation currently being typed in; None when idle
    conversation_id: Option<String>,
    /// Pending quiet timer, re-armed on every keystroke
    stop_timer: Option<JoinHandle<()>>,
}

impl TypingState {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.stop_timer.take() {
            timer.abort();
        }
    }
}

/// Composes and transmits outgoing messages, owns their delivery-status
/// machine, and debounces typing broadcasts.
pub struct MessageDispatcher {
    config: Config,
    api: Arc<dyn MessageApi>,
    store: Arc<ConversationStore>,
    connection: Arc<ConnectionManager>,
    typing: Arc<Mutex<TypingState>>,
}

impl MessageDispatcher {
    pub fn new(
        config: Config,
        api: Arc<dyn MessageApi>,
        store: Arc<ConversationStore>,
        connection: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            config,
            api,
            store,
            connection,
            typing: Arc::new(Mutex::new(TypingState {
                conversation_id: None,
                stop_timer: None,
            })),
        }
    }

    // ─── Sending ─────────────────────────────────────────────────────────────

    /// Send a text message: validate, optimistically insert as Sending,
    /// transmit, then confirm (Sent) or keep as Failed for explicit retry.
    pub async fn send_text(
        &self,
        conversation_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<Message> {
        let content = content.trim();
        self.validate_content(content, false)?;

        let local = Message::outgoing(
            conversation_id,
            self.store.user_id(),
            receiver_id,
            content,
            MessageKind::Text,
            None,
        );
        self.store.insert_local(local.clone()).await;
        // Sending clears the composer, which ends the typing indicator
        self.stop_typing().await;

        match self
            .api
            .send_text_message(conversation_id, &local.sender_id, receiver_id, content)
            .await
        {
            Ok(confirmed) => Ok(self.store.confirm_sent(conversation_id, &local.id, confirmed).await),
            Err(e) => {
                warn!("Send failed for message {}: {}", local.id, e);
                self.store.mark_send_failed(conversation_id, &local.id).await;
                Err(e)
            }
        }
    }

    /// Send a media message. The attachment must already be uploaded; only
    /// the reference travels here. Caption is optional and length-checked.
    pub async fn send_media(
        &self,
        conversation_id: &str,
        receiver_id: &str,
        media: MediaAttachment,
        kind: MessageKind,
        caption: Option<&str>,
    ) -> Result<Message> {
        if !kind.is_media() {
            return Err(ChatError::Validation(format!(
                "{:?} is not a media message kind",
                kind
            )));
        }
        if media.url.trim().is_empty() {
            return Err(ChatError::Validation(
                "media reference is empty; upload must complete before sending".to_string(),
            ));
        }
        let caption = caption.unwrap_or("").trim();
        self.validate_content(caption, true)?;

        let local = Message::outgoing(
            conversation_id,
            self.store.user_id(),
            receiver_id,
            caption,
            kind,
            Some(media.clone()),
        );
        self.store.insert_local(local.clone()).await;
        self.stop_typing().await;

        match self
            .api
            .send_media_message(
                conversation_id,
                &local.sender_id,
                receiver_id,
                &media,
                kind,
                if caption.is_empty() { None } else { Some(caption) },
            )
            .await
        {
            Ok(confirmed) => Ok(self.store.confirm_sent(conversation_id, &local.id, confirmed).await),
            Err(e) => {
                warn!("Send failed for message {}: {}", local.id, e);
                self.store.mark_send_failed(conversation_id, &local.id).await;
                Err(e)
            }
        }
    }

    /// Re-issue transmission for a message stuck in Failed
    pub async fn retry_send(&self, conversation_id: &str, message_id: &str) -> Result<Message> {
        let message = self
            .store
            .find_message(conversation_id, message_id)
            .await
            .ok_or_else(|| {
                ChatError::Validation(format!("no message {} in {}", message_id, conversation_id))
            })?;
        if message.status != Some(DeliveryStatus::Failed) {
            return Err(ChatError::Validation(
                "only failed messages can be retried".to_string(),
            ));
        }
        self.store
            .update_status(conversation_id, message_id, DeliveryStatus::Sending)
            .await;

        let result = if message.kind == MessageKind::Text {
            self.api
                .send_text_message(
                    conversation_id,
                    &message.sender_id,
                    &message.receiver_id,
                    &message.content,
                )
                .await
        } else {
            let media = MediaAttachment {
                url: message.media_url.clone().unwrap_or_default(),
                file_name: message.file_name.clone(),
                file_size: message.file_size,
            };
            let caption = if message.content.is_empty() {
                None
            } else {
                Some(message.content.as_str())
            };
            self.api
                .send_media_message(
                    conversation_id,
                    &message.sender_id,
                    &message.receiver_id,
                    &media,
                    message.kind,
                    caption,
                )
                .await
        };

        match result {
            Ok(confirmed) => Ok(self.store.confirm_sent(conversation_id, message_id, confirmed).await),
            Err(e) => {
                warn!("Retry failed for message {}: {}", message_id, e);
                self.store
                    .update_status(conversation_id, message_id, DeliveryStatus::Failed)
                    .await;
                Err(e)
            }
        }
    }

    fn validate_content(&self, content: &str, allow_empty: bool) -> Result<()> {
        if content.is_empty() && !allow_empty {
            return Err(ChatError::Validation("message content is empty".to_string()));
        }
        if content.chars().count() > self.config.max_message_len {
            return Err(ChatError::Validation(format!(
                "message exceeds {} characters",
                self.config.max_message_len
            )));
        }
        Ok(())
    }

    // ─── Read receipts ───────────────────────────────────────────────────────

    /// Mark the conversation read and broadcast one batched read receipt for
    /// everything newly acknowledged.
    pub async fn acknowledge_read(&self, conversation_id: &str) -> Result<()> {
        let acknowledged = self.store.mark_read(conversation_id).await?;
        if !acknowledged.is_empty() {
            self.connection
                .send(Envelope::read_receipt(conversation_id, &acknowledged))
                .await;
        }
        Ok(())
    }

    // ─── Typing signals ──────────────────────────────────────────────────────

    /// Feed the current composer content. Non-empty input broadcasts "typing
    /// started" on the idle→typing edge only and re-arms the quiet timer;
    /// empty input broadcasts an immediate stop.
    pub async fn notify_typing(&self, conversation_id: &str, content: &str) {
        let mut typing = self.typing.lock().await;

        if content.trim().is_empty() {
            self.stop_typing_locked(&mut typing).await;
            return;
        }

        match typing.conversation_id.clone() {
            Some(current) if current == conversation_id => {
                // Still composing in the same conversation: no new broadcast
            }
            Some(_) => {
                // Switched conversations mid-composition
                self.stop_typing_locked(&mut typing).await;
                self.start_typing_locked(&mut typing, conversation_id).await;
            }
            None => self.start_typing_locked(&mut typing, conversation_id).await,
        }
        self.arm_quiet_timer(&mut typing, conversation_id);
    }

    /// Immediately end the typing indicator, if any
    pub async fn stop_typing(&self) {
        let mut typing = self.typing.lock().await;
        self.stop_typing_locked(&mut typing).await;
    }

    async fn start_typing_locked(&self, typing: &mut TypingState, conversation_id: &str) {
        typing.conversation_id = Some(conversation_id.to_string());
        self.connection
            .send(Envelope::typing_status(conversation_id, true))
            .await;
    }

    async fn stop_typing_locked(&self, typing: &mut TypingState) {
        typing.cancel_timer();
        if let Some(conversation_id) = typing.conversation_id.take() {
            self.connection
                .send(Envelope::typing_status(&conversation_id, false))
                .await;
        }
    }

    fn arm_quiet_timer(&self, typing: &mut TypingState, conversation_id: &str) {
        typing.cancel_timer();
        let quiet = self.config.typing_quiet_period;
        let connection = self.connection.clone();
        let typing_shared = self.typing.clone();
        let conversation = conversation_id.to_string();
        typing.stop_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            let mut typing = typing_shared.lock().await;
            if typing.conversation_id.as_deref() == Some(conversation.as_str()) {
                typing.conversation_id = None;
                typing.stop_timer = None;
                connection
                    .send(Envelope::typing_status(&conversation, false))
                    .await;
            }
        }));
    }
}

impl Drop for MessageDispatcher {
    fn drop(&mut self) {
        // Never leak a pending quiet timer past the dispatcher's lifetime
        if let Ok(mut typing) = self.typing.try_lock() {
            typing.cancel_timer();
        }
    }
}
