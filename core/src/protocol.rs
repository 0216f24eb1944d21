/// Push channel protocol: {type, payload} envelopes in both directions
use crate::error::Result;
use crate::types::{Conversation, Message, PresenceStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const NEW_MESSAGE: &str = "NEW_MESSAGE";
pub const CONVERSATION_UPDATE: &str = "CONVERSATION_UPDATE";
pub const USER_STATUS_CHANGE: &str = "USER_STATUS_CHANGE";
pub const TYPING_STATUS: &str = "TYPING_STATUS";
pub const READ_RECEIPT: &str = "READ_RECEIPT";

/// Wire envelope for all push-channel traffic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Serialize envelope to a JSON text frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize envelope from a JSON text frame
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Outbound read receipt: {conversationId, messageIds}
    pub fn read_receipt(conversation_id: &str, message_ids: &[String]) -> Self {
        Self {
            kind: READ_RECEIPT.to_string(),
            payload: serde_json::json!({
                "conversationId": conversation_id,
                "messageIds": message_ids,
            }),
        }
    }

    /// Outbound typing signal: {conversationId, isTyping}
    pub fn typing_status(conversation_id: &str, is_typing: bool) -> Self {
        Self {
            kind: TYPING_STATUS.to_string(),
            payload: serde_json::json!({
                "conversationId": conversation_id,
                "isTyping": is_typing,
            }),
        }
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Envelope({})", self.kind)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusChangePayload {
    user_id: String,
    status: PresenceStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingPayload {
    conversation_id: String,
    #[serde(default)]
    user_id: String,
    is_typing: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadReceiptPayload {
    conversation_id: String,
    message_ids: Vec<String>,
}

/// Typed inbound event decoded from an envelope discriminant
#[derive(Debug, Clone)]
pub enum PushEvent {
    NewMessage(Message),
    ConversationUpdate(Conversation),
    UserStatusChange {
        user_id: String,
        status: PresenceStatus,
    },
    Typing {
        conversation_id: String,
        user_id: String,
        is_typing: bool,
    },
    ReadReceipt {
        conversation_id: String,
        message_ids: Vec<String>,
    },
}

impl PushEvent {
    /// Decode a typed event from an envelope.
    ///
    /// Unknown discriminants return Ok(None) so the caller can log and
    /// ignore them; a payload that does not match its discriminant is an
    /// error (also log-and-drop territory, never fatal).
    pub fn decode(envelope: &Envelope) -> Result<Option<PushEvent>> {
        let event = match envelope.kind.as_str() {
            NEW_MESSAGE => {
                let message: Message = serde_json::from_value(envelope.payload.clone())?;
                PushEvent::NewMessage(message)
            }
            CONVERSATION_UPDATE => {
                let conversation: Conversation = serde_json::from_value(envelope.payload.clone())?;
                PushEvent::ConversationUpdate(conversation)
            }
            USER_STATUS_CHANGE => {
                let payload: StatusChangePayload =
                    serde_json::from_value(envelope.payload.clone())?;
                PushEvent::UserStatusChange {
                    user_id: payload.user_id,
                    status: payload.status,
                }
            }
            TYPING_STATUS => {
                let payload: TypingPayload = serde_json::from_value(envelope.payload.clone())?;
                PushEvent::Typing {
                    conversation_id: payload.conversation_id,
                    user_id: payload.user_id,
                    is_typing: payload.is_typing,
                }
            }
            READ_RECEIPT => {
                let payload: ReadReceiptPayload =
                    serde_json::from_value(envelope.payload.clone())?;
                PushEvent::ReadReceipt {
                    conversation_id: payload.conversation_id,
                    message_ids: payload.message_ids,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}
