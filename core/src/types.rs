/// Shared types for conversations, messages and presence
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of the peer on the other side of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerIdentity {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub avatar_ref: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl PeerIdentity {
    /// Minimal identity built from a message sender, before a profile is known
    pub fn bare(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: String::new(),
            avatar_ref: None,
            role: None,
        }
    }
}

/// Message payload kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    File,
    Location,
    Contact,
    Sticker,
    System,
    Unknown,
}

// Unrecognized kinds map to Unknown so newer servers never break older clients
impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "text" => MessageKind::Text,
            "image" => MessageKind::Image,
            "video" => MessageKind::Video,
            "audio" => MessageKind::Audio,
            "file" => MessageKind::File,
            "location" => MessageKind::Location,
            "contact" => MessageKind::Contact,
            "sticker" => MessageKind::Sticker,
            "system" => MessageKind::System,
            _ => MessageKind::Unknown,
        })
    }
}

impl MessageKind {
    /// Kinds that carry a media attachment
    pub fn is_media(&self) -> bool {
        matches!(
            self,
            MessageKind::Image | MessageKind::Video | MessageKind::Audio | MessageKind::File
        )
    }
}

/// Delivery state of a self-authored message
///
/// Sending -> Sent -> Delivered -> Read, advanced monotonically; Failed is
/// reachable only from Sending and is left again by an explicit retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryStatus {
    /// Position in the monotonic chain; Failed sits outside it
    fn rank(&self) -> Option<u8> {
        match self {
            DeliveryStatus::Sending => Some(0),
            DeliveryStatus::Sent => Some(1),
            DeliveryStatus::Delivered => Some(2),
            DeliveryStatus::Read => Some(3),
            DeliveryStatus::Failed => None,
        }
    }

    /// Whether a transition from self to `next` is allowed
    ///
    /// Within the chain only forward moves are valid; duplicate or
    /// out-of-order acknowledgments are rejected. Sending may fail, and a
    /// failed message may be moved back to Sending by a retry.
    pub fn can_advance_to(&self, next: DeliveryStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(cur), Some(nxt)) => nxt > cur,
            // Sending -> Failed
            (Some(0), None) => true,
            (Some(_), None) => false,
            // Failed -> Sending (retry)
            (None, Some(0)) => true,
            (None, _) => false,
        }
    }
}

/// Media reference handed to the dispatcher after a completed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub url: String,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
}

/// One chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    /// Text payload; caption for media kinds
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    /// Read flag for inbound messages
    #[serde(default)]
    pub is_read: bool,
    /// Delivery state; present only on self-authored messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeliveryStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

impl Message {
    /// Empty placeholder used as last_message of a conversation with no traffic yet
    pub fn placeholder(conversation_id: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            id: format!("placeholder:{}", conversation_id),
            conversation_id: conversation_id.to_string(),
            sender_id: String::new(),
            receiver_id: String::new(),
            content: String::new(),
            kind: MessageKind::System,
            created_at,
            is_read: true,
            status: None,
            media_url: None,
            file_name: None,
            file_size: None,
        }
    }

    /// True for the placeholder of a fresh conversation
    pub fn is_placeholder(&self) -> bool {
        self.sender_id.is_empty() && self.content.is_empty()
    }

    /// Optimistic outgoing message, inserted before the server confirms it
    pub fn outgoing(
        conversation_id: &str,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        kind: MessageKind,
        media: Option<MediaAttachment>,
    ) -> Self {
        let (media_url, file_name, file_size) = match media {
            Some(m) => (Some(m.url), m.file_name, m.file_size),
            None => (None, None, None),
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
            kind,
            created_at: Utc::now(),
            is_read: false,
            status: Some(DeliveryStatus::Sending),
            media_url,
            file_name,
            file_size,
        }
    }

    /// Advance delivery status, rejecting non-monotonic transitions.
    /// Returns true if the status changed.
    pub fn advance_status(&mut self, next: DeliveryStatus) -> bool {
        match self.status {
            Some(current) if current.can_advance_to(next) => {
                self.status = Some(next);
                true
            }
            _ => false,
        }
    }
}

/// One conversation between the current user and a single peer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(rename = "conversationId")]
    pub id: String,
    pub other_user: PeerIdentity,
    /// Most recent message known for this conversation; placeholder when fresh
    pub last_message: Message,
    #[serde(default)]
    pub unread_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Conversation {
    /// Fresh conversation with a placeholder last message
    pub fn new(id: &str, other_user: PeerIdentity, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            other_user,
            last_message: Message::placeholder(id, created_at),
            unread_count: 0,
            created_at,
            last_activity_at: created_at,
        }
    }

    pub fn has_unread(&self) -> bool {
        self.unread_count > 0
    }
}

/// Live presence of a peer; absence of an entry means Offline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}
