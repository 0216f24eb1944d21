/// Canonical in-memory state: conversations plus the active message list,
/// reconciled from REST snapshots and realtime push events
use crate::api::MessageApi;
use crate::error::Result;
use crate::types::{Conversation, DeliveryStatus, Message, PeerIdentity};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Message plus its arrival sequence; the sequence is the stable tie-break
/// for equal creation timestamps, making merge order-independent
#[derive(Debug, Clone)]
struct StoredMessage {
    message: Message,
    seq: u64,
}

#[derive(Default)]
struct StoreState {
    conversations: HashMap<String, Conversation>,
    /// Conversation whose history is materialized in `messages`
    active_conversation: Option<String>,
    messages: Vec<StoredMessage>,
    next_seq: u64,
}

impl StoreState {
    fn is_active(&self, conversation_id: &str) -> bool {
        self.active_conversation.as_deref() == Some(conversation_id)
    }

    fn push_sorted(&mut self, message: Message) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.messages.push(StoredMessage { message, seq });
        self.sort_messages();
    }

    fn sort_messages(&mut self) {
        self.messages.sort_by(|a, b| {
            a.message
                .created_at
                .cmp(&b.message.created_at)
                .then(a.seq.cmp(&b.seq))
        });
    }
}

/// Single source of truth for conversation and message state.
///
/// All mutation funnels through these methods; the duplicate-by-id check and
/// the stable (created_at, arrival) sort make the result independent of the
/// order in which snapshot and push data arrive.
pub struct ConversationStore {
    user_id: String,
    api: Arc<dyn MessageApi>,
    state: RwLock<StoreState>,
}

impl ConversationStore {
    pub fn new(user_id: &str, api: Arc<dyn MessageApi>) -> Self {
        Self {
            user_id: user_id.to_string(),
            api,
            state: RwLock::new(StoreState::default()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    // ─── Pull path ───────────────────────────────────────────────────────────

    /// Fetch the conversation snapshot and replace the working set.
    /// A failed fetch leaves prior state untouched.
    pub async fn load_conversations(&self) -> Result<Vec<Conversation>> {
        let fetched = self.api.get_conversations(&self.user_id).await?;
        let mut state = self.state.write().await;
        state.conversations.clear();
        for conversation in fetched {
            let conversation = normalize(conversation);
            state.conversations.insert(conversation.id.clone(), conversation);
        }
        Ok(sorted_conversations(&state))
    }

    /// Fetch one conversation's history and replace the active message list.
    ///
    /// The conversation becomes active immediately; if another load supersedes
    /// this one while the fetch is in flight, the stale result is discarded
    /// (the caller that navigated away no longer wants it).
    pub async fn load_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        {
            let mut state = self.state.write().await;
            state.active_conversation = Some(conversation_id.to_string());
        }
        let fetched = self.api.get_messages(conversation_id).await?;

        let mut state = self.state.write().await;
        if !state.is_active(conversation_id) {
            debug!("Discarding stale history fetch for {}", conversation_id);
            return Ok(Vec::new());
        }
        let mut fetched = fetched;
        // Stable sort: fetch order breaks created_at ties
        fetched.sort_by_key(|m| m.created_at);
        state.messages.clear();
        for message in fetched {
            let seq = state.next_seq;
            state.next_seq += 1;
            state.messages.push(StoredMessage { message, seq });
        }
        Ok(active_messages(&state))
    }

    // ─── Push path ───────────────────────────────────────────────────────────

    /// Merge one message arriving over the push channel (or inserted
    /// optimistically by the dispatcher).
    ///
    /// Duplicates by id are ignored outright. Otherwise the message lands in
    /// the active list (stable-sorted), the conversation is created on demand,
    /// its last-message pointer advances unless the message is older, and the
    /// unread counter grows for peer-authored traffic.
    pub async fn apply_incoming_message(&self, message: Message) {
        let mut state = self.state.write().await;

        if state.is_active(&message.conversation_id)
            && state.messages.iter().any(|m| m.message.id == message.id)
        {
            debug!("Ignoring duplicate message {} in {}", message.id, message.conversation_id);
            return;
        }
        if let Some(conversation) = state.conversations.get(&message.conversation_id) {
            if conversation.last_message.id == message.id {
                debug!("Ignoring duplicate message {} in {}", message.id, message.conversation_id);
                return;
            }
        }

        let from_peer = message.sender_id != self.user_id;
        let conversation = state
            .conversations
            .entry(message.conversation_id.clone())
            .or_insert_with(|| {
                // First sighting of this conversation: a bare peer identity
                // until a conversation update or snapshot fills in the profile
                let peer_id = if from_peer { &message.sender_id } else { &message.receiver_id };
                Conversation::new(
                    &message.conversation_id,
                    PeerIdentity::bare(peer_id.as_str()),
                    message.created_at,
                )
            });

        if from_peer && !message.is_read {
            conversation.unread_count += 1;
        }
        if conversation.last_message.is_placeholder()
            || message.created_at >= conversation.last_message.created_at
        {
            conversation.last_message = message.clone();
        }
        if message.created_at > conversation.last_activity_at {
            conversation.last_activity_at = message.created_at;
        }

        if state.is_active(&message.conversation_id) {
            state.push_sorted(message);
        }
    }

    /// Optimistic insert of a self-authored message (status Sending)
    pub async fn insert_local(&self, message: Message) {
        self.apply_incoming_message(message).await;
    }

    /// Upsert a conversation pushed over the realtime channel, reconciled by id
    pub async fn apply_conversation_update(&self, conversation: Conversation) {
        let conversation = normalize(conversation);
        let mut state = self.state.write().await;
        debug!("Conversation update for {}", conversation.id);
        state.conversations.insert(conversation.id.clone(), conversation);
    }

    /// Peer read-receipt: advance self-authored messages at or before the
    /// newest referenced message to Read. Never regresses a status.
    pub async fn apply_read_receipt(&self, conversation_id: &str, message_ids: &[String]) {
        let mut state = self.state.write().await;

        if state.is_active(conversation_id) {
            let cutoff = state
                .messages
                .iter()
                .filter(|m| message_ids.contains(&m.message.id))
                .map(|m| m.message.created_at)
                .max();
            if let Some(cutoff) = cutoff {
                for entry in state.messages.iter_mut() {
                    if entry.message.sender_id == self.user_id
                        && entry.message.created_at <= cutoff
                    {
                        entry.message.advance_status(DeliveryStatus::Read);
                    }
                }
            }
        }

        if let Some(conversation) = state.conversations.get_mut(conversation_id) {
            if conversation.last_message.sender_id == self.user_id
                && message_ids.contains(&conversation.last_message.id)
            {
                conversation.last_message.advance_status(DeliveryStatus::Read);
            }
        }
    }

    // ─── Outgoing lifecycle support ──────────────────────────────────────────

    /// Swap an optimistic message for its server-confirmed form, keeping the
    /// original arrival slot so ordering stays stable, and advance it to Sent.
    /// Returns the reconciled message.
    pub async fn confirm_sent(
        &self,
        conversation_id: &str,
        local_id: &str,
        confirmed: Message,
    ) -> Message {
        let mut sent = confirmed;
        sent.status = Some(DeliveryStatus::Sent);

        let mut state = self.state.write().await;
        if state.is_active(conversation_id) {
            let push_copy_arrived = sent.id != local_id
                && state.messages.iter().any(|m| m.message.id == sent.id);
            if push_copy_arrived {
                // The push copy of this message beat the send response
                state.messages.retain(|m| m.message.id != local_id);
                if let Some(entry) = state.messages.iter_mut().find(|m| m.message.id == sent.id) {
                    entry.message = sent.clone();
                }
            } else if let Some(entry) =
                state.messages.iter_mut().find(|m| m.message.id == local_id)
            {
                entry.message = sent.clone();
            } else {
                warn!("confirm_sent: no local message {} in {}", local_id, conversation_id);
            }
            state.sort_messages();
        }

        if let Some(conversation) = state.conversations.get_mut(conversation_id) {
            if conversation.last_message.id == local_id
                || sent.created_at >= conversation.last_message.created_at
            {
                conversation.last_message = sent.clone();
            }
            if sent.created_at > conversation.last_activity_at {
                conversation.last_activity_at = sent.created_at;
            }
        }
        sent
    }

    /// Keep a message that failed to transmit, flagged for explicit retry
    pub async fn mark_send_failed(&self, conversation_id: &str, local_id: &str) {
        self.update_status(conversation_id, local_id, DeliveryStatus::Failed)
            .await;
    }

    /// Advance a self-authored message's delivery status (monotonic; invalid
    /// transitions are ignored). Returns true if anything changed.
    pub async fn update_status(
        &self,
        conversation_id: &str,
        message_id: &str,
        status: DeliveryStatus,
    ) -> bool {
        let mut state = self.state.write().await;
        let mut changed = false;
        if state.is_active(conversation_id) {
            if let Some(entry) = state.messages.iter_mut().find(|m| m.message.id == message_id) {
                changed |= entry.message.advance_status(status);
            }
        }
        if let Some(conversation) = state.conversations.get_mut(conversation_id) {
            if conversation.last_message.id == message_id {
                changed |= conversation.last_message.advance_status(status);
            }
        }
        changed
    }

    // ─── Read acknowledgment ─────────────────────────────────────────────────

    /// Zero the unread counter, flip the peer's messages to read, and notify
    /// the collaborator API. Returns the ids acknowledged this call (empty on
    /// a repeat call — the operation is idempotent).
    pub async fn mark_read(&self, conversation_id: &str) -> Result<Vec<String>> {
        let (acknowledged, had_unread) = {
            let mut state = self.state.write().await;
            let mut acknowledged = Vec::new();
            if state.is_active(conversation_id) {
                for entry in state.messages.iter_mut() {
                    if entry.message.sender_id != self.user_id && !entry.message.is_read {
                        entry.message.is_read = true;
                        acknowledged.push(entry.message.id.clone());
                    }
                }
            }
            let mut had_unread = false;
            if let Some(conversation) = state.conversations.get_mut(conversation_id) {
                had_unread = conversation.unread_count > 0;
                conversation.unread_count = 0;
                if conversation.last_message.sender_id != self.user_id {
                    conversation.last_message.is_read = true;
                }
            }
            (acknowledged, had_unread)
        };

        if acknowledged.is_empty() && !had_unread {
            // Nothing newly read; a second mark_read is a no-op
            return Ok(acknowledged);
        }
        self.api.mark_as_read(conversation_id, &self.user_id).await?;
        Ok(acknowledged)
    }

    // ─── Views ───────────────────────────────────────────────────────────────

    /// Conversations in display order: any-unread first, then most recent
    /// activity, then id — a total order recomputed from current state.
    pub async fn conversations(&self) -> Vec<Conversation> {
        sorted_conversations(&*self.state.read().await)
    }

    pub async fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        self.state.read().await.conversations.get(conversation_id).cloned()
    }

    pub async fn active_conversation_id(&self) -> Option<String> {
        self.state.read().await.active_conversation.clone()
    }

    /// The active conversation's messages, ordered by (created_at, arrival)
    pub async fn messages(&self) -> Vec<Message> {
        active_messages(&*self.state.read().await)
    }

    pub async fn find_message(&self, conversation_id: &str, message_id: &str) -> Option<Message> {
        let state = self.state.read().await;
        if !state.is_active(conversation_id) {
            return None;
        }
        state
            .messages
            .iter()
            .find(|m| m.message.id == message_id)
            .map(|m| m.message.clone())
    }

    /// Drop all local state (logout)
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        *state = StoreState::default();
    }
}

fn normalize(mut conversation: Conversation) -> Conversation {
    if conversation.last_activity_at < conversation.last_message.created_at {
        conversation.last_activity_at = conversation.last_message.created_at;
    }
    conversation
}

fn sorted_conversations(state: &StoreState) -> Vec<Conversation> {
    let mut list: Vec<Conversation> = state.conversations.values().cloned().collect();
    list.sort_by(|a, b| {
        b.has_unread()
            .cmp(&a.has_unread())
            .then(b.last_activity_at.cmp(&a.last_activity_at))
            .then(a.id.cmp(&b.id))
    });
    list
}

fn active_messages(state: &StoreState) -> Vec<Message> {
    state.messages.iter().map(|m| m.message.clone()).collect()
}
