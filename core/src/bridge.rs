/// Bridges raw connection events into typed application events
use crate::connection::{ConnectionManager, LinkEvent, LinkState};
use crate::presence::PresenceTracker;
use crate::protocol::PushEvent;
use crate::store::ConversationStore;
use crate::types::{Conversation, Message, PresenceStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Application-level realtime events
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Connected,
    Disconnected { deliberate: bool },
    ReconnectExhausted,
    ConnectionError(String),
    MessageArrived(Message),
    ConversationUpdated(Conversation),
    PresenceChanged {
        user_id: String,
        status: PresenceStatus,
    },
    TypingChanged {
        conversation_id: String,
        user_id: String,
        is_typing: bool,
    },
    ReadReceiptAcknowledged {
        conversation_id: String,
        message_ids: Vec<String>,
    },
}

/// Subscribes to a ConnectionManager, routes inbound frames by discriminant
/// into the store and presence tracker, and re-emits everything as typed
/// events on a broadcast channel.
///
/// Consumers attach with subscribe() and detach by dropping the receiver;
/// multiple consumers never clobber each other. Dropping the bridge aborts
/// its pump task without closing the underlying shared connection.
pub struct RealtimeEventBridge {
    connection: Arc<ConnectionManager>,
    connected: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<String>>>,
    events: broadcast::Sender<ChatEvent>,
    pump: JoinHandle<()>,
}

impl RealtimeEventBridge {
    pub fn attach(
        connection: Arc<ConnectionManager>,
        store: Arc<ConversationStore>,
        presence: Arc<PresenceTracker>,
        event_buffer: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_buffer);
        let connected = Arc::new(AtomicBool::new(false));
        let last_error = Arc::new(Mutex::new(None));

        let link_rx = connection.subscribe();
        let pump = tokio::spawn(pump_events(
            link_rx,
            store,
            presence,
            connected.clone(),
            last_error.clone(),
            events.clone(),
        ));

        Self {
            connection,
            connected,
            last_error,
            events,
            pump,
        }
    }

    /// Attach one more consumer; drop the receiver to detach
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub async fn connecting(&self) -> bool {
        self.connection.state().await == LinkState::Connecting
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.lock().await.clone()
    }
}

impl Drop for RealtimeEventBridge {
    fn drop(&mut self) {
        // Detach cleanly; the shared connection stays up for other consumers
        self.pump.abort();
    }
}

async fn pump_events(
    mut link_rx: broadcast::Receiver<LinkEvent>,
    store: Arc<ConversationStore>,
    presence: Arc<PresenceTracker>,
    connected: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<String>>>,
    events: broadcast::Sender<ChatEvent>,
) {
    loop {
        let link_event = match link_rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Event bridge lagged {} connection events", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match link_event {
            LinkEvent::Opened => {
                connected.store(true, Ordering::Relaxed);
                *last_error.lock().await = None;
                // Presence is volatile: every new connection starts blank
                presence.reset().await;
                let _ = events.send(ChatEvent::Connected);
            }
            LinkEvent::Closed { deliberate } => {
                connected.store(false, Ordering::Relaxed);
                let _ = events.send(ChatEvent::Disconnected { deliberate });
            }
            LinkEvent::Exhausted => {
                connected.store(false, Ordering::Relaxed);
                let _ = events.send(ChatEvent::ReconnectExhausted);
            }
            LinkEvent::TransportError(message) => {
                *last_error.lock().await = Some(message.clone());
                let _ = events.send(ChatEvent::ConnectionError(message));
            }
            LinkEvent::Frame(envelope) => match PushEvent::decode(&envelope) {
                Ok(Some(PushEvent::NewMessage(message))) => {
                    store.apply_incoming_message(message.clone()).await;
                    let _ = events.send(ChatEvent::MessageArrived(message));
                }
                Ok(Some(PushEvent::ConversationUpdate(conversation))) => {
                    store.apply_conversation_update(conversation.clone()).await;
                    let _ = events.send(ChatEvent::ConversationUpdated(conversation));
                }
                Ok(Some(PushEvent::UserStatusChange { user_id, status })) => {
                    presence.apply(&user_id, status).await;
                    let _ = events.send(ChatEvent::PresenceChanged { user_id, status });
                }
                Ok(Some(PushEvent::Typing {
                    conversation_id,
                    user_id,
                    is_typing,
                })) => {
                    let _ = events.send(ChatEvent::TypingChanged {
                        conversation_id,
                        user_id,
                        is_typing,
                    });
                }
                Ok(Some(PushEvent::ReadReceipt {
                    conversation_id,
                    message_ids,
                })) => {
                    store.apply_read_receipt(&conversation_id, &message_ids).await;
                    let _ = events.send(ChatEvent::ReadReceiptAcknowledged {
                        conversation_id,
                        message_ids,
                    });
                }
                Ok(None) => debug!("Ignoring unknown push event type: {}", envelope.kind),
                Err(e) => warn!("Dropping malformed {} payload: {}", envelope.kind, e),
            },
        }
    }
}
