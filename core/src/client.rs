/// Per-user client facade wiring the messaging subsystems together
use crate::api::MessageApi;
use crate::bridge::{ChatEvent, RealtimeEventBridge};
use crate::config::Config;
use crate::connection::{ConnectionManager, ConnectionRegistry};
use crate::dispatch::MessageDispatcher;
use crate::error::Result;
use crate::presence::PresenceTracker;
use crate::store::ConversationStore;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Everything one signed-in user needs: the shared connection (via the
/// registry), the conversation store, presence, the dispatcher and the
/// realtime bridge. Purely compositional — each part stays independently
/// usable.
pub struct MessengerClient {
    user_id: String,
    registry: Arc<ConnectionRegistry>,
    connection: Arc<ConnectionManager>,
    store: Arc<ConversationStore>,
    presence: Arc<PresenceTracker>,
    dispatcher: MessageDispatcher,
    bridge: RealtimeEventBridge,
}

impl MessengerClient {
    /// Build the stack for `user_id` and open its push channel
    pub async fn connect(
        registry: Arc<ConnectionRegistry>,
        api: Arc<dyn MessageApi>,
        config: Config,
        user_id: &str,
        token: &str,
    ) -> Result<Self> {
        config.validate()?;

        let connection = registry.get_or_create(user_id, token).await;
        let store = Arc::new(ConversationStore::new(user_id, api.clone()));
        let presence = Arc::new(PresenceTracker::new());
        let bridge = RealtimeEventBridge::attach(
            connection.clone(),
            store.clone(),
            presence.clone(),
            config.event_buffer,
        );
        let dispatcher =
            MessageDispatcher::new(config, api, store.clone(), connection.clone());
        connection.connect().await;

        info!("Messenger client ready for user {}", user_id);
        Ok(Self {
            user_id: user_id.to_string(),
            registry,
            connection,
            store,
            presence,
            dispatcher,
            bridge,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    pub fn dispatcher(&self) -> &MessageDispatcher {
        &self.dispatcher
    }

    pub fn bridge(&self) -> &RealtimeEventBridge {
        &self.bridge
    }

    /// Subscribe to typed realtime events
    pub fn events(&self) -> broadcast::Receiver<ChatEvent> {
        self.bridge.subscribe()
    }

    /// Reopen the push channel after reconnect exhaustion (user action or
    /// app-foreground). No-op while connecting or connected.
    pub async fn reconnect(&self) {
        self.connection.connect().await;
    }

    /// Tear down: deliberate close, eviction from the registry, and a wipe of
    /// all volatile local state. Safe to call more than once.
    pub async fn disconnect(&self) {
        self.dispatcher.stop_typing().await;
        self.registry.remove(&self.user_id).await;
        self.store.clear().await;
        self.presence.reset().await;
        info!("Messenger client shut down for user {}", self.user_id);
    }
}
