/// Process-wide registry enforcing at most one live connection per user
use crate::config::Config;
use crate::connection::manager::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub struct ConnectionRegistry {
    config: Config,
    connections: RwLock<HashMap<String, Arc<ConnectionManager>>>,
}

impl ConnectionRegistry {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Return the connection for `user_id`, constructing and registering one
    /// if absent. The entry is created under the write lock, so concurrent
    /// callers always observe the same instance.
    pub async fn get_or_create(&self, user_id: &str, token: &str) -> Arc<ConnectionManager> {
        let mut connections = self.connections.write().await;
        if let Some(existing) = connections.get(user_id) {
            return existing.clone();
        }
        debug!("Registering connection for user {}", user_id);
        let manager = Arc::new(ConnectionManager::new(user_id, token, self.config.clone()));
        connections.insert(user_id.to_string(), manager.clone());
        manager
    }

    /// Deliberately close and evict the connection for `user_id`.
    /// Idempotent: removing an unknown user is a no-op.
    pub async fn remove(&self, user_id: &str) {
        let removed = self.connections.write().await.remove(user_id);
        match removed {
            Some(manager) => {
                manager.disconnect().await;
                info!("Removed connection for user {}", user_id);
            }
            None => debug!("remove() for unknown user {}", user_id),
        }
    }

    pub async fn contains(&self, user_id: &str) -> bool {
        self.connections.read().await.contains_key(user_id)
    }

    /// Tear down every registered connection
    pub async fn clear(&self) {
        let drained: Vec<_> = self.connections.write().await.drain().collect();
        for (user_id, manager) in drained {
            manager.disconnect().await;
            info!("Removed connection for user {}", user_id);
        }
    }
}
