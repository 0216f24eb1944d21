/// Peer presence, fed exclusively by realtime events
///
/// Volatile by design: no fetch path, no persistence, wiped on reconnect.
use crate::types::PresenceStatus;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct PresenceTracker {
    statuses: RwLock<HashMap<String, PresenceStatus>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn apply(&self, user_id: &str, status: PresenceStatus) {
        let mut statuses = self.statuses.write().await;
        if status == PresenceStatus::Offline {
            // Absence already means offline
            statuses.remove(user_id);
        } else {
            statuses.insert(user_id.to_string(), status);
        }
    }

    pub async fn status_of(&self, user_id: &str) -> PresenceStatus {
        self.statuses
            .read()
            .await
            .get(user_id)
            .copied()
            .unwrap_or(PresenceStatus::Offline)
    }

    pub async fn snapshot(&self) -> HashMap<String, PresenceStatus> {
        self.statuses.read().await.clone()
    }

    /// Drop every entry; called on every reconnect
    pub async fn reset(&self) {
        self.statuses.write().await.clear();
    }
}
