use std::collections::HashSet;
use tokio::sync::RwLock;
use tracing::warn;

/// Subscriber connection ids of a session
#[derive(Debug, Default)]
pub struct ConnectionSet {
    ids: RwLock<HashSet<String>>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the connection was already subscribed
    pub async fn add(&self, connection_id: &str) -> bool {
        let added = self.ids.write().await.insert(connection_id.to_string());
        if !added {
            warn!(connection_id = %connection_id, "Connection already subscribed");
        }
        added
    }

    pub async fn remove(&self, connection_id: &str) -> bool {
        self.ids.write().await.remove(connection_id)
    }

    pub async fn contains(&self, connection_id: &str) -> bool {
        self.ids.read().await.contains(connection_id)
    }

    pub async fn count(&self) -> usize {
        self.ids.read().await.len()
    }

    pub async fn snapshot(&self) -> Vec<String> {
        self.ids.read().await.iter().cloned().collect()
    }
}
