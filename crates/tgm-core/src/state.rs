//! StateStore - lifecycle state of every account session
//!
//! Every write is broadcast to the monitoring group. Reads never block on
//! notification delivery.

use crate::notify::{ClientEvent, Notifier, MONITORING_GROUP};
use crate::types::LifecycleState;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Account id -> lifecycle state, with change broadcast
pub struct StateStore {
    states: RwLock<HashMap<Uuid, LifecycleState>>,
    notifier: Arc<dyn Notifier>,
}

impl StateStore {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            notifier,
        }
    }

    /// Record a state and broadcast it, even when unchanged
    pub async fn set_state(&self, account_id: Uuid, state: LifecycleState) {
        let previous = {
            let mut states = self.states.write().await;
            states.insert(account_id, state)
        };

        info!(
            account_id = %account_id,
            from = %previous.unwrap_or(LifecycleState::Stopped),
            to = %state,
            "Account state changed"
        );

        self.notifier
            .push_to_group(
                MONITORING_GROUP,
                ClientEvent::ReceiveClientState { account_id, state },
            )
            .await;
    }

    /// Current state, `Stopped` if none recorded
    pub async fn get_state(&self, account_id: Uuid) -> LifecycleState {
        self.states
            .read()
            .await
            .get(&account_id)
            .copied()
            .unwrap_or(LifecycleState::Stopped)
    }

    /// Snapshot of every recorded state
    pub async fn get_all_states(&self) -> HashMap<Uuid, LifecycleState> {
        self.states.read().await.clone()
    }

    /// Forget an account. Broadcasts `Stopped` only if an entry was removed.
    pub async fn clear_state(&self, account_id: Uuid) -> bool {
        let removed = self.states.write().await.remove(&account_id);
        if removed.is_none() {
            debug!(account_id = %account_id, "No state to clear");
            return false;
        }

        info!(account_id = %account_id, "Account state cleared");
        self.notifier
            .push_to_group(
                MONITORING_GROUP,
                ClientEvent::ReceiveClientState {
                    account_id,
                    state: LifecycleState::Stopped,
                },
            )
            .await;
        true
    }
}
