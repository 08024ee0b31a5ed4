//! Push notifications to subscriber connections.
//!
//! Delivery is fire-and-forget: at most once, no acknowledgment. The transport
//! behind [`Notifier`] lives outside the core.

use crate::types::{Account, ChatSummary, LifecycleState, MessageSummary};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// Broadcast audience for account state changes
pub const MONITORING_GROUP: &str = "Monitoring";

/// Events pushed to subscribers.
///
/// Serialized as `{"event": "<name>", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    ReceiveAccounts(Vec<Account>),
    ReceiveChat {
        account_id: Uuid,
        chat: ChatSummary,
    },
    ReceiveChatPhoto {
        account_id: Uuid,
        chat_id: i64,
        #[serde(serialize_with = "as_base64")]
        photo: Vec<u8>,
    },
    ReceiveMessages {
        account_id: Uuid,
        chat_id: i64,
        messages: Vec<MessageSummary>,
    },
    ReceiveErrorMessage(String),
    ReceiveQrString(String),
    ReceiveConfirmSuccessfulSignIn {
        is_success: bool,
    },
    ReceiveClientState {
        account_id: Uuid,
        state: LifecycleState,
    },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReceiveAccounts(_) => "receiveAccounts",
            Self::ReceiveChat { .. } => "receiveChat",
            Self::ReceiveChatPhoto { .. } => "receiveChatPhoto",
            Self::ReceiveMessages { .. } => "receiveMessages",
            Self::ReceiveErrorMessage(_) => "receiveErrorMessage",
            Self::ReceiveQrString(_) => "receiveQrString",
            Self::ReceiveConfirmSuccessfulSignIn { .. } => "receiveConfirmSuccessfulSignIn",
            Self::ReceiveClientState { .. } => "receiveClientState",
        }
    }
}

fn as_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

/// Push/notification collaborator.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Push an event to a single connection.
    async fn push_to_connection(&self, connection_id: &str, event: ClientEvent);

    /// Push an event to each of the given connections.
    async fn push_to_connections(&self, connection_ids: &[String], event: ClientEvent) {
        for connection_id in connection_ids {
            self.push_to_connection(connection_id, event.clone()).await;
        }
    }

    /// Push an event to every member of a named group.
    async fn push_to_group(&self, group: &str, event: ClientEvent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_event_shape() {
        let account_id = Uuid::nil();
        let event = ClientEvent::ReceiveClientState {
            account_id,
            state: LifecycleState::Running,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "receiveClientState",
                "data": {"account_id": account_id.to_string(), "state": "running"}
            })
        );
        assert_eq!(event.name(), "receiveClientState");
    }

    #[test]
    fn test_photo_bytes_are_base64() {
        let event = ClientEvent::ReceiveChatPhoto {
            account_id: Uuid::nil(),
            chat_id: 5,
            photo: b"png".to_vec(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["data"]["photo"], "cG5n");
    }

    #[test]
    fn test_error_message_event() {
        let event = ClientEvent::ReceiveErrorMessage("boom".into());
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"event": "receiveErrorMessage", "data": "boom"}));
    }
}
