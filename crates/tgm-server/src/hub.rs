//! WebSocket push hub.
//!
//! Every socket on `/tdclienthub` is one subscriber connection with a fresh
//! connection id. Inbound frames are JSON requests tagged by `method`:
//!
//! ```text
//! {"method": "connectToQrStream"}
//! {"method": "connectToMonitoring"}
//! {"method": "connectToAccountsStream"}
//! {"method": "loadMessages", "account_id": "...", "chat_id": 1, "is_first_load": true}
//! ```
//!
//! Outbound frames are serialized [`ClientEvent`]s.

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tgm_core::{ClientEvent, Notifier, MONITORING_GROUP};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::state::AppState;

/// Requests a subscriber can make
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum HubRequest {
    ConnectToQrStream,
    ConnectToMonitoring,
    ConnectToAccountsStream,
    LoadMessages {
        account_id: Uuid,
        chat_id: i64,
        is_first_load: bool,
    },
}

/// Connected subscribers and their groups
#[derive(Default)]
pub struct Hub {
    /// connection id -> outbound frames
    connections: RwLock<HashMap<String, mpsc::UnboundedSender<String>>>,
    /// group name -> connection ids
    groups: RwLock<HashMap<String, HashSet<String>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and return the receiver for its outbound frames
    pub async fn register(&self, connection_id: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections
            .write()
            .await
            .insert(connection_id.to_string(), tx);
        rx
    }

    /// Remove a connection from the hub and every group
    pub async fn unregister(&self, connection_id: &str) {
        self.connections.write().await.remove(connection_id);
        let mut groups = self.groups.write().await;
        for members in groups.values_mut() {
            members.remove(connection_id);
        }
        groups.retain(|_, members| !members.is_empty());
    }

    pub async fn join_group(&self, group: &str, connection_id: &str) {
        self.groups
            .write()
            .await
            .entry(group.to_string())
            .or_default()
            .insert(connection_id.to_string());
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    async fn deliver(&self, connection_id: &str, frame: String) {
        let sender = self.connections.read().await.get(connection_id).cloned();
        match sender {
            Some(tx) => {
                if tx.send(frame).is_err() {
                    debug!(connection_id = %connection_id, "Connection already closed");
                }
            }
            None => debug!(connection_id = %connection_id, "Dropping event for unknown connection"),
        }
    }
}

fn encode(event: &ClientEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!(event = event.name(), error = %e, "Failed to serialize event");
            None
        }
    }
}

#[async_trait]
impl Notifier for Hub {
    async fn push_to_connection(&self, connection_id: &str, event: ClientEvent) {
        if let Some(frame) = encode(&event) {
            self.deliver(connection_id, frame).await;
        }
    }

    async fn push_to_group(&self, group: &str, event: ClientEvent) {
        let Some(frame) = encode(&event) else {
            return;
        };
        let members: Vec<String> = self
            .groups
            .read()
            .await
            .get(group)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default();
        for connection_id in members {
            self.deliver(&connection_id, frame.clone()).await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Socket handling
// ─────────────────────────────────────────────────────────────────────────────

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4().to_string();
    info!(connection_id = %connection_id, "Subscriber connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut outbound = state.hub.register(&connection_id).await;

    let send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                break;
            }
        }
    });

    // Message loads can wait on readiness; keep them off the receive loop
    let mut loads = JoinSet::new();

    while let Some(result) = ws_rx.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        };

        let request: HubRequest = match serde_json::from_str(text.as_str()) {
            Ok(request) => request,
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "Invalid hub request");
                state
                    .hub
                    .push_to_connection(
                        &connection_id,
                        ClientEvent::ReceiveErrorMessage(format!("Invalid request: {e}")),
                    )
                    .await;
                continue;
            }
        };

        if matches!(request, HubRequest::LoadMessages { .. }) {
            let state = Arc::clone(&state);
            let connection_id = connection_id.clone();
            loads.spawn(async move { handle_request(&state, &connection_id, request).await });
        } else {
            handle_request(&state, &connection_id, request).await;
        }
        while loads.try_join_next().is_some() {}
    }

    loads.abort_all();
    state.registry.detach_onboarding(&connection_id).await;
    state.registry.detach_account_stream(&connection_id).await;
    state.hub.unregister(&connection_id).await;
    send_task.abort();
    info!(connection_id = %connection_id, "Subscriber disconnected");
}

async fn handle_request(state: &AppState, connection_id: &str, request: HubRequest) {
    debug!(connection_id = %connection_id, request = ?request, "Hub request");
    match request {
        HubRequest::ConnectToQrStream => state.registry.attach_onboarding(connection_id).await,
        HubRequest::ConnectToMonitoring => {
            state.hub.join_group(MONITORING_GROUP, connection_id).await;
            for (account_id, account_state) in state.registry.states().get_all_states().await {
                state
                    .hub
                    .push_to_connection(
                        connection_id,
                        ClientEvent::ReceiveClientState {
                            account_id,
                            state: account_state,
                        },
                    )
                    .await;
            }
            info!(connection_id = %connection_id, "Connected to monitoring");
        }
        HubRequest::ConnectToAccountsStream => {
            state.registry.attach_account_stream(connection_id).await
        }
        HubRequest::LoadMessages {
            account_id,
            chat_id,
            is_first_load,
        } => load_messages(state, connection_id, account_id, chat_id, is_first_load).await,
    }
}

async fn load_messages(
    state: &AppState,
    connection_id: &str,
    account_id: Uuid,
    chat_id: i64,
    is_first_load: bool,
) {
    if let Err(e) = state
        .registry
        .load_messages(account_id, chat_id, is_first_load)
        .await
    {
        warn!(
            connection_id = %connection_id,
            account_id = %account_id,
            error = %e,
            "Failed to load messages"
        );
        state
            .hub
            .push_to_connection(
                connection_id,
                ClientEvent::ReceiveErrorMessage(format!("Error getting messages: {e}")),
            )
            .await;
    }
}
