//! Long-lived session for a paired account.
//!
//! ```text
//! start ──► Starting ──(client ready)──► Running ──(dispose)──► Stopped
//!              │                            │
//!              └──(signed out / fatal)──► Error
//! ```
//!
//! Chat and message fetches wait for the readiness gate, then push their
//! results to every subscribed connection.

use super::base::SessionCore;
use super::gate::ReadinessGate;
use super::handler::UpdateHandler;
use crate::error::{Error, Result};
use crate::notify::{ClientEvent, Notifier, MONITORING_GROUP};
use crate::options::TdOptions;
use crate::protocol::{AuthorizationState, Chat, ChatPhotoInfo, Messages, ProtocolClient};
use crate::state::StateStore;
use crate::types::{Account, ChatSummary, LifecycleState, MessageSummary};
use crate::workdir;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Session for one paired account, shared by all of its subscribers
#[derive(Clone)]
pub struct AccountSession {
    inner: Arc<AccountInner>,
}

struct AccountInner {
    this: Weak<AccountInner>,
    core: SessionCore,
    account: Account,
    options: Arc<TdOptions>,
    ready: ReadinessGate,
    lifecycle: Mutex<LifecycleState>,
    states: Arc<StateStore>,
    notifier: Arc<dyn Notifier>,
}

impl AccountSession {
    /// Start a session in the account's canonical directory with one subscriber.
    ///
    /// On failure the session is torn down, its state is left at `Error` and
    /// the error is returned.
    pub async fn start(
        account: Account,
        client: Arc<dyn ProtocolClient>,
        options: Arc<TdOptions>,
        states: Arc<StateStore>,
        notifier: Arc<dyn Notifier>,
        connection_id: &str,
    ) -> Result<Self> {
        let work_dir = options.account_dir(&account.phone_number);
        let inner = Arc::new_cyclic(|this| AccountInner {
            this: this.clone(),
            core: SessionCore::new(client, work_dir),
            account,
            options,
            ready: ReadinessGate::new(),
            lifecycle: Mutex::new(LifecycleState::Starting),
            states,
            notifier,
        });

        let account_id = inner.account.id;
        inner
            .states
            .set_state(account_id, LifecycleState::Starting)
            .await;
        inner.core.connections().add(connection_id).await;

        if let Err(e) = inner.listen().await {
            error!(
                account_id = %account_id,
                error = %e,
                "Failed to start account session"
            );
            inner.enter_error().await;
            inner.core.dispose().await;
            return Err(e);
        }

        info!(
            account_id = %account_id,
            work_dir = %inner.core.work_dir().display(),
            "Account session started"
        );
        Ok(Self { inner })
    }

    pub fn account(&self) -> &Account {
        &self.inner.account
    }

    pub fn id(&self) -> Uuid {
        self.inner.account.id
    }

    /// Lifecycle state as seen by this session
    pub fn state(&self) -> LifecycleState {
        self.inner.lifecycle()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.is_ready()
    }

    pub async fn add_connection(&self, connection_id: &str) -> bool {
        let added = self.inner.core.connections().add(connection_id).await;
        if added {
            info!(
                account_id = %self.id(),
                connection_id = %connection_id,
                "Connection subscribed to account"
            );
        }
        added
    }

    pub async fn remove_connection(&self, connection_id: &str) -> bool {
        let removed = self.inner.core.connections().remove(connection_id).await;
        if removed {
            info!(
                account_id = %self.id(),
                connection_id = %connection_id,
                "Connection unsubscribed from account"
            );
        }
        removed
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.core.connections().count().await
    }

    /// Ask the client to load the chat list once ready.
    ///
    /// Chats arrive as new-chat updates and are pushed from there.
    pub async fn fetch_chats(&self) {
        let inner = &self.inner;
        info!(account_id = %self.id(), "Loading chats");

        let result = async {
            inner.core.scoped(inner.ready.wait()).await?;
            inner.core.load_chats(inner.options.chat_load_limit).await
        }
        .await;

        match result {
            Ok(()) => debug!(account_id = %self.id(), "Chat list requested"),
            Err(e) if e.is_cancelled() || inner.core.is_cancelled() => {
                info!(account_id = %self.id(), error = %e, "Chat loading cancelled")
            }
            Err(e) => {
                error!(account_id = %self.id(), error = %e, "Failed to load chats");
                inner
                    .push_to_subscribers(ClientEvent::ReceiveErrorMessage(format!(
                        "Error getting chats: {e}"
                    )))
                    .await;
            }
        }
    }

    /// Fetch one page of a chat's history and push it to every subscriber.
    ///
    /// A follow-up load fetches twice and reports the second result.
    pub async fn fetch_messages(&self, chat_id: i64, limit: i32, is_first_load: bool) {
        let inner = &self.inner;
        let result = async {
            inner.core.scoped(inner.ready.wait()).await?;
            let mut history = inner.core.get_chat_history(chat_id, limit).await?;
            if !is_first_load {
                history = inner.core.get_chat_history(chat_id, limit).await?;
            }
            Ok::<Messages, Error>(history)
        }
        .await;

        match result {
            Ok(history) => {
                let messages: Vec<MessageSummary> = history
                    .messages
                    .into_iter()
                    .flatten()
                    .map(|m| MessageSummary {
                        id: m.id,
                        content: m.content.to_string(),
                        date: m.date,
                        is_outgoing: m.is_outgoing,
                    })
                    .collect();
                debug!(
                    account_id = %self.id(),
                    chat_id,
                    count = messages.len(),
                    "Loaded messages"
                );
                inner
                    .push_to_subscribers(ClientEvent::ReceiveMessages {
                        account_id: self.id(),
                        chat_id,
                        messages,
                    })
                    .await;
            }
            Err(e) if e.is_cancelled() || inner.core.is_cancelled() => {
                info!(account_id = %self.id(), chat_id, error = %e, "Message loading cancelled")
            }
            Err(e) => {
                error!(account_id = %self.id(), chat_id, error = %e, "Failed to load messages");
                inner
                    .push_to_subscribers(ClientEvent::ReceiveErrorMessage(format!(
                        "Error getting messages: {e}"
                    )))
                    .await;
            }
        }
    }

    /// Release the session. Later calls are no-ops.
    pub async fn dispose(&self) {
        let inner = &self.inner;
        let Some(mut guard) = inner.core.begin_dispose().await else {
            return;
        };
        let account_id = self.id();

        inner.states.clear_state(account_id).await;
        inner.core.teardown(&mut guard).await;
        inner.ready.fail();
        {
            let mut lifecycle = inner.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
            if lifecycle.can_transition_to(LifecycleState::Stopped) {
                *lifecycle = LifecycleState::Stopped;
            }
        }

        inner
            .notifier
            .push_to_group(
                MONITORING_GROUP,
                ClientEvent::ReceiveClientState {
                    account_id,
                    state: LifecycleState::Stopped,
                },
            )
            .await;
        info!(account_id = %account_id, "Account session disposed");
    }
}

impl AccountInner {
    async fn listen(&self) -> Result<()> {
        workdir::ensure_dir(&self.options.directory).await?;
        let handler: Weak<dyn UpdateHandler> = self.this.clone();
        self.core.start_listening(handler).await
    }

    fn lifecycle(&self) -> LifecycleState {
        *self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply a transition locally and announce it. Illegal transitions are dropped.
    async fn transition(&self, next: LifecycleState) -> bool {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
            let current = *lifecycle;
            if !current.can_transition_to(next) {
                debug!(
                    account_id = %self.account.id,
                    from = %current,
                    to = %next,
                    "Ignoring lifecycle transition"
                );
                return false;
            }
            *lifecycle = next;
        }
        self.states.set_state(self.account.id, next).await;
        true
    }

    async fn enter_error(&self) {
        self.transition(LifecycleState::Error).await;
        self.ready.fail();
    }

    async fn push_to_subscribers(&self, event: ClientEvent) {
        let connections = self.core.connections().snapshot().await;
        self.notifier.push_to_connections(&connections, event).await;
    }

    async fn push_thumbnail(&self, chat_id: i64, photo: ChatPhotoInfo) {
        let file = photo.small;
        if file.local.is_downloading_completed {
            self.push_photo_file(chat_id, &file.local.path).await;
            return;
        }

        let Some(this) = self.this.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            match this.core.download_file(file.id).await {
                Ok(downloaded) => this.push_photo_file(chat_id, &downloaded.local.path).await,
                Err(e) if e.is_cancelled() => {}
                Err(e) => warn!(
                    account_id = %this.account.id,
                    chat_id,
                    file_id = file.id,
                    error = %e,
                    "Failed to download chat photo"
                ),
            }
        });
    }

    async fn push_photo_file(&self, chat_id: i64, path: &str) {
        match tokio::fs::read(path).await {
            Ok(photo) => {
                self.push_to_subscribers(ClientEvent::ReceiveChatPhoto {
                    account_id: self.account.id,
                    chat_id,
                    photo,
                })
                .await
            }
            Err(e) => warn!(
                account_id = %self.account.id,
                chat_id,
                path = %path,
                error = %e,
                "Failed to read chat photo"
            ),
        }
    }
}

#[async_trait]
impl UpdateHandler for AccountInner {
    async fn on_authorization_state(&self, state: AuthorizationState) {
        match state {
            AuthorizationState::WaitParameters => {
                let Some(this) = self.this.upgrade() else {
                    return;
                };
                tokio::spawn(async move {
                    match this.core.set_parameters(&this.options).await {
                        Ok(()) => debug!(account_id = %this.account.id, "Client parameters set"),
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => error!(
                            account_id = %this.account.id,
                            error = %e,
                            "Failed to set client parameters"
                        ),
                    }
                });
            }
            AuthorizationState::WaitPhoneNumber => {
                warn!(
                    account_id = %self.account.id,
                    "Account is no longer authorized"
                );
                self.enter_error().await;
            }
            AuthorizationState::Ready => {
                if self.ready.release() {
                    info!(account_id = %self.account.id, "Account client ready");
                    self.transition(LifecycleState::Running).await;
                }
            }
            AuthorizationState::Closed => {
                debug!(account_id = %self.account.id, "Account client closed")
            }
            _ => {}
        }
    }

    async fn on_new_chat(&self, chat: Chat) {
        self.push_to_subscribers(ClientEvent::ReceiveChat {
            account_id: self.account.id,
            chat: ChatSummary {
                id: chat.id,
                title: chat.title,
            },
        })
        .await;

        if let Some(photo) = chat.photo {
            self.push_thumbnail(chat.id, photo).await;
        }
    }
}
