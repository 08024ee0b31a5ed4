//! SessionRegistry - owns every live session
//!
//! Account sessions are shared: the first connection to open the accounts
//! stream starts one session per persisted account, later connections
//! subscribe to the existing sessions, and the last one to leave disposes them.
//! Onboarding sessions belong to exactly one connection.

use crate::db::AccountStore;
use crate::error::{Error, Result};
use crate::notify::{ClientEvent, Notifier};
use crate::options::TdOptions;
use crate::protocol::ClientFactory;
use crate::session::{AccountSession, OnboardingSession};
use crate::state::StateStore;
use crate::types::{Account, AccountView};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct SessionRegistry {
    store: Arc<dyn AccountStore>,
    factory: Arc<dyn ClientFactory>,
    notifier: Arc<dyn Notifier>,
    states: Arc<StateStore>,
    options: Arc<TdOptions>,
    /// Live account sessions: account id -> session
    accounts: RwLock<HashMap<Uuid, AccountSession>>,
    /// Live onboarding sessions: connection id -> session
    onboarding: RwLock<HashMap<String, OnboardingSession>>,
    /// Serializes attach/detach of account subscribers
    operation_lock: Mutex<()>,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn AccountStore>,
        factory: Arc<dyn ClientFactory>,
        notifier: Arc<dyn Notifier>,
        options: TdOptions,
    ) -> Self {
        let states = Arc::new(StateStore::new(notifier.clone()));
        Self {
            store,
            factory,
            notifier,
            states,
            options: Arc::new(options),
            accounts: RwLock::new(HashMap::new()),
            onboarding: RwLock::new(HashMap::new()),
            operation_lock: Mutex::new(()),
        }
    }

    pub fn states(&self) -> &Arc<StateStore> {
        &self.states
    }

    pub fn options(&self) -> &TdOptions {
        &self.options
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Onboarding
    // ─────────────────────────────────────────────────────────────────────────

    /// Start a QR pairing session owned by `connection_id`
    pub async fn attach_onboarding(&self, connection_id: &str) {
        if self.onboarding.read().await.contains_key(connection_id) {
            warn!(connection_id = %connection_id, "Onboarding already in progress");
            return;
        }

        // No map lock is held while the session starts.
        let started = match self.factory.create() {
            Ok(client) => {
                OnboardingSession::start(
                    connection_id,
                    client,
                    self.options.clone(),
                    self.store.clone(),
                    self.notifier.clone(),
                )
                .await
            }
            Err(e) => Err(e),
        };

        let session = match started {
            Ok(session) => session,
            Err(e) => {
                error!(connection_id = %connection_id, error = %e, "Failed to start onboarding");
                self.notifier
                    .push_to_connection(
                        connection_id,
                        ClientEvent::ReceiveErrorMessage(format!("Failed to start sign-in: {e}")),
                    )
                    .await;
                return;
            }
        };

        let loser = {
            let mut sessions = self.onboarding.write().await;
            if sessions.contains_key(connection_id) {
                Some(session)
            } else {
                sessions.insert(connection_id.to_string(), session);
                None
            }
        };
        match loser {
            Some(session) => {
                warn!(connection_id = %connection_id, "Onboarding already in progress");
                session.dispose().await;
            }
            None => info!(connection_id = %connection_id, "Connected to QR stream"),
        }
    }

    /// Dispose the onboarding session of `connection_id`, if any
    pub async fn detach_onboarding(&self, connection_id: &str) {
        let session = self.onboarding.write().await.remove(connection_id);
        if let Some(session) = session {
            session.dispose().await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Account stream
    // ─────────────────────────────────────────────────────────────────────────

    /// Subscribe `connection_id` to every persisted account.
    ///
    /// Pushes the account list, starts missing sessions and requests each
    /// account's chats.
    pub async fn attach_account_stream(&self, connection_id: &str) {
        let accounts = match self.store.list_accounts() {
            Ok(accounts) => accounts,
            Err(e) => {
                error!(connection_id = %connection_id, error = %e, "Failed to list accounts");
                self.notifier
                    .push_to_connection(
                        connection_id,
                        ClientEvent::ReceiveErrorMessage(format!("Error loading accounts: {e}")),
                    )
                    .await;
                return;
            }
        };

        self.notifier
            .push_to_connection(connection_id, ClientEvent::ReceiveAccounts(accounts.clone()))
            .await;

        let _lock = self.operation_lock.lock().await;
        for account in accounts {
            let existing = self.accounts.read().await.get(&account.id).cloned();
            let session = match existing {
                Some(session) => {
                    session.add_connection(connection_id).await;
                    session
                }
                None => match self.start_account(account, connection_id).await {
                    Some(session) => session,
                    None => continue,
                },
            };

            tokio::spawn(async move { session.fetch_chats().await });
        }
        info!(connection_id = %connection_id, "Connected to accounts stream");
    }

    async fn start_account(
        &self,
        account: Account,
        connection_id: &str,
    ) -> Option<AccountSession> {
        let account_id = account.id;
        let started = match self.factory.create() {
            Ok(client) => {
                AccountSession::start(
                    account,
                    client,
                    self.options.clone(),
                    self.states.clone(),
                    self.notifier.clone(),
                    connection_id,
                )
                .await
            }
            Err(e) => Err(e),
        };

        match started {
            Ok(session) => {
                self.accounts.write().await.insert(account_id, session.clone());
                Some(session)
            }
            Err(e) => {
                error!(account_id = %account_id, error = %e, "Failed to start account session");
                self.notifier
                    .push_to_connection(
                        connection_id,
                        ClientEvent::ReceiveErrorMessage(format!(
                            "Failed to start account session: {e}"
                        )),
                    )
                    .await;
                None
            }
        }
    }

    /// Unsubscribe `connection_id`; sessions left without subscribers are disposed
    pub async fn detach_account_stream(&self, connection_id: &str) {
        let _lock = self.operation_lock.lock().await;
        let sessions: Vec<AccountSession> = self.accounts.read().await.values().cloned().collect();

        for session in sessions {
            session.remove_connection(connection_id).await;
            if session.connection_count().await > 0 {
                continue;
            }
            self.accounts.write().await.remove(&session.id());
            session.dispose().await;
        }
        debug!(connection_id = %connection_id, "Detached from accounts stream");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn get_account_session(&self, account_id: Uuid) -> Option<AccountSession> {
        self.accounts.read().await.get(&account_id).cloned()
    }

    /// Fetch a page of messages and push it to the account's subscribers
    pub async fn load_messages(
        &self,
        account_id: Uuid,
        chat_id: i64,
        is_first_load: bool,
    ) -> Result<()> {
        let session = self
            .get_account_session(account_id)
            .await
            .ok_or_else(|| Error::SessionNotFound(account_id.to_string()))?;
        session
            .fetch_messages(chat_id, self.options.message_page_size, is_first_load)
            .await;
        Ok(())
    }

    /// Persisted accounts with their current lifecycle state
    pub async fn account_views(&self) -> Result<Vec<AccountView>> {
        let accounts = self.store.list_accounts()?;
        let mut views = Vec::with_capacity(accounts.len());
        for account in accounts {
            let state = self.states.get_state(account.id).await;
            views.push(AccountView {
                id: account.id,
                first_name: account.first_name,
                phone_number: account.phone_number,
                state,
            });
        }
        Ok(views)
    }

    pub async fn account_session_count(&self) -> usize {
        self.accounts.read().await.len()
    }

    pub async fn onboarding_session_count(&self) -> usize {
        self.onboarding.read().await.len()
    }

    /// Dispose every live session
    pub async fn shutdown(&self) {
        let onboarding: Vec<OnboardingSession> =
            self.onboarding.write().await.drain().map(|(_, s)| s).collect();
        let accounts: Vec<AccountSession> = {
            let _lock = self.operation_lock.lock().await;
            self.accounts.write().await.drain().map(|(_, s)| s).collect()
        };
        info!(
            accounts = accounts.len(),
            onboarding = onboarding.len(),
            "Disposing sessions"
        );

        let mut tasks = JoinSet::new();
        for session in onboarding {
            tasks.spawn(async move { session.dispose().await });
        }
        for session in accounts {
            tasks.spawn(async move { session.dispose().await });
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Session disposal task failed");
            }
        }
    }
}
