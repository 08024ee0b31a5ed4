//! Short-lived session that pairs a new account by QR code.
//!
//! ```text
//! WaitParameters ──► WaitPhoneNumber ──► WaitOtherDeviceConfirmation ──► Ready
//!   (parameters)       (request QR)          (push QR link)            (finalize)
//! ```
//!
//! Finalize resolves the account's identity, then either promotes the ephemeral
//! working directory to the canonical one and records the account, or logs the
//! duplicate authorization out. The outcome is always reported to the owning
//! connection.

use super::base::SessionCore;
use super::gate::CompletionGate;
use super::handler::UpdateHandler;
use crate::db::AccountStore;
use crate::error::Result;
use crate::notify::{ClientEvent, Notifier};
use crate::options::TdOptions;
use crate::protocol::{AuthorizationState, Command, ProtocolClient};
use crate::types::NewAccount;
use crate::workdir;
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

const ALREADY_SIGNED_IN: &str = "This account is already signed in.";

/// Pairing session owned by a single connection
#[derive(Clone)]
pub struct OnboardingSession {
    inner: Arc<OnboardingInner>,
}

struct OnboardingInner {
    this: Weak<OnboardingInner>,
    core: SessionCore,
    connection_id: String,
    options: Arc<TdOptions>,
    store: Arc<dyn AccountStore>,
    notifier: Arc<dyn Notifier>,
    completion: CompletionGate,
}

impl OnboardingSession {
    /// Create the ephemeral working directory and start listening.
    pub async fn start(
        connection_id: &str,
        client: Arc<dyn ProtocolClient>,
        options: Arc<TdOptions>,
        store: Arc<dyn AccountStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let work_dir = options.onboarding_dir(connection_id);
        let inner = Arc::new_cyclic(|this| OnboardingInner {
            this: this.clone(),
            core: SessionCore::new(client, work_dir),
            connection_id: connection_id.to_string(),
            options,
            store,
            notifier,
            completion: CompletionGate::new(),
        });

        if let Err(e) = workdir::ensure_dir(&inner.options.directory).await {
            inner.core.dispose().await;
            return Err(e);
        }
        if let Err(e) = workdir::create_exclusive(inner.core.work_dir()).await {
            // The directory belongs to someone else; leave it in place
            inner.core.dispose().await;
            return Err(e);
        }
        inner.core.connections().add(connection_id).await;

        let handler: Weak<dyn UpdateHandler> = inner.this.clone();
        if let Err(e) = inner.core.start_listening(handler).await {
            let session = Self { inner };
            session.dispose().await;
            return Err(e);
        }

        info!(
            connection_id = %connection_id,
            work_dir = %inner.core.work_dir().display(),
            "Onboarding session started"
        );
        Ok(Self { inner })
    }

    pub fn connection_id(&self) -> &str {
        &self.inner.connection_id
    }

    /// Release the session.
    ///
    /// A finalize already in progress gets a bounded window to finish. Unless
    /// it succeeded, the ephemeral working directory is deleted.
    pub async fn dispose(&self) {
        let inner = &self.inner;
        let Some(mut guard) = inner.core.begin_dispose().await else {
            return;
        };

        let outcome = inner
            .completion
            .wait(inner.options.onboarding_timeout)
            .await;
        if outcome.is_none() && inner.completion.is_armed() {
            warn!(
                connection_id = %inner.connection_id,
                "Sign-in did not complete before disposal"
            );
        }

        inner.core.teardown(&mut guard).await;

        if outcome != Some(true) {
            if let Err(e) = workdir::remove_all(inner.core.work_dir()).await {
                warn!(
                    connection_id = %inner.connection_id,
                    error = %e,
                    "Failed to remove onboarding directory"
                );
            }
        }
        info!(connection_id = %inner.connection_id, "Onboarding session disposed");
    }
}

impl OnboardingInner {
    async fn notify(&self, event: ClientEvent) {
        self.notifier
            .push_to_connection(&self.connection_id, event)
            .await;
    }

    async fn finalize(&self) {
        let success = match self.promote().await {
            Ok(success) => success,
            Err(e) if e.is_cancelled() => {
                info!(connection_id = %self.connection_id, "Sign-in abandoned");
                false
            }
            Err(e) => {
                error!(
                    connection_id = %self.connection_id,
                    error = %e,
                    "Failed to complete sign-in"
                );
                self.notify(ClientEvent::ReceiveErrorMessage(format!(
                    "Failed to complete sign-in: {e}"
                )))
                .await;
                false
            }
        };

        self.notify(ClientEvent::ReceiveConfirmSuccessfulSignIn {
            is_success: success,
        })
        .await;
        self.completion.complete(success);
    }

    /// Move the authorized client into its account's directory and record the account.
    ///
    /// Returns `Ok(false)` when the account was already paired.
    async fn promote(&self) -> Result<bool> {
        let me = self.core.get_me().await?;
        let canonical = self.options.account_dir(&me.phone_number);

        if workdir::exists(&canonical).await {
            warn!(
                connection_id = %self.connection_id,
                "Paired account already has a session"
            );
            if let Err(e) = self.core.log_out().await {
                warn!(error = %e, "Failed to log out duplicate authorization");
            }
            self.notify(ClientEvent::ReceiveErrorMessage(ALREADY_SIGNED_IN.to_string()))
                .await;
            return Ok(false);
        }

        self.core.close_client().await;
        workdir::promote(self.core.work_dir(), &canonical).await?;

        let new = NewAccount {
            phone_number: me.phone_number,
            first_name: me.first_name,
            last_name: Some(me.last_name).filter(|name| !name.is_empty()),
        };
        let account = match self.store.add_account(&new) {
            Ok(account) => account,
            Err(e) => {
                // Put the directory back so disposal cleans it up
                if let Err(rollback) = workdir::promote(&canonical, self.core.work_dir()).await {
                    warn!(error = %rollback, "Failed to roll back working directory");
                }
                return Err(e);
            }
        };

        info!(
            connection_id = %self.connection_id,
            account_id = %account.id,
            "Account paired"
        );
        Ok(true)
    }
}

#[async_trait]
impl UpdateHandler for OnboardingInner {
    async fn on_authorization_state(&self, state: AuthorizationState) {
        match state {
            AuthorizationState::WaitParameters => {
                let Some(this) = self.this.upgrade() else {
                    return;
                };
                tokio::spawn(async move {
                    if let Err(e) = this.core.set_parameters(&this.options).await {
                        if !e.is_cancelled() {
                            error!(error = %e, "Failed to set onboarding parameters");
                        }
                    }
                });
            }
            AuthorizationState::WaitPhoneNumber => {
                let Some(this) = self.this.upgrade() else {
                    return;
                };
                tokio::spawn(async move {
                    let request = Command::RequestQrCodeAuthentication {
                        other_user_ids: Vec::new(),
                    };
                    match this.core.send(request).await {
                        Ok(_) => debug!(connection_id = %this.connection_id, "QR code requested"),
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => {
                            error!(error = %e, "Failed to request QR code");
                            this.notify(ClientEvent::ReceiveErrorMessage(format!(
                                "Failed to request QR code: {e}"
                            )))
                            .await;
                        }
                    }
                });
            }
            AuthorizationState::WaitOtherDeviceConfirmation { link } => {
                debug!(connection_id = %self.connection_id, "QR link issued");
                self.notify(ClientEvent::ReceiveQrString(link)).await;
            }
            AuthorizationState::Ready => {
                if !self.completion.arm() {
                    return;
                }
                let Some(this) = self.this.upgrade() else {
                    return;
                };
                tokio::spawn(async move { this.finalize().await });
            }
            _ => {}
        }
    }
}
