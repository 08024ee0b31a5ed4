use super::connections::ConnectionSet;
use super::handler::{dispatch, UpdateHandler};
use crate::error::{Error, Result};
use crate::options::TdOptions;
use crate::protocol::{
    parse_response, Command, File, Messages, ProtocolClient, TdlibParameters, User,
};
use crate::workdir;
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// State shared by every session kind: the client handle, its working
/// directory, subscribers, cancellation scope and disposal guard.
pub struct SessionCore {
    client: Arc<dyn ProtocolClient>,
    work_dir: PathBuf,
    connections: ConnectionSet,
    cancel: CancellationToken,
    /// `true` once the client was closed. Commands hold the read side.
    client_closed: RwLock<bool>,
    listener: std::sync::Mutex<Option<JoinHandle<()>>>,
    disposed: Mutex<bool>,
}

impl SessionCore {
    pub fn new(client: Arc<dyn ProtocolClient>, work_dir: PathBuf) -> Self {
        Self {
            client,
            work_dir,
            connections: ConnectionSet::new(),
            cancel: CancellationToken::new(),
            client_closed: RwLock::new(false),
            listener: std::sync::Mutex::new(None),
            disposed: Mutex::new(false),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn connections(&self) -> &ConnectionSet {
        &self.connections
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Subscribe to client updates and dispatch them to `handler`.
    ///
    /// Fails if the working directory does not exist.
    pub async fn start_listening(&self, handler: Weak<dyn UpdateHandler>) -> Result<()> {
        if !workdir::exists(&self.work_dir).await {
            return Err(Error::DirectoryMissing(self.work_dir.clone()));
        }

        let mut updates = self.client.subscribe_updates()?;
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                let update = tokio::select! {
                    _ = cancel.cancelled() => break,
                    update = updates.recv() => update,
                };
                let Some(update) = update else {
                    debug!("Update stream ended");
                    break;
                };
                let Some(handler) = handler.upgrade() else {
                    break;
                };
                dispatch(handler.as_ref(), update).await;
            }
        });

        *self.listener.lock().map_err(|_| Error::LockPoisoned)? = Some(handle);
        Ok(())
    }

    /// Run `fut` within the session's cancellation scope.
    ///
    /// Cancellation wins over a result that became ready at the same time.
    pub async fn scoped<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = fut => result,
        }
    }

    /// Submit a command. Rejected once the client is closed; aborted on disposal.
    pub async fn send(&self, command: Command) -> Result<Value> {
        let closed = self.client_closed.read().await;
        if *closed {
            return Err(Error::ClientClosed);
        }
        debug!(command = command.name(), "Sending command");
        self.scoped(self.client.send(command)).await
    }

    pub async fn set_parameters(&self, options: &TdOptions) -> Result<()> {
        let (database_directory, files_directory) = TdOptions::client_paths(&self.work_dir);
        let parameters = TdlibParameters {
            use_test_dc: false,
            database_directory: database_directory.to_string_lossy().into_owned(),
            files_directory: files_directory.to_string_lossy().into_owned(),
            database_encryption_key: String::new(),
            use_file_database: true,
            use_chat_info_database: true,
            use_message_database: true,
            use_secret_chats: false,
            api_id: options.api_id,
            api_hash: options.api_hash.clone(),
            system_language_code: options.system_language_code.clone(),
            device_model: options.device_model.clone(),
            system_version: options.system_version.clone(),
            application_version: options.application_version.clone(),
        };
        self.send(Command::SetTdlibParameters(parameters)).await?;
        Ok(())
    }

    pub async fn load_chats(&self, limit: i32) -> Result<()> {
        self.send(Command::LoadChats {
            chat_list: None,
            limit,
        })
        .await?;
        Ok(())
    }

    /// Most recent messages of a chat, newest first
    pub async fn get_chat_history(&self, chat_id: i64, limit: i32) -> Result<Messages> {
        let value = self
            .send(Command::GetChatHistory {
                chat_id,
                from_message_id: 0,
                offset: 0,
                limit,
                only_local: false,
            })
            .await?;
        parse_response(value)
    }

    /// Download a file at high priority, returning once it is complete
    pub async fn download_file(&self, file_id: i32) -> Result<File> {
        let value = self
            .send(Command::DownloadFile {
                file_id,
                priority: 1,
                offset: 0,
                limit: 0,
                synchronous: true,
            })
            .await?;
        parse_response(value)
    }

    pub async fn get_me(&self) -> Result<User> {
        let value = self.send(Command::GetMe).await?;
        parse_response(value)
    }

    pub async fn log_out(&self) -> Result<()> {
        self.send(Command::LogOut).await?;
        Ok(())
    }

    /// Close the client. Waits for in-flight commands; later commands are rejected.
    pub async fn close_client(&self) {
        let mut closed = self.client_closed.write().await;
        if *closed {
            return;
        }
        *closed = true;
        if let Err(e) = self.client.close().await {
            warn!(error = %e, work_dir = %self.work_dir.display(), "Failed to close client");
        }
    }

    /// Claim disposal. Returns `None` if the session was already disposed.
    pub(crate) async fn begin_dispose(&self) -> Option<MutexGuard<'_, bool>> {
        let guard = self.disposed.lock().await;
        if *guard {
            return None;
        }
        Some(guard)
    }

    /// Cancel pending work, stop update delivery and close the client
    pub(crate) async fn teardown(&self, guard: &mut MutexGuard<'_, bool>) {
        **guard = true;
        self.cancel.cancel();
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
        self.close_client().await;
    }

    /// Teardown without kind-specific steps. Returns `false` if already disposed.
    pub async fn dispose(&self) -> bool {
        match self.begin_dispose().await {
            Some(mut guard) => {
                self.teardown(&mut guard).await;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AuthorizationState, Update};
    use crate::testing::{eventually, FakeClient};
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingHandler {
        auth_updates: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl UpdateHandler for CountingHandler {
        async fn on_authorization_state(&self, _state: AuthorizationState) {
            self.auth_updates
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_start_listening_requires_directory() {
        let tmp = TempDir::new().unwrap();
        let client = FakeClient::new();
        let core = SessionCore::new(client, tmp.path().join("missing"));
        let handler: Arc<dyn UpdateHandler> = Arc::new(CountingHandler::default());

        let result = core.start_listening(Arc::downgrade(&handler)).await;
        assert!(matches!(result, Err(Error::DirectoryMissing(_))));
    }

    #[tokio::test]
    async fn test_updates_reach_handler_until_disposed() {
        let tmp = TempDir::new().unwrap();
        let client = FakeClient::new();
        let core = SessionCore::new(client.clone(), tmp.path().to_path_buf());
        let handler = Arc::new(CountingHandler::default());
        let weak: Weak<CountingHandler> = Arc::downgrade(&handler);
        core.start_listening(weak).await.unwrap();

        client.push_update(Update::authorization(AuthorizationState::Ready));
        eventually(|| handler.auth_updates.load(std::sync::atomic::Ordering::SeqCst) == 1).await;

        assert!(core.dispose().await);
        assert!(!core.dispose().await);
        client.push_update(Update::authorization(AuthorizationState::Ready));
        tokio::task::yield_now().await;

        assert_eq!(handler.auth_updates.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(client.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_disposal_cancels_in_flight_command() {
        let tmp = TempDir::new().unwrap();
        let client = FakeClient::new();
        client.hang("getChatHistory");
        let core = Arc::new(SessionCore::new(client.clone(), tmp.path().to_path_buf()));

        let pending = {
            let core = Arc::clone(&core);
            tokio::spawn(async move { core.get_chat_history(1, 50).await })
        };
        eventually(|| client.sent_names().contains(&"getChatHistory")).await;

        core.dispose().await;
        let result = pending.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(client.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_commands_rejected_after_close() {
        let tmp = TempDir::new().unwrap();
        let client = FakeClient::new();
        client.respond(
            "getMe",
            json!({"@type": "user", "id": 1, "first_name": "Ann", "phone_number": "1555"}),
        );
        let core = SessionCore::new(client.clone(), tmp.path().to_path_buf());

        assert_eq!(core.get_me().await.unwrap().phone_number, "1555");
        core.close_client().await;
        core.close_client().await;

        assert!(matches!(core.get_me().await, Err(Error::ClientClosed)));
        assert_eq!(client.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_set_parameters_uses_work_dir() {
        let tmp = TempDir::new().unwrap();
        let client = FakeClient::new();
        let core = SessionCore::new(client.clone(), tmp.path().join("15550001"));
        let options = TdOptions {
            api_id: 42,
            ..TdOptions::default()
        };

        core.set_parameters(&options).await.unwrap();

        let sent = client.sent();
        let Command::SetTdlibParameters(parameters) = &sent[0] else {
            panic!("expected parameters, got {:?}", sent[0]);
        };
        assert_eq!(parameters.api_id, 42);
        assert!(parameters.database_directory.ends_with("db"));
        assert!(parameters.database_directory.contains("15550001"));
    }
}
