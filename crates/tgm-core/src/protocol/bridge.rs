//! Protocol client backed by a bridge process.
//!
//! The bridge executable wraps the native client library and speaks
//! newline-delimited JSON on stdin/stdout:
//!
//! - every request carries a numeric `@extra` that the bridge echoes back on the
//!   response object
//! - objects without a known `@extra` whose `@type` starts with `update` are
//!   updates and are forwarded to the subscriber
//! - `{"@type": "error", "code": .., "message": ..}` responses fail the request
//!
//! When the bridge exits, every pending request fails with `ClientClosed`.

use super::{ClientFactory, Command, ProtocolClient, Update, UpdateStream};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command as ProcessCommand};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Client that talks to one bridge child process.
pub struct BridgeClient {
    outgoing: mpsc::UnboundedSender<String>,
    pending: PendingMap,
    /// Cleared by the reader once bridge output ends
    alive: Arc<AtomicBool>,
    updates: std::sync::Mutex<Option<UpdateStream>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    child: Mutex<Option<Child>>,
}

impl BridgeClient {
    /// Spawn the bridge process and start its reader and writer tasks.
    pub fn spawn(program: &PathBuf, args: &[String]) -> Result<Arc<Self>> {
        let mut child = ProcessCommand::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Other("bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Other("bridge stdout unavailable".to_string()))?;

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let (update_tx, update_rx) = mpsc::unbounded_channel::<Update>();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        // Silence the native library before anything else reaches it
        let verbosity = serde_json::to_string(&Command::SetLogVerbosityLevel {
            new_verbosity_level: 0,
        })?;
        let _ = outgoing.send(verbosity);

        tokio::spawn(async move {
            while let Some(line) = outgoing_rx.recv().await {
                let written = async {
                    stdin.write_all(line.as_bytes()).await?;
                    stdin.write_all(b"\n").await?;
                    stdin.flush().await
                }
                .await;
                if let Err(e) = written {
                    debug!(error = %e, "Bridge stdin closed");
                    break;
                }
            }
        });

        let alive = Arc::new(AtomicBool::new(true));
        let reader_alive = Arc::clone(&alive);
        let reader_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => route_line(&line, &reader_pending, &update_tx).await,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Failed reading from bridge");
                        break;
                    }
                }
            }

            reader_alive.store(false, Ordering::SeqCst);
            let mut pending = reader_pending.lock().await;
            for (_, tx) in pending.drain() {
                let _ = tx.send(Err(Error::ClientClosed));
            }
            debug!("Bridge output closed");
        });

        Ok(Arc::new(Self {
            outgoing,
            pending,
            alive,
            updates: std::sync::Mutex::new(Some(update_rx)),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            child: Mutex::new(Some(child)),
        }))
    }

    async fn request(&self, command: &Command) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut value = serde_json::to_value(command)?;
        if let Value::Object(map) = &mut value {
            map.insert("@extra".to_string(), json!(id));
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if !self.alive.load(Ordering::SeqCst) {
                return Err(Error::ClientClosed);
            }
            pending.insert(id, tx);
        }

        if self.outgoing.send(value.to_string()).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(Error::ClientClosed);
        }

        rx.await.map_err(|_| Error::ClientClosed)?
    }
}

#[async_trait]
impl ProtocolClient for BridgeClient {
    async fn send(&self, command: Command) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ClientClosed);
        }
        self.request(&command).await
    }

    fn subscribe_updates(&self) -> Result<UpdateStream> {
        self.updates
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .take()
            .ok_or(Error::AlreadySubscribed)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        match tokio::time::timeout(CLOSE_TIMEOUT, self.request(&Command::Close)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!(error = %e, "Bridge close command failed"),
            Err(_) => warn!("Bridge did not acknowledge close in time"),
        }

        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
        Ok(())
    }
}

/// Route one line of bridge output to its pending request or the update stream.
async fn route_line(line: &str, pending: &PendingMap, updates: &mpsc::UnboundedSender<Update>) {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Discarding malformed bridge output");
            return;
        }
    };

    if let Some(id) = value.get("@extra").and_then(Value::as_u64) {
        let waiter = pending.lock().await.remove(&id);
        if let Some(tx) = waiter {
            let _ = tx.send(into_result(value));
            return;
        }
    }

    let kind = value
        .get("@type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if kind.starts_with("update") {
        match serde_json::from_value::<Update>(value) {
            Ok(update) => {
                let _ = updates.send(update);
            }
            Err(e) => debug!(error = %e, "Skipping undecodable update"),
        }
    } else {
        debug!(kind = %kind, "Ignoring unsolicited bridge object");
    }
}

fn into_result(value: Value) -> Result<Value> {
    if value.get("@type").and_then(Value::as_str) == Some("error") {
        let code = value.get("code").and_then(Value::as_i64).unwrap_or_default() as i32;
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(Error::protocol(code, message));
    }
    Ok(value)
}

/// Spawns one bridge process per session.
#[derive(Debug, Clone)]
pub struct BridgeClientFactory {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl BridgeClientFactory {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl ClientFactory for BridgeClientFactory {
    fn create(&self) -> Result<Arc<dyn ProtocolClient>> {
        let client: Arc<dyn ProtocolClient> = BridgeClient::spawn(&self.program, &self.args)?;
        Ok(client)
    }
}
