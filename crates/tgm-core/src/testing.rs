//! In-memory collaborators for exercising sessions without a real client.

use crate::db::AccountStore;
use crate::error::{Error, Result};
use crate::notify::{ClientEvent, Notifier};
use crate::protocol::{ClientFactory, Command, ProtocolClient, Update, UpdateStream};
use crate::types::{Account, LifecycleState, NewAccount};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Poll `condition` until it holds, panicking after a few seconds
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

// ─────────────────────────────────────────────────────────────────────────────
// Protocol client
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Reply {
    Value(Value),
    Fail(i32, String),
    Hang,
}

/// Scripted protocol client. Unscripted commands answer `{"@type": "ok"}`.
pub struct FakeClient {
    sent: Mutex<Vec<Command>>,
    replies: Mutex<HashMap<&'static str, VecDeque<Reply>>>,
    update_tx: mpsc::UnboundedSender<Update>,
    update_rx: Mutex<Option<UpdateStream>>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

impl FakeClient {
    pub fn new() -> Arc<Self> {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            replies: Mutex::new(HashMap::new()),
            update_tx,
            update_rx: Mutex::new(Some(update_rx)),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        })
    }

    /// Queue a response for a command kind. The last queued reply repeats.
    pub fn respond(&self, command: &'static str, value: Value) {
        self.script(command, Reply::Value(value));
    }

    pub fn fail(&self, command: &'static str, code: i32, message: &str) {
        self.script(command, Reply::Fail(code, message.to_string()));
    }

    /// Never answer a command kind
    pub fn hang(&self, command: &'static str) {
        self.script(command, Reply::Hang);
    }

    fn script(&self, command: &'static str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry(command)
            .or_default()
            .push_back(reply);
    }

    pub fn push_update(&self, update: Update) {
        let _ = self.update_tx.send(update);
    }

    pub fn sent(&self) -> Vec<Command> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_names(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().iter().map(Command::name).collect()
    }

    pub fn count_sent(&self, command: &str) -> usize {
        self.sent_names().iter().filter(|name| **name == command).count()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self, command: &str) -> Option<Reply> {
        let mut replies = self.replies.lock().unwrap();
        let queue = replies.get_mut(command)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl ProtocolClient for FakeClient {
    async fn send(&self, command: Command) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ClientClosed);
        }
        let name = command.name();
        self.sent.lock().unwrap().push(command);

        match self.next_reply(name) {
            Some(Reply::Value(value)) => Ok(value),
            Some(Reply::Fail(code, message)) => Err(Error::protocol(code, message)),
            Some(Reply::Hang) => std::future::pending().await,
            None => Ok(json!({"@type": "ok"})),
        }
    }

    fn subscribe_updates(&self) -> Result<UpdateStream> {
        self.update_rx
            .lock()
            .unwrap()
            .take()
            .ok_or(Error::AlreadySubscribed)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out fresh [`FakeClient`]s, each pre-scripted with the factory's replies
#[derive(Default)]
pub struct FakeFactory {
    clients: Mutex<Vec<Arc<FakeClient>>>,
    replies: Mutex<Vec<(&'static str, Value)>>,
    hangs: Mutex<Vec<&'static str>>,
    fail_create: AtomicBool,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, command: &'static str, value: Value) {
        self.replies.lock().unwrap().push((command, value));
    }

    pub fn hang(&self, command: &'static str) {
        self.hangs.lock().unwrap().push(command);
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn clients(&self) -> Vec<Arc<FakeClient>> {
        self.clients.lock().unwrap().clone()
    }

    pub fn created(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    pub fn last(&self) -> Arc<FakeClient> {
        self.clients
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no client created")
    }
}

impl ClientFactory for FakeFactory {
    fn create(&self) -> Result<Arc<dyn ProtocolClient>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::Other("client unavailable".to_string()));
        }
        let client = FakeClient::new();
        for (command, value) in self.replies.lock().unwrap().iter() {
            client.respond(command, value.clone());
        }
        for command in self.hangs.lock().unwrap().iter() {
            client.hang(command);
        }
        self.clients.lock().unwrap().push(client.clone());
        Ok(client)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Notifier
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Connection(String),
    Group(String),
}

/// Records every pushed event in order
#[derive(Default)]
pub struct RecordingNotifier {
    pushed: Mutex<Vec<(Target, ClientEvent)>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<(Target, ClientEvent)> {
        self.pushed.lock().unwrap().clone()
    }

    pub fn to_connection(&self, connection_id: &str) -> Vec<ClientEvent> {
        let target = Target::Connection(connection_id.to_string());
        self.events()
            .into_iter()
            .filter(|(t, _)| *t == target)
            .map(|(_, event)| event)
            .collect()
    }

    /// Event names pushed to a connection, in order
    pub fn names_for(&self, connection_id: &str) -> Vec<&'static str> {
        self.to_connection(connection_id)
            .iter()
            .map(ClientEvent::name)
            .collect()
    }

    /// States broadcast to a group for one account, in order
    pub fn group_states(&self, group: &str, account_id: Uuid) -> Vec<LifecycleState> {
        let target = Target::Group(group.to_string());
        self.events()
            .into_iter()
            .filter(|(t, _)| *t == target)
            .filter_map(|(_, event)| match event {
                ClientEvent::ReceiveClientState {
                    account_id: id,
                    state,
                } if id == account_id => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn errors_for(&self, connection_id: &str) -> Vec<String> {
        self.to_connection(connection_id)
            .into_iter()
            .filter_map(|event| match event {
                ClientEvent::ReceiveErrorMessage(message) => Some(message),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn push_to_connection(&self, connection_id: &str, event: ClientEvent) {
        self.pushed
            .lock()
            .unwrap()
            .push((Target::Connection(connection_id.to_string()), event));
    }

    async fn push_to_group(&self, group: &str, event: ClientEvent) {
        self.pushed
            .lock()
            .unwrap()
            .push((Target::Group(group.to_string()), event));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Account store
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStore {
    accounts: Mutex<Vec<Account>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store pre-seeded with accounts for the given phone numbers
    pub fn with_phones(phones: &[&str]) -> Arc<Self> {
        let store = Self::new();
        for phone in phones {
            store
                .add_account(&NewAccount {
                    phone_number: phone.to_string(),
                    first_name: format!("User {phone}"),
                    last_name: None,
                })
                .unwrap();
        }
        store
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.accounts.lock().unwrap().len()
    }
}

impl AccountStore for MemoryStore {
    fn list_accounts(&self) -> Result<Vec<Account>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Other("store unavailable".to_string()));
        }
        Ok(self.accounts.lock().unwrap().clone())
    }

    fn add_account(&self, new: &NewAccount) -> Result<Account> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Other("store unavailable".to_string()));
        }
        let mut accounts = self.accounts.lock().unwrap();
        if accounts.iter().any(|a| a.phone_number == new.phone_number) {
            return Err(Error::Other(format!("duplicate phone {}", new.phone_number)));
        }
        let account = Account {
            id: Uuid::new_v4(),
            phone_number: new.phone_number.clone(),
            first_name: new.first_name.clone(),
            last_name: new.last_name.clone(),
            created_at: chrono::Utc::now().timestamp_millis(),
            updated_at: None,
        };
        accounts.push(account.clone());
        Ok(account)
    }
}
