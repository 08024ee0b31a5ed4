//! Shared domain types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Accounts
// ─────────────────────────────────────────────────────────────────────────────

/// A paired external account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub phone_number: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub created_at: i64,
    pub updated_at: Option<i64>,
}

/// Input for creating a new account record
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub phone_number: String,
    pub first_name: String,
    pub last_name: Option<String>,
}

/// Account listing enriched with its live lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountView {
    pub id: Uuid,
    pub first_name: String,
    pub phone_number: String,
    pub state: LifecycleState,
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle of an account session.
///
/// `Starting` is initial; `Running` is entered once on first authorization;
/// `Stopped` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Starting,
    Running,
    Stopped,
    Error,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        match (self, next) {
            (Self::Stopped | Self::Error, _) => false,
            (Self::Starting, _) => true,
            (Self::Running, Self::Running | Self::Starting) => false,
            (Self::Running, _) => true,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscriber payloads
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: i64,
    pub title: String,
}

/// A message flattened for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: i64,
    pub content: String,
    pub date: i64,
    pub is_outgoing: bool,
}
