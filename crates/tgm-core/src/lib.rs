//! tgm-core - Core library for the tgm account manager
//!
//! This crate owns everything between the wrapped chat-protocol client and the
//! transport that serves subscribers:
//!
//! - **protocol**: Client seam, commands, updates and the bridge process client
//! - **session**: Account and onboarding sessions over one client each
//! - **registry**: Live sessions keyed by account and by connection
//! - **state**: Lifecycle state per account, broadcast on change
//! - **notify**: Events pushed to subscriber connections
//! - **db**: SQLite account store

pub mod db;
pub mod error;
pub mod notify;
pub mod options;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod state;
pub mod types;
pub mod workdir;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use db::{AccountStore, Database};
pub use error::{Error, Result};
pub use notify::{ClientEvent, Notifier, MONITORING_GROUP};
pub use options::TdOptions;
pub use registry::SessionRegistry;
pub use state::StateStore;
