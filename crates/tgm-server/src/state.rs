//! Application state.

use std::sync::Arc;
use std::time::Instant;
use tgm_core::protocol::ClientFactory;
use tgm_core::{Database, SessionRegistry};

use crate::config::Config;
use crate::hub::Hub;

/// Shared application state
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// Account database
    pub db: Arc<Database>,
    /// Subscriber connections; also the registry's notifier
    pub hub: Arc<Hub>,
    /// Live client sessions
    pub registry: Arc<SessionRegistry>,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config, db: Database, factory: Arc<dyn ClientFactory>) -> Arc<Self> {
        let db = Arc::new(db);
        let hub = Arc::new(Hub::new());
        let registry = Arc::new(SessionRegistry::new(
            db.clone(),
            factory,
            hub.clone(),
            config.td.clone(),
        ));

        Arc::new(Self {
            config: Arc::new(config),
            db,
            hub,
            registry,
            start_time: Instant::now(),
        })
    }
}
