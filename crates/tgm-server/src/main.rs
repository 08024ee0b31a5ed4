//! tgm-server - account hub backend
//!
//! Serves the subscriber WebSocket hub and REST endpoints over HTTP, backed by
//! one protocol client session per paired account.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tgm_core::protocol::BridgeClientFactory;
use tgm_core::Database;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod hub;
mod routes;
mod state;

use state::AppState;

#[derive(Debug, Parser)]
#[command(name = "tgm-server", version, about = "Account hub backend")]
struct Args {
    /// Configuration file (defaults to $TGM_DIR/config.toml)
    #[arg(long, env = "TGM_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration file
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("tgm_server=info".parse()?)
                .add_directive("tgm_core=info".parse()?),
        )
        .init();

    let args = Args::parse();
    info!("tgm-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = config::Config::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    info!("Config loaded from {:?}", config.config_path);

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::create_dir_all(&config.td.directory)?;
    let db = Database::open_path(&config.database_path)?;

    let factory = Arc::new(BridgeClientFactory::new(
        config.bridge_command.clone(),
        config.bridge_args.clone(),
    ));
    let bind = config.bind.clone();
    let state = AppState::new(config, db, factory);
    let app = routes::create_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");
    state.registry.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
