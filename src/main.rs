//! Sticky-session activator.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http server ──▶ context middleware ──▶ proxy handler ──▶ Backend
//!                                        │                      │
//!                                        │ identify revision    │ revision target set
//!                                        │ metadata lookup      │ LB policy + trackers
//!                                        │ sticky revision      │ backend affinity
//!                                        ▼                      ▼
//!                                   ┌──────────────────────────────┐
//!                                   │        affinity store        │
//!                                   │   (in-process or Redis)      │
//!                                   └──────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use sticky_activator::config::loader::load_config;
use sticky_activator::config::watcher::ConfigWatcher;
use sticky_activator::config::ActivatorConfig;
use sticky_activator::lifecycle::signals::spawn_signal_handler;
use sticky_activator::observability::{logging, metrics};
use sticky_activator::store::open_store;
use sticky_activator::{HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "sticky-activator")]
#[command(about = "Sticky-session request activator", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply without one.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload revisions and services when the configuration file changes.
    #[arg(short, long, requires = "config")]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ActivatorConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "sticky-activator starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        store = ?config.store.backend,
        policy = ?config.load_balancing.policy,
        revisions = config.revisions.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let store = open_store(&config.store).await?;

    let (_watcher, config_updates) = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        _ => {
            let (_, updates) = mpsc::unbounded_channel();
            (None, updates)
        }
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    spawn_signal_handler(&shutdown);

    let server = HttpServer::new(config, store.clone());
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    if let Err(e) = store.close().await {
        tracing::warn!(error = %e, "Failed to close affinity store");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
