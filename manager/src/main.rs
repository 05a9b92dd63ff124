//! Port proxy manager: entry point
//!
//! Opens the rule store, picks the mirror backend and serves the console until
//! SIGINT/SIGTERM.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use portproxy_manager::config::{self, ConsoleConfig, LoggingConfig};
use portproxy_manager::store::RuleStore;
use portproxy_manager::sync::RuleSynchronizer;
use portproxy_manager::{build_mirror, console};

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .with_context(|| format!("Invalid log level '{}'", logging.level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, shutting down..."),
            Err(e) => {
                error!("Failed to listen for SIGINT: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, shutting down...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config::config_path();
    let config = ConsoleConfig::from_file(&config_path)?;
    init_tracing(&config.logging)?;

    info!("Port proxy manager v{} starting...", env!("CARGO_PKG_VERSION"));
    if config_path.exists() {
        info!("Loaded config from {}", config_path.display());
    } else {
        warn!("Config file not found at {}, using defaults", config_path.display());
    }

    let store = Arc::new(
        RuleStore::open(&config.store.path)
            .with_context(|| format!("Failed to open rule store {}", config.store.path.display()))?,
    );
    info!(
        "Rule store ready at {} ({} rules)",
        config.store.path.display(),
        store.count()?
    );

    let mirror = build_mirror(&config.mirror);
    if mirror.backend() == "dry-run" {
        warn!("Dry-run mirror selected: rules are stored but not applied to the OS");
    }
    info!("Mirror backend: {}", mirror.backend());

    let sync = Arc::new(RuleSynchronizer::new(store.clone(), mirror));

    let listener = TcpListener::bind(config.server.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen))?;

    console::serve(listener, sync, shutdown_signal())
        .await
        .context("Console server failed")?;

    match Arc::try_unwrap(store) {
        Ok(store) => store.close().context("Failed to close rule store")?,
        Err(_) => warn!("Rule store still referenced at shutdown, leaving it to drop"),
    }

    info!("Port proxy manager shut down cleanly");
    Ok(())
}
