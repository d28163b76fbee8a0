// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `plinth serve`: host startup, gateway, and graceful shutdown.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use plinth_config::PlinthConfig;
use plinth_config::model::StorageBackend;
use plinth_core::{PlinthError, PluginStore};
use plinth_gateway::GatewayState;
use plinth_plugin::PluginHost;
use plinth_storage::{MemoryStore, SqliteStore};

/// Installs the global tracing subscriber. `RUST_LOG` overrides the level.
pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "plinth={log_level},plinth_plugin={log_level},plinth_gateway={log_level},warn"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}

/// Opens the configured persistence backend.
pub async fn open_store(config: &PlinthConfig) -> Result<Arc<dyn PluginStore>, PlinthError> {
    match config.storage.backend {
        StorageBackend::Sqlite => {
            let store = SqliteStore::open(Path::new(&config.storage.database_path)).await?;
            info!(path = %config.storage.database_path, "sqlite store opened");
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            warn!("using in-memory store; plugin records will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Builds the host without starting it.
pub async fn build_host(config: PlinthConfig) -> Result<Arc<PluginHost>, PlinthError> {
    let store = open_store(&config).await?;
    Ok(Arc::new(PluginHost::builder(config, store).build()?))
}

/// Cancels the returned token on Ctrl+C or SIGTERM.
fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => info!("received SIGINT (Ctrl+C), initiating shutdown"),
                        _ = sigterm.recv() => info!("received SIGTERM, initiating shutdown"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    info!("received SIGINT (Ctrl+C), initiating shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C, initiating shutdown");
        }

        token_clone.cancel();
        debug!("shutdown signal handler completed");
    });

    token
}

/// Runs the host and gateway until a shutdown signal arrives.
pub async fn run_serve(config: PlinthConfig) -> Result<(), PlinthError> {
    let host = build_host(config).await?;
    let report = host.start().await?;
    info!(
        activated = report.activated.len(),
        failed = report.failed.len(),
        "plugin host started"
    );
    for (plugin_id, error) in &report.failed {
        warn!(plugin_id = %plugin_id, error = %error, "plugin failed to activate at startup");
    }

    let cancel = install_signal_handler();
    let server = plinth_gateway::start_server(GatewayState::new(Arc::clone(&host)), cancel.clone()).await;

    cancel.cancel();
    host.shutdown().await;
    server
}
