// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The host context: one explicitly constructed owner of the hook bus,
//! loader, registry, lifecycle manager, and auto-sync task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use plinth_config::PlinthConfig;
use plinth_core::{PlinthError, PluginStore};
use plinth_hooks::HookBus;

use crate::lifecycle::{LifecycleManager, PluginDirs};
use crate::loader::ModuleLoader;
use crate::locks::IdLocks;
use crate::package::PackageLimits;
use crate::registry::{InitReport, PluginRegistry};
use crate::runtime::{ModuleRuntime, WasmLimits, WasmRuntime};
use crate::sync::AutoSync;

/// Builder for [`PluginHost`].
pub struct PluginHostBuilder {
    config: PlinthConfig,
    store: Arc<dyn PluginStore>,
    runtimes: Vec<Arc<dyn ModuleRuntime>>,
    hooks: Option<Arc<HookBus>>,
    wasm: bool,
}

impl PluginHostBuilder {
    /// Adds a module runtime. Runtimes added here are consulted before WASM.
    pub fn runtime(mut self, runtime: Arc<dyn ModuleRuntime>) -> Self {
        self.runtimes.push(runtime);
        self
    }

    /// Shares an existing hook bus with the host.
    pub fn hooks(mut self, hooks: Arc<HookBus>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Leaves the WASM runtime out.
    pub fn without_wasm(mut self) -> Self {
        self.wasm = false;
        self
    }

    pub fn build(self) -> Result<PluginHost, PlinthError> {
        let mut runtimes = self.runtimes;
        if self.wasm {
            let wasm = WasmRuntime::new(WasmLimits::from(&self.config.runtime))?;
            runtimes.push(Arc::new(wasm));
        }

        let hooks = self.hooks.unwrap_or_else(|| {
            Arc::new(HookBus::with_timeout(Duration::from_millis(
                self.config.runtime.hook_timeout_ms,
            )))
        });
        let loader = Arc::new(ModuleLoader::new(
            &self.config.plugins.plugins_dir,
            runtimes,
        ));
        let registry = Arc::new(PluginRegistry::new(
            loader,
            Arc::clone(&self.store),
            Arc::clone(&hooks),
        ));
        let locks = Arc::new(IdLocks::new());
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&registry),
            Arc::clone(&locks),
            PluginDirs::from(&self.config.plugins),
            PackageLimits::from(&self.config.plugins),
        ));
        let sync = Arc::new(AutoSync::new(Arc::clone(&registry), locks));

        Ok(PluginHost {
            config: Arc::new(self.config),
            store: self.store,
            hooks,
            registry,
            lifecycle,
            sync,
            cancel: CancellationToken::new(),
            sync_task: Mutex::new(None),
        })
    }
}

/// Owns every runtime component for the life of the process.
pub struct PluginHost {
    config: Arc<PlinthConfig>,
    store: Arc<dyn PluginStore>,
    hooks: Arc<HookBus>,
    registry: Arc<PluginRegistry>,
    lifecycle: Arc<LifecycleManager>,
    sync: Arc<AutoSync>,
    cancel: CancellationToken,
    sync_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PluginHost {
    pub fn builder(config: PlinthConfig, store: Arc<dyn PluginStore>) -> PluginHostBuilder {
        PluginHostBuilder {
            config,
            store,
            runtimes: Vec::new(),
            hooks: None,
            wasm: true,
        }
    }

    /// Activates persisted active plugins and starts auto-sync if enabled.
    ///
    /// Per-plugin failures are reported, never returned as an error.
    pub async fn start(&self) -> Result<InitReport, PlinthError> {
        tokio::fs::create_dir_all(&self.config.plugins.plugins_dir).await?;
        let report = self.registry.initialize().await?;

        if self.config.sync.enabled {
            let interval = Duration::from_secs(self.config.sync.interval_secs.max(1));
            let handle = Arc::clone(&self.sync).spawn(interval, self.cancel.child_token());
            *self.sync_task.lock().await = Some(handle);
        }
        Ok(report)
    }

    /// Stops auto-sync and deactivates live plugins. Records are untouched.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.sync_task.lock().await.take() {
            // A cancelled sync loop exits on its own; a join error means it panicked.
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "auto-sync task ended abnormally");
            }
        }
        self.registry.shutdown().await;
        info!("plugin host stopped");
    }

    pub fn config(&self) -> &Arc<PlinthConfig> {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn PluginStore> {
        &self.store
    }

    pub fn hooks(&self) -> &Arc<HookBus> {
        &self.hooks
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn auto_sync(&self) -> &Arc<AutoSync> {
        &self.sync
    }

    /// Cancelled when the host shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
