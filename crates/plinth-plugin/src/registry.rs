// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory plugin registry and live route table.
//!
//! The registry owns every [`LoadedPlugin`] and decides which of them are
//! live. Activation binds a plugin's routes into the shared route table and
//! its hooks onto the bus; deactivation removes both. Route keys are unique
//! across active plugins: the first plugin to bind a key keeps it.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, error, info, warn};

use plinth_core::{
    EntryContext, HttpMethod, PlinthError, PluginScope, PluginStore, RouteKey,
};
use plinth_hooks::HookBus;

use crate::loader::{LoadOptions, LoadedPlugin, LoadedRoute, ModuleLoader};

/// Capacity of the lifecycle event channel.
const EVENT_CAPACITY: usize = 256;

/// Lifecycle notifications emitted by the registry and lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum RegistryEvent {
    #[serde(rename_all = "camelCase")]
    Installed { plugin_id: String, version: String },
    #[serde(rename_all = "camelCase")]
    Activated { plugin_id: String },
    #[serde(rename_all = "camelCase")]
    Deactivated { plugin_id: String },
    #[serde(rename_all = "camelCase")]
    Configured { plugin_id: String },
    #[serde(rename_all = "camelCase")]
    Uninstalled { plugin_id: String },
    #[serde(rename_all = "camelCase")]
    LoadError { plugin_id: String, error: String },
    RegistrySynced {
        activated: usize,
        deactivated: usize,
        failed: usize,
    },
}

/// A live route resolved to its owning plugin.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub plugin: Arc<LoadedPlugin>,
    pub route: Arc<LoadedRoute>,
}

impl RouteMatch {
    pub fn plugin_id(&self) -> &str {
        self.plugin.id()
    }
}

/// Outcome of [`PluginRegistry::initialize`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InitReport {
    pub activated: Vec<String>,
    pub failed: Vec<(String, String)>,
}

struct Slot {
    plugin: Arc<LoadedPlugin>,
    active: bool,
}

struct Binding {
    plugin_id: String,
    plugin: Arc<LoadedPlugin>,
    route: Arc<LoadedRoute>,
}

/// Registry of loaded plugins and their live routes.
pub struct PluginRegistry {
    loader: Arc<ModuleLoader>,
    store: Arc<dyn PluginStore>,
    hooks: Arc<HookBus>,
    slots: RwLock<HashMap<String, Slot>>,
    routes: RwLock<HashMap<RouteKey, Binding>>,
    errors: RwLock<HashMap<String, String>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl PluginRegistry {
    pub fn new(loader: Arc<ModuleLoader>, store: Arc<dyn PluginStore>, hooks: Arc<HookBus>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            loader,
            store,
            hooks,
            slots: RwLock::new(HashMap::new()),
            routes: RwLock::new(HashMap::new()),
            errors: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn loader(&self) -> &Arc<ModuleLoader> {
        &self.loader
    }

    pub fn hooks(&self) -> &Arc<HookBus> {
        &self.hooks
    }

    pub fn store(&self) -> &Arc<dyn PluginStore> {
        &self.store
    }

    /// Subscribes to lifecycle events. Slow receivers miss old events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: RegistryEvent) {
        debug!(?event, "registry event");
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Activates every persisted record marked active.
    ///
    /// Failures are recorded against the failing plugin and never abort the
    /// remaining activations.
    pub async fn initialize(&self) -> Result<InitReport, PlinthError> {
        let records = self.store.list_records(Some(true)).await?;
        let mut report = InitReport::default();
        for record in records {
            let id = record.plugin_id.clone();
            match self.activate(&id).await {
                Ok(_) => report.activated.push(id),
                Err(e) => {
                    let message = e.to_string();
                    self.record_failure(&id, &message).await;
                    report.failed.push((id, message));
                }
            }
        }
        info!(
            activated = report.activated.len(),
            failed = report.failed.len(),
            "plugin registry initialized"
        );
        Ok(report)
    }

    /// Appends an error to the persisted record without changing its flags.
    pub(crate) async fn record_failure(&self, id: &str, message: &str) {
        match self.store.get_record(id).await {
            Ok(Some(mut record)) => {
                record.record_error(message);
                if let Err(e) = self.store.upsert_record(&record).await {
                    warn!(plugin_id = id, error = %e, "failed to persist plugin error");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(plugin_id = id, error = %e, "failed to read plugin record"),
        }
    }

    /// Loads (if needed) and activates a plugin in memory.
    ///
    /// Already-active plugins are returned unchanged. On failure the plugin
    /// stays inactive, its error is kept, and a `LoadError` event is emitted.
    pub async fn activate(&self, id: &str) -> Result<Arc<LoadedPlugin>, PlinthError> {
        if let Some(slot) = self.slots.read().await.get(id)
            && slot.active
        {
            return Ok(Arc::clone(&slot.plugin));
        }

        match self.try_activate(id).await {
            Ok(plugin) => {
                self.errors.write().await.remove(id);
                self.emit(RegistryEvent::Activated {
                    plugin_id: id.to_string(),
                });
                Ok(plugin)
            }
            Err(e) => {
                warn!(plugin_id = id, error = %e, "plugin activation failed");
                self.errors.write().await.insert(id.to_string(), e.to_string());
                self.emit(RegistryEvent::LoadError {
                    plugin_id: id.to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn try_activate(&self, id: &str) -> Result<Arc<LoadedPlugin>, PlinthError> {
        let existing = self.slots.read().await.get(id).map(|s| Arc::clone(&s.plugin));
        let plugin = match existing {
            Some(plugin) => plugin,
            None => self.loader.load(id, LoadOptions::default()).await?,
        };

        let ctx = self.entry_context(&plugin).await?;
        guard_entry(id, plugin.ensure_init(&ctx)).await?;

        // Claim every route before anything goes live.
        {
            let mut routes = self.routes.write().await;
            if let Some((key, owner)) = plugin.routes.keys().find_map(|key| {
                routes
                    .get(key)
                    .filter(|b| b.plugin_id != id)
                    .map(|b| (key.clone(), b.plugin_id.clone()))
            }) {
                return Err(PlinthError::Conflict(format!(
                    "route {key} of plugin '{id}' is already served by '{owner}'"
                )));
            }
            for (key, route) in &plugin.routes {
                routes.insert(
                    key.clone(),
                    Binding {
                        plugin_id: id.to_string(),
                        plugin: Arc::clone(&plugin),
                        route: Arc::clone(route),
                    },
                );
            }
        }

        if let Err(e) = guard_entry(id, plugin.entry.activate(&ctx)).await {
            self.unbind_routes(id).await;
            return Err(e);
        }

        for hook in &plugin.hooks {
            if let Err(e) = self
                .hooks
                .register(hook.name.clone(), hook.priority, Some(id), hook.callback.clone())
                .await
            {
                warn!(plugin_id = id, hook = %hook.name, error = %e, "hook not registered");
            }
        }

        self.slots.write().await.insert(
            id.to_string(),
            Slot {
                plugin: Arc::clone(&plugin),
                active: true,
            },
        );
        info!(
            plugin_id = id,
            version = %plugin.manifest.version,
            routes = plugin.routes.len(),
            hooks = plugin.hooks.len(),
            "plugin activated"
        );
        Ok(plugin)
    }

    /// Removes a plugin's routes and hooks. Returns false if it was not active.
    ///
    /// The entry module's `deactivate` runs after the plugin is unbound; its
    /// failure is logged and does not keep the plugin live.
    pub async fn deactivate(&self, id: &str) -> bool {
        let plugin = {
            let mut slots = self.slots.write().await;
            match slots.get_mut(id) {
                Some(slot) if slot.active => {
                    slot.active = false;
                    Arc::clone(&slot.plugin)
                }
                _ => return false,
            }
        };

        self.unbind_routes(id).await;
        self.hooks.remove_owner(id).await;

        match self.entry_context(&plugin).await {
            Ok(ctx) => {
                if let Err(e) = guard_entry(id, plugin.entry.deactivate(&ctx)).await {
                    warn!(plugin_id = id, error = %e, "entry deactivate failed");
                }
            }
            Err(e) => warn!(plugin_id = id, error = %e, "cannot build entry context"),
        }

        self.emit(RegistryEvent::Deactivated {
            plugin_id: id.to_string(),
        });
        info!(plugin_id = id, "plugin deactivated");
        true
    }

    /// Deactivates and forgets a plugin, evicting it from the loader cache.
    pub async fn unregister(&self, id: &str) -> bool {
        self.deactivate(id).await;
        let removed = self.slots.write().await.remove(id).is_some();
        self.errors.write().await.remove(id);
        let evicted = self.loader.unload(id);
        removed || evicted
    }

    /// Deactivates every live plugin in memory. Persisted records are untouched.
    pub async fn shutdown(&self) {
        for id in self.get_active_plugins().await {
            self.deactivate(&id).await;
        }
    }

    async fn unbind_routes(&self, id: &str) {
        let mut routes = self.routes.write().await;
        let before = routes.len();
        routes.retain(|_, b| b.plugin_id != id);
        debug!(plugin_id = id, removed = before - routes.len(), "routes unbound");
    }

    async fn entry_context(&self, plugin: &LoadedPlugin) -> Result<EntryContext, PlinthError> {
        let id = plugin.id();
        let config = self
            .store
            .get_config(id)
            .await?
            .or_else(|| plugin.manifest.default_config.clone())
            .unwrap_or(Value::Null);
        Ok(EntryContext {
            plugin_id: id.to_string(),
            config,
            data: PluginScope::new(id, Arc::clone(&self.store)),
        })
    }

    /// Exact lookup of a live route.
    pub async fn get_plugin_by_route(&self, method: HttpMethod, path: &str) -> Option<RouteMatch> {
        let key = RouteKey::new(method, path);
        self.routes.read().await.get(&key).map(|b| RouteMatch {
            plugin: Arc::clone(&b.plugin),
            route: Arc::clone(&b.route),
        })
    }

    /// Finds an installed but inactive plugin whose manifest declares the route.
    pub async fn find_inactive_owner(
        &self,
        method: HttpMethod,
        path: &str,
    ) -> Result<Option<String>, PlinthError> {
        let key = RouteKey::new(method, path);
        let records = self.store.list_records(None).await?;
        let mut owner = None;
        for record in records {
            if record.manifest.declares_route(&key) && !self.is_plugin_active(&record.plugin_id).await {
                owner = Some(record.plugin_id);
                break;
            }
        }
        Ok(owner)
    }

    /// Ids of live plugins, sorted.
    pub async fn get_active_plugins(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .slots
            .read()
            .await
            .iter()
            .filter(|(_, s)| s.active)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// The registered instance for `id`, live or not.
    pub async fn get_plugin(&self, id: &str) -> Option<Arc<LoadedPlugin>> {
        self.slots.read().await.get(id).map(|s| Arc::clone(&s.plugin))
    }

    pub async fn is_plugin_active(&self, id: &str) -> bool {
        self.slots.read().await.get(id).is_some_and(|s| s.active)
    }

    /// Last activation error kept for `id`, cleared by a successful activation.
    pub async fn last_error(&self, id: &str) -> Option<String> {
        self.errors.read().await.get(id).cloned()
    }

    /// Number of live route keys.
    pub async fn route_count(&self) -> usize {
        self.routes.read().await.len()
    }
}

/// Runs an entry callback, turning a panic into an error.
async fn guard_entry<F>(id: &str, fut: F) -> Result<(), PlinthError>
where
    F: std::future::Future<Output = Result<(), PlinthError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(_) => {
            error!(plugin_id = id, "entry module panicked");
            Err(PlinthError::Lifecycle {
                plugin_id: id.to_string(),
                message: "entry module panicked".to_string(),
            })
        }
    }
}
