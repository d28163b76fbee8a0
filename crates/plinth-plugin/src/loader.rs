// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Module loader: turns an installed plugin directory into a [`LoadedPlugin`].
//!
//! Concurrent loads of the same id share one in-flight future, so the
//! manifest is read and every module imported exactly once. A failing route,
//! hook, page, or widget is logged and left out; a failing manifest or entry
//! module fails the whole load.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use plinth_core::manifest::{HookKind, RouteDecl};
use plinth_core::{
    EntryContext, Middleware, PlinthError, PluginEntry, PluginManifest, RouteHandler, RouteKey,
};
use plinth_hooks::{DEFAULT_PRIORITY, HookCallback, HookName};

use crate::package;
use crate::runtime::{ModuleRuntime, ModuleSpec};

/// A route whose handler and middleware imported successfully.
pub struct LoadedRoute {
    pub key: RouteKey,
    pub decl: RouteDecl,
    pub handler: Arc<dyn RouteHandler>,
    pub middleware: Vec<Arc<dyn Middleware>>,
}

impl std::fmt::Debug for LoadedRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedRoute")
            .field("key", &self.key)
            .field("handler", &self.decl.handler)
            .field("middleware", &self.decl.middleware)
            .finish()
    }
}

/// A hook subscription ready to register on the bus.
#[derive(Debug, Clone)]
pub struct LoadedHook {
    pub name: HookName,
    pub priority: i32,
    pub callback: HookCallback,
}

/// In-memory form of an installed plugin.
pub struct LoadedPlugin {
    pub manifest: PluginManifest,
    pub root: PathBuf,
    pub entry: Arc<dyn PluginEntry>,
    pub routes: HashMap<RouteKey, Arc<LoadedRoute>>,
    pub hooks: Vec<LoadedHook>,
    /// Admin page path to component file.
    pub admin_pages: BTreeMap<String, PathBuf>,
    /// Widget id to component file.
    pub widgets: BTreeMap<String, PathBuf>,
    pub loaded_at: DateTime<Utc>,
    /// Components that failed to load and were left out.
    pub component_errors: Vec<String>,
    initialized: OnceCell<()>,
}

impl LoadedPlugin {
    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    /// Runs the entry module's `init` once per loaded instance.
    pub async fn ensure_init(&self, ctx: &EntryContext) -> Result<(), PlinthError> {
        self.initialized
            .get_or_try_init(|| self.entry.init(ctx))
            .await
            .map(|_| ())
    }

    /// Route keys in a stable order, for display.
    pub fn route_keys(&self) -> Vec<RouteKey> {
        let mut keys: Vec<RouteKey> = self.routes.keys().cloned().collect();
        keys.sort_by(|a, b| a.path.cmp(&b.path).then(a.method.cmp(&b.method)));
        keys
    }
}

impl std::fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("id", &self.manifest.id)
            .field("version", &self.manifest.version)
            .field("root", &self.root)
            .field("routes", &self.route_keys())
            .field("hooks", &self.hooks.len())
            .field("loaded_at", &self.loaded_at)
            .field("component_errors", &self.component_errors)
            .finish()
    }
}

/// Options for [`ModuleLoader::load`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Ignore any cached instance and load again. The result replaces the cache.
    pub force: bool,
    /// Neither read nor populate the cache.
    pub skip_cache: bool,
}

type LoadFuture = Shared<BoxFuture<'static, Result<Arc<LoadedPlugin>, String>>>;

/// Loads plugins from `plugins_dir/<id>` through the registered runtimes.
pub struct ModuleLoader {
    plugins_dir: PathBuf,
    runtimes: Vec<Arc<dyn ModuleRuntime>>,
    cache: DashMap<String, Arc<LoadedPlugin>>,
    in_flight: Mutex<HashMap<String, LoadFuture>>,
    loads: Arc<AtomicUsize>,
}

impl ModuleLoader {
    pub fn new(plugins_dir: impl Into<PathBuf>, runtimes: Vec<Arc<dyn ModuleRuntime>>) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            runtimes,
            cache: DashMap::new(),
            in_flight: Mutex::new(HashMap::new()),
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    /// Install directory of a plugin.
    pub fn plugin_root(&self, id: &str) -> PathBuf {
        self.plugins_dir.join(id)
    }

    /// Loads a plugin, sharing any load already running for the same id.
    ///
    /// `force` and `skip_cache` loads always import afresh and never join or
    /// publish a shared load.
    pub async fn load(&self, id: &str, options: LoadOptions) -> Result<Arc<LoadedPlugin>, PlinthError> {
        if options.force || options.skip_cache {
            let plugin = self
                .fresh(id.to_string(), self.plugin_root(id))
                .await
                .map_err(|message| PlinthError::load(id, message))?;
            if !options.skip_cache {
                self.cache.insert(id.to_string(), Arc::clone(&plugin));
            }
            return Ok(plugin);
        }

        if let Some(hit) = self.cache.get(id) {
            return Ok(Arc::clone(hit.value()));
        }

        let future = {
            let mut in_flight = self.in_flight.lock().await;
            // A shared load may have finished between the cache miss and the lock.
            if let Some(hit) = self.cache.get(id) {
                return Ok(Arc::clone(hit.value()));
            }
            match in_flight.get(id) {
                Some(existing) => {
                    debug!(plugin_id = id, "joining in-flight load");
                    existing.clone()
                }
                None => {
                    let future = self
                        .fresh(id.to_string(), self.plugin_root(id))
                        .boxed()
                        .shared();
                    in_flight.insert(id.to_string(), future.clone());
                    future
                }
            }
        };

        let result = future.clone().await;
        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight.get(id).is_some_and(|f| f.ptr_eq(&future)) {
                // Publish before retiring the shared load so no caller can
                // miss both.
                if let Ok(plugin) = &result {
                    self.cache.insert(id.to_string(), Arc::clone(plugin));
                }
                in_flight.remove(id);
            }
        }

        result.map_err(|message| PlinthError::load(id, message))
    }

    fn fresh(
        &self,
        id: String,
        root: PathBuf,
    ) -> impl Future<Output = Result<Arc<LoadedPlugin>, String>> + Send + 'static {
        Self::load_at(id, root, self.runtimes.clone(), Arc::clone(&self.loads))
    }

    /// Loads a plugin from an arbitrary directory without touching the cache.
    ///
    /// Used to prove a staged package resolves before it is moved into place.
    pub async fn load_staged(&self, id: &str, root: &Path) -> Result<Arc<LoadedPlugin>, PlinthError> {
        Self::load_at(
            id.to_string(),
            root.to_path_buf(),
            self.runtimes.clone(),
            Arc::clone(&self.loads),
        )
        .await
        .map_err(|message| PlinthError::load(id, message))
    }

    /// Evicts a cached instance. Returns true if one was cached.
    pub fn unload(&self, id: &str) -> bool {
        let removed = self.cache.remove(id).is_some();
        if removed {
            debug!(plugin_id = id, "plugin evicted from loader cache");
        }
        removed
    }

    pub fn cached(&self, id: &str) -> Option<Arc<LoadedPlugin>> {
        self.cache.get(id).map(|p| Arc::clone(p.value()))
    }

    /// Number of loads that actually ran, joined loads and cache hits excluded.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    async fn load_at(
        id: String,
        root: PathBuf,
        runtimes: Vec<Arc<dyn ModuleRuntime>>,
        loads: Arc<AtomicUsize>,
    ) -> Result<Arc<LoadedPlugin>, String> {
        loads.fetch_add(1, Ordering::SeqCst);
        let started = std::time::Instant::now();

        let manifest = package::read_manifest(&root)
            .await
            .map_err(|e| format!("cannot read manifest: {e}"))?;
        if manifest.id != id {
            return Err(format!(
                "manifest id '{}' does not match install id '{id}'",
                manifest.id
            ));
        }

        let importer = Importer {
            id: &id,
            root: &root,
            runtimes: &runtimes,
        };
        let entry = importer
            .entry(&manifest.main)
            .await
            .map_err(|e| format!("entry module '{}' failed to load: {e}", manifest.main))?;

        let mut component_errors = Vec::new();
        let mut fail = |what: String, err: &dyn std::fmt::Display| {
            warn!(plugin_id = %id, component = %what, error = %err, "plugin component failed to load");
            component_errors.push(format!("{what}: {err}"));
        };

        let mut routes = HashMap::new();
        for decl in &manifest.routes {
            let key = decl.key();
            match importer.route(decl).await {
                Ok((handler, middleware)) => {
                    routes.insert(
                        key.clone(),
                        Arc::new(LoadedRoute {
                            key,
                            decl: decl.clone(),
                            handler,
                            middleware,
                        }),
                    );
                }
                Err(e) => fail(format!("route {key}"), &e),
            }
        }

        let mut hooks = Vec::new();
        for decl in &manifest.hooks {
            let name = HookName::from(decl.name.clone());
            let kind = decl
                .kind
                .or_else(|| name.builtin_kind())
                .unwrap_or(HookKind::Action);
            match importer.hook(&decl.handler, kind).await {
                Ok(callback) => hooks.push(LoadedHook {
                    name,
                    priority: decl.priority.unwrap_or(DEFAULT_PRIORITY),
                    callback,
                }),
                Err(e) => fail(format!("hook {}", decl.name), &e),
            }
        }

        let mut admin_pages = BTreeMap::new();
        for page in &manifest.admin_pages {
            match importer.component(&page.component) {
                Ok(file) => {
                    admin_pages.insert(page.path.clone(), file);
                }
                Err(e) => fail(format!("admin page {}", page.path), &e),
            }
        }

        let mut widgets = BTreeMap::new();
        for widget in &manifest.dashboard_widgets {
            match importer.component(&widget.component) {
                Ok(file) => {
                    widgets.insert(widget.id.clone(), file);
                }
                Err(e) => fail(format!("widget {}", widget.id), &e),
            }
        }

        info!(
            plugin_id = %id,
            version = %manifest.version,
            routes = routes.len(),
            hooks = hooks.len(),
            failed_components = component_errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "plugin loaded"
        );

        Ok(Arc::new(LoadedPlugin {
            manifest,
            root,
            entry,
            routes,
            hooks,
            admin_pages,
            widgets,
            loaded_at: Utc::now(),
            component_errors,
            initialized: OnceCell::new(),
        }))
    }
}

/// Resolves module references of one plugin against the runtimes.
struct Importer<'a> {
    id: &'a str,
    root: &'a Path,
    runtimes: &'a [Arc<dyn ModuleRuntime>],
}

impl Importer<'_> {
    fn resolve(&self, reference: &str) -> Result<(ModuleSpec, &Arc<dyn ModuleRuntime>), PlinthError> {
        let spec = ModuleSpec::new(self.id, self.root, reference);
        if spec.file().is_none() {
            return Err(PlinthError::load(
                self.id,
                format!("module '{reference}' is outside the plugin root"),
            ));
        }
        let runtime = self
            .runtimes
            .iter()
            .find(|r| r.accepts(&spec))
            .ok_or_else(|| {
                PlinthError::load(self.id, format!("no runtime can import '{reference}'"))
            })?;
        debug!(module = %spec, runtime = runtime.name(), "importing module");
        Ok((spec, runtime))
    }

    async fn entry(&self, reference: &str) -> Result<Arc<dyn PluginEntry>, PlinthError> {
        let (spec, runtime) = self.resolve(reference)?;
        runtime.import_entry(&spec).await
    }

    async fn route(
        &self,
        decl: &RouteDecl,
    ) -> Result<(Arc<dyn RouteHandler>, Vec<Arc<dyn Middleware>>), PlinthError> {
        let (spec, runtime) = self.resolve(&decl.handler)?;
        let handler = runtime.import_route(&spec).await?;
        let mut middleware = Vec::with_capacity(decl.middleware.len());
        for reference in &decl.middleware {
            let (spec, runtime) = self.resolve(reference)?;
            middleware.push(runtime.import_middleware(&spec).await?);
        }
        Ok((handler, middleware))
    }

    async fn hook(&self, reference: &str, kind: HookKind) -> Result<HookCallback, PlinthError> {
        let (spec, runtime) = self.resolve(reference)?;
        runtime.import_hook(&spec, kind).await
    }

    /// UI components are static files served to the admin UI.
    fn component(&self, reference: &str) -> Result<PathBuf, PlinthError> {
        let file = package::resolve_within(self.root, reference).ok_or_else(|| {
            PlinthError::load(self.id, format!("component '{reference}' is outside the plugin root"))
        })?;
        if !file.is_file() {
            return Err(PlinthError::load(
                self.id,
                format!("component '{reference}' does not exist"),
            ));
        }
        Ok(file)
    }
}
