// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Compiled-in plugin modules.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use plinth_core::manifest::HookKind;
use plinth_core::{Middleware, PlinthError, PluginEntry, RouteHandler};
use plinth_hooks::{ActionHook, FilterHook, HookCallback};

use super::{ModuleRuntime, ModuleSpec};

/// A module compiled into the host binary.
#[derive(Clone)]
pub enum NativeModule {
    Entry(Arc<dyn PluginEntry>),
    Route(Arc<dyn RouteHandler>),
    Middleware(Arc<dyn Middleware>),
    Action(Arc<dyn ActionHook>),
    Filter(Arc<dyn FilterHook>),
}

impl NativeModule {
    fn kind(&self) -> &'static str {
        match self {
            NativeModule::Entry(_) => "entry",
            NativeModule::Route(_) => "route",
            NativeModule::Middleware(_) => "middleware",
            NativeModule::Action(_) => "action hook",
            NativeModule::Filter(_) => "filter hook",
        }
    }
}

/// Runtime for modules registered in-process under `(plugin id, reference)`.
///
/// The reference is the manifest string without a leading `./`, including
/// any `#export` suffix.
#[derive(Default)]
pub struct NativeRuntime {
    modules: DashMap<(String, String), NativeModule>,
    imports: AtomicUsize,
}

impl NativeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module. A later registration replaces an earlier one.
    pub fn register(&self, plugin_id: &str, reference: &str, module: NativeModule) {
        let reference = reference.strip_prefix("./").unwrap_or(reference);
        debug!(plugin_id, reference, kind = module.kind(), "native module registered");
        self.modules
            .insert((plugin_id.to_string(), reference.to_string()), module);
    }

    pub fn with_entry(self, plugin_id: &str, reference: &str, entry: Arc<dyn PluginEntry>) -> Self {
        self.register(plugin_id, reference, NativeModule::Entry(entry));
        self
    }

    pub fn with_route(
        self,
        plugin_id: &str,
        reference: &str,
        handler: Arc<dyn RouteHandler>,
    ) -> Self {
        self.register(plugin_id, reference, NativeModule::Route(handler));
        self
    }

    pub fn with_middleware(
        self,
        plugin_id: &str,
        reference: &str,
        middleware: Arc<dyn Middleware>,
    ) -> Self {
        self.register(plugin_id, reference, NativeModule::Middleware(middleware));
        self
    }

    pub fn with_action(self, plugin_id: &str, reference: &str, hook: Arc<dyn ActionHook>) -> Self {
        self.register(plugin_id, reference, NativeModule::Action(hook));
        self
    }

    pub fn with_filter(self, plugin_id: &str, reference: &str, hook: Arc<dyn FilterHook>) -> Self {
        self.register(plugin_id, reference, NativeModule::Filter(hook));
        self
    }

    /// Number of successful imports served so far.
    pub fn import_count(&self) -> usize {
        self.imports.load(Ordering::SeqCst)
    }

    fn key(spec: &ModuleSpec) -> (String, String) {
        let reference = match &spec.export {
            Some(export) => format!("{}#{export}", spec.path),
            None => spec.path.clone(),
        };
        (spec.plugin_id.clone(), reference)
    }

    fn lookup(&self, spec: &ModuleSpec) -> Result<NativeModule, PlinthError> {
        let module = self
            .modules
            .get(&Self::key(spec))
            .map(|m| m.value().clone())
            .ok_or_else(|| {
                PlinthError::load(&spec.plugin_id, format!("no native module '{spec}'"))
            })?;
        self.imports.fetch_add(1, Ordering::SeqCst);
        Ok(module)
    }

    fn mismatch(spec: &ModuleSpec, wanted: &str, found: &NativeModule) -> PlinthError {
        PlinthError::load(
            &spec.plugin_id,
            format!("module '{spec}' is a {} module, expected {wanted}", found.kind()),
        )
    }
}

#[async_trait]
impl ModuleRuntime for NativeRuntime {
    fn name(&self) -> &'static str {
        "native"
    }

    fn accepts(&self, spec: &ModuleSpec) -> bool {
        self.modules.contains_key(&Self::key(spec))
    }

    async fn import_entry(&self, spec: &ModuleSpec) -> Result<Arc<dyn PluginEntry>, PlinthError> {
        match self.lookup(spec)? {
            NativeModule::Entry(entry) => Ok(entry),
            other => Err(Self::mismatch(spec, "an entry", &other)),
        }
    }

    async fn import_route(
        &self,
        spec: &ModuleSpec,
    ) -> Result<Arc<dyn RouteHandler>, PlinthError> {
        match self.lookup(spec)? {
            NativeModule::Route(handler) => Ok(handler),
            other => Err(Self::mismatch(spec, "a route", &other)),
        }
    }

    async fn import_middleware(
        &self,
        spec: &ModuleSpec,
    ) -> Result<Arc<dyn Middleware>, PlinthError> {
        match self.lookup(spec)? {
            NativeModule::Middleware(middleware) => Ok(middleware),
            other => Err(Self::mismatch(spec, "a middleware", &other)),
        }
    }

    async fn import_hook(
        &self,
        spec: &ModuleSpec,
        kind: HookKind,
    ) -> Result<HookCallback, PlinthError> {
        match (self.lookup(spec)?, kind) {
            (NativeModule::Action(hook), HookKind::Action) => Ok(HookCallback::Action(hook)),
            (NativeModule::Filter(hook), HookKind::Filter) => Ok(HookCallback::Filter(hook)),
            (other, kind) => Err(Self::mismatch(spec, &format!("{kind} hook"), &other)),
        }
    }
}
