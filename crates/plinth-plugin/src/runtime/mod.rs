// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Module runtimes.
//!
//! A runtime turns a module reference from a manifest into a live trait
//! object. The loader asks runtimes in registration order and the first one
//! that accepts a reference imports it.

pub mod native;
pub mod wasm;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use plinth_core::manifest::HookKind;
use plinth_core::{Middleware, PlinthError, PluginEntry, RouteHandler};
use plinth_hooks::HookCallback;

use crate::package;

pub use native::NativeRuntime;
pub use wasm::{WasmLimits, WasmRuntime};

/// A module reference resolved against a plugin root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpec {
    pub plugin_id: String,
    pub root: PathBuf,
    /// Path relative to the plugin root, without `./` and without the export.
    pub path: String,
    /// Export named after `#`, if any.
    pub export: Option<String>,
}

impl ModuleSpec {
    /// Parses `reference` (`path` or `path#export`).
    pub fn new(plugin_id: &str, root: &Path, reference: &str) -> Self {
        let (path, export) = package::split_reference(reference);
        Self {
            plugin_id: plugin_id.to_string(),
            root: root.to_path_buf(),
            path: path.strip_prefix("./").unwrap_or(path).to_string(),
            export: export.map(str::to_string),
        }
    }

    /// Absolute file path, `None` if the reference leaves the plugin root.
    pub fn file(&self) -> Option<PathBuf> {
        package::resolve_within(&self.root, &self.path)
    }

    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.path).extension().and_then(|e| e.to_str())
    }
}

impl std::fmt::Display for ModuleSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.plugin_id, self.path)?;
        if let Some(export) = &self.export {
            write!(f, "#{export}")?;
        }
        Ok(())
    }
}

/// Imports plugin modules of one kind of code.
#[async_trait]
pub trait ModuleRuntime: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether this runtime can import the referenced module.
    fn accepts(&self, spec: &ModuleSpec) -> bool;

    async fn import_entry(&self, spec: &ModuleSpec) -> Result<Arc<dyn PluginEntry>, PlinthError>;

    async fn import_route(&self, spec: &ModuleSpec)
    -> Result<Arc<dyn RouteHandler>, PlinthError>;

    async fn import_middleware(
        &self,
        spec: &ModuleSpec,
    ) -> Result<Arc<dyn Middleware>, PlinthError>;

    async fn import_hook(
        &self,
        spec: &ModuleSpec,
        kind: HookKind,
    ) -> Result<HookCallback, PlinthError>;
}
