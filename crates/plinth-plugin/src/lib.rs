// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plugin lifecycle runtime for Plinth.
//!
//! Packages are validated by [`validator`], turned into live modules by the
//! [`loader`] through pluggable [`runtime`]s, and made live or idle by the
//! [`registry`]. The [`lifecycle`] manager orchestrates install, activate,
//! deactivate, configure, and uninstall on top of those pieces, and
//! [`sync`] keeps the registry aligned with persisted records. A
//! [`PluginHost`] wires everything together.

pub mod host;
pub mod lifecycle;
pub mod loader;
pub mod locks;
pub mod package;
pub mod registry;
pub mod runtime;
pub mod sync;
pub mod validator;

pub use host::{PluginHost, PluginHostBuilder};
pub use lifecycle::{
    InstallOptions, InstallOutcome, LifecycleManager, PluginDirs, PluginInfo, UninstallOptions,
};
pub use loader::{LoadOptions, LoadedPlugin, LoadedRoute, ModuleLoader};
pub use package::PackageLimits;
pub use registry::{InitReport, PluginRegistry, RegistryEvent, RouteMatch};
pub use runtime::native::NativeModule;
pub use runtime::{ModuleRuntime, ModuleSpec, NativeRuntime, WasmLimits, WasmRuntime};
pub use sync::{AutoSync, SyncReport};
pub use validator::{ValidationReport, validate, validate_manifest};
