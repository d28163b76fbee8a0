// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test host for integration testing.
//!
//! `TestHost` assembles a complete [`PluginHost`] over a temp directory, an
//! in-memory store, and a [`NativeRuntime`] tests register modules on.
//! Auto-sync is off so tests drive reconciliation explicitly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use plinth_config::PlinthConfig;
use plinth_config::model::{StorageBackend, TokenConfig};
use plinth_core::{PlinthError, PluginStore};
use plinth_plugin::{
    InstallOptions, InstallOutcome, LifecycleManager, ModuleRuntime, NativeRuntime, PluginHost,
    PluginRegistry,
};
use plinth_storage::MemoryStore;
use tempfile::TempDir;

use crate::modules::{CountingEntry, Greeting};
use crate::package::PackageBuilder;

/// Bearer token mapped to an actor with the `admin` role.
pub const ADMIN_TOKEN: &str = "admin-token";
/// Bearer token mapped to an actor with no roles.
pub const USER_TOKEN: &str = "user-token";

/// Builder for [`TestHost`].
pub struct TestHostBuilder {
    native: NativeRuntime,
    configure: Vec<Box<dyn FnOnce(&mut PlinthConfig) + Send>>,
    wasm: bool,
}

impl TestHostBuilder {
    fn new() -> Self {
        Self {
            native: NativeRuntime::new(),
            configure: Vec::new(),
            wasm: false,
        }
    }

    /// Starts from an already populated native runtime.
    pub fn with_native(mut self, native: NativeRuntime) -> Self {
        self.native = native;
        self
    }

    /// Adjusts the generated config before the host is built.
    pub fn with_config(mut self, f: impl FnOnce(&mut PlinthConfig) + Send + 'static) -> Self {
        self.configure.push(Box::new(f));
        self
    }

    /// Adds the WASM runtime after the native one.
    pub fn with_wasm(mut self) -> Self {
        self.wasm = true;
        self
    }

    pub fn build(self) -> Result<TestHost, PlinthError> {
        let dir = TempDir::new()?;
        let mut config = PlinthConfig::default();
        config.plugins.plugins_dir = dir.path().join("plugins").display().to_string();
        config.plugins.backups_dir = dir.path().join("backups").display().to_string();
        config.storage.backend = StorageBackend::Memory;
        config.sync.enabled = false;
        config.auth.tokens = vec![
            TokenConfig {
                token: ADMIN_TOKEN.to_string(),
                actor_id: "admin".to_string(),
                roles: vec!["admin".to_string()],
                permissions: Vec::new(),
            },
            TokenConfig {
                token: USER_TOKEN.to_string(),
                actor_id: "user".to_string(),
                roles: Vec::new(),
                permissions: Vec::new(),
            },
        ];
        for f in self.configure {
            f(&mut config);
        }

        let native = Arc::new(self.native);
        let store: Arc<dyn PluginStore> = Arc::new(MemoryStore::new());
        let mut builder = PluginHost::builder(config, store)
            .runtime(Arc::clone(&native) as Arc<dyn ModuleRuntime>);
        if !self.wasm {
            builder = builder.without_wasm();
        }
        let host = Arc::new(builder.build()?);

        Ok(TestHost { host, native, dir })
    }
}

/// A plugin host rooted in a temp directory.
pub struct TestHost {
    pub host: Arc<PluginHost>,
    pub native: Arc<NativeRuntime>,
    dir: TempDir,
}

impl TestHost {
    pub fn builder() -> TestHostBuilder {
        TestHostBuilder::new()
    }

    /// Host with the `hello-world` modules registered.
    pub fn hello_world() -> Result<(TestHost, Arc<CountingEntry>), PlinthError> {
        let entry = Arc::new(CountingEntry::default());
        let native = NativeRuntime::new()
            .with_entry("hello-world", "index.wasm", entry.clone())
            .with_route(
                "hello-world",
                "routes/hello.wasm",
                Arc::new(Greeting::new("Hello from hello-world")),
            );
        let host = Self::builder().with_native(native).build()?;
        Ok((host, entry))
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.dir.path().join("plugins")
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        self.host.registry()
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        self.host.lifecycle()
    }

    pub fn store(&self) -> &Arc<dyn PluginStore> {
        self.host.store()
    }

    /// Writes the package into the temp dir and returns the archive path.
    pub fn archive(&self, package: &PackageBuilder) -> Result<PathBuf, PlinthError> {
        Ok(package.write_to(&self.dir.path().join("archives"))?)
    }

    /// Writes and installs a package as `admin`.
    pub async fn install(
        &self,
        package: &PackageBuilder,
        options: InstallOptions,
    ) -> Result<InstallOutcome, PlinthError> {
        let archive = self.archive(package)?;
        self.lifecycle().install(&archive, "admin", options).await
    }
}
