// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lifecycle manager: install, activate, deactivate, configure, uninstall.
//!
//! Each operation is a compound transition over the package on disk, the
//! persisted record, and the in-memory registry. Operations on the same
//! plugin id are serialized through [`IdLocks`]; operations on different ids
//! run independently.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use plinth_config::model::PluginsConfig;
use plinth_core::manifest::RiskLevel;
use plinth_core::types::{Page, Pagination, PluginBackup, RecordFilter};
use plinth_core::{
    InstalledPluginRecord, LifecycleState, PlinthError, PluginManifest, PluginStatus, PluginStore,
};
use plinth_hooks::{HookBus, HookName};

use crate::locks::IdLocks;
use crate::package::{self, PackageLimits};
use crate::registry::{PluginRegistry, RegistryEvent};
use crate::validator::{self, ValidationReport};

/// Filesystem layout used by the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDirs {
    pub plugins: PathBuf,
    pub staging: PathBuf,
    pub backups: PathBuf,
}

impl From<&PluginsConfig> for PluginDirs {
    fn from(config: &PluginsConfig) -> Self {
        Self {
            plugins: PathBuf::from(&config.plugins_dir),
            staging: config.staging_path(),
            backups: PathBuf::from(&config.backups_dir),
        }
    }
}

/// Options for [`LifecycleManager::install`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InstallOptions {
    /// Replace an installed plugin with the same id.
    pub overwrite: bool,
    /// Activate after a successful install.
    pub activate: bool,
    /// Skip manifest validation and the high-risk gate.
    pub skip_validation: bool,
    /// Snapshot the installed version before overwriting it.
    pub backup: bool,
}

/// Options for [`LifecycleManager::uninstall`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UninstallOptions {
    /// Take a final snapshot and keep all backups.
    pub backup: bool,
}

/// Result of a successful install.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallOutcome {
    pub record: InstalledPluginRecord,
    pub warnings: Vec<String>,
    pub risk_level: RiskLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<PluginBackup>,
    /// Set when activation was requested and failed; the install itself stands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_error: Option<String>,
}

/// Admin view of a plugin: persisted record plus live registry state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    #[serde(flatten)]
    pub record: InstalledPluginRecord,
    pub state: LifecycleState,
    pub live: bool,
    pub routes: Vec<String>,
    pub admin_pages: Vec<String>,
    pub widgets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

/// Orchestrates plugin lifecycle transitions.
pub struct LifecycleManager {
    registry: Arc<PluginRegistry>,
    locks: Arc<IdLocks>,
    dirs: PluginDirs,
    limits: PackageLimits,
}

impl LifecycleManager {
    pub fn new(
        registry: Arc<PluginRegistry>,
        locks: Arc<IdLocks>,
        dirs: PluginDirs,
        limits: PackageLimits,
    ) -> Self {
        Self {
            registry,
            locks,
            dirs,
            limits,
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn dirs(&self) -> &PluginDirs {
        &self.dirs
    }

    fn store(&self) -> &Arc<dyn PluginStore> {
        self.registry.store()
    }

    fn hooks(&self) -> &Arc<HookBus> {
        self.registry.hooks()
    }

    async fn fire(&self, hook: HookName, id: &str, actor: &str) {
        self.hooks()
            .do_action(&hook, &json!({ "pluginId": id, "actorId": actor }))
            .await;
    }

    async fn require_record(&self, id: &str) -> Result<InstalledPluginRecord, PlinthError> {
        self.store()
            .get_record(id)
            .await?
            .ok_or_else(|| PlinthError::plugin_not_found(id))
    }

    /// Validates a package archive without installing it.
    pub async fn validate(&self, archive: &Path) -> Result<ValidationReport, PlinthError> {
        validator::validate(archive, self.limits).await
    }

    /// Installs a package archive.
    ///
    /// The archive is extracted into a scratch directory under the staging
    /// dir, validated, and its entry module loaded before anything else is
    /// touched. Every failure path leaves no partial plugin directory behind.
    pub async fn install(
        &self,
        archive: &Path,
        actor: &str,
        options: InstallOptions,
    ) -> Result<InstallOutcome, PlinthError> {
        tokio::fs::create_dir_all(&self.dirs.staging).await?;
        let staging = tempfile::Builder::new()
            .prefix("install-")
            .tempdir_in(&self.dirs.staging)?;
        let root = package::unpack_archive(archive, staging.path(), self.limits).await?;

        let (manifest, warnings) = self.check_package(&root, options.skip_validation).await?;
        let id = manifest.id.clone();
        let risk_level = manifest.risk_level();

        let _guard = self.locks.lock(&id).await;
        let existing = self.store().get_record(&id).await?;
        if let Some(prev) = &existing
            && !options.overwrite
            && prev.status != PluginStatus::Failed
        {
            return Err(PlinthError::Conflict(format!(
                "plugin '{id}' is already installed (version {}); use overwrite to replace it",
                prev.version
            )));
        }

        self.fire(HookName::BeforeInstall, &id, actor).await;

        if let Err(e) = self.registry.loader().load_staged(&id, &root).await {
            if existing.is_none() {
                let mut failed = InstalledPluginRecord::installing(manifest, actor);
                failed.status = PluginStatus::Failed;
                failed.record_error(e.to_string());
                self.store().upsert_record(&failed).await?;
            }
            return Err(e);
        }

        let backup = match &existing {
            Some(prev) if options.backup => Some(self.snapshot(prev, actor).await?),
            _ => None,
        };

        let was_active = existing.as_ref().is_some_and(|r| r.is_active)
            || self.registry.is_plugin_active(&id).await;
        let mut record = InstalledPluginRecord::installing(manifest, actor);
        match &existing {
            Some(prev) => record.created_at = prev.created_at,
            None => self.store().upsert_record(&record).await?,
        }

        self.registry.unregister(&id).await;
        if let Err(e) = self.place(&id, &root).await {
            if existing.is_some() {
                // The previous files and record are still in place.
                self.reinstate(&id, was_active).await;
            } else {
                record.status = PluginStatus::Failed;
                record.record_error(format!("install failed: {e}"));
                self.store().upsert_record(&record).await?;
            }
            return Err(e);
        }
        drop(staging);

        record.status = PluginStatus::Installed;
        record.touch();
        self.store().upsert_record(&record).await?;
        if self.store().get_config(&id).await?.is_none()
            && let Some(defaults) = &record.manifest.default_config
        {
            self.store().set_config(&id, defaults).await?;
        }

        info!(
            plugin_id = %id,
            version = %record.version,
            actor,
            risk = %risk_level,
            "plugin installed"
        );
        self.fire(HookName::AfterInstall, &id, actor).await;
        self.registry.emit(RegistryEvent::Installed {
            plugin_id: id.clone(),
            version: record.version.clone(),
        });

        let mut activation_error = None;
        if options.activate || was_active {
            match self.activate_locked(&id, actor).await {
                Ok(activated) => record = activated,
                Err(e) => {
                    activation_error = Some(e.to_string());
                    record = self.require_record(&id).await?;
                }
            }
        }

        Ok(InstallOutcome {
            record,
            warnings,
            risk_level,
            backup,
            activation_error,
        })
    }

    /// Brings the previously installed version back online after a failed
    /// overwrite.
    async fn reinstate(&self, id: &str, was_active: bool) {
        if !was_active {
            return;
        }
        match self.registry.activate(id).await {
            Ok(_) => info!(plugin_id = id, "previous install reactivated"),
            Err(e) => warn!(plugin_id = id, error = %e, "failed to reactivate previous install"),
        }
    }

    async fn check_package(
        &self,
        root: &Path,
        skip_validation: bool,
    ) -> Result<(PluginManifest, Vec<String>), PlinthError> {
        if skip_validation {
            let manifest = package::read_manifest(root).await?;
            if !validator::valid_plugin_id(&manifest.id) {
                return Err(PlinthError::validation(format!(
                    "plugin id '{}' is not a valid directory name",
                    manifest.id
                )));
            }
            return Ok((manifest, Vec::new()));
        }

        let report = validator::validate_dir(root, self.limits)?;
        if !report.is_valid {
            return Err(PlinthError::Validation {
                errors: report.errors,
            });
        }
        if report.risk_level == RiskLevel::High {
            return Err(PlinthError::validation(
                "package requests high-risk permissions; install with skip_validation to accept it",
            ));
        }
        let manifest = report.manifest.ok_or_else(|| {
            PlinthError::Internal("valid report without a manifest".to_string())
        })?;
        Ok((manifest, report.warnings))
    }

    /// Moves a staged plugin root into `plugins/<id>`, restoring the previous
    /// directory if the move fails.
    async fn place(&self, id: &str, staged: &Path) -> Result<(), PlinthError> {
        tokio::fs::create_dir_all(&self.dirs.plugins).await?;
        let target = self.dirs.plugins.join(id);

        let previous = if tokio::fs::try_exists(&target).await? {
            let aside = self
                .dirs
                .plugins
                .join(format!(".{id}.old-{}", Uuid::new_v4().simple()));
            tokio::fs::rename(&target, &aside).await?;
            Some(aside)
        } else {
            None
        };

        if let Err(e) = move_dir(staged, &target).await {
            if let Err(cleanup) = remove_dir_if_exists(&target).await {
                warn!(plugin_id = id, error = %cleanup, "failed to remove partial install");
            }
            if let Some(aside) = &previous
                && let Err(restore) = tokio::fs::rename(aside, &target).await
            {
                warn!(plugin_id = id, error = %restore, "failed to restore previous install");
            }
            return Err(e.into());
        }

        if let Some(aside) = previous
            && let Err(e) = tokio::fs::remove_dir_all(&aside).await
        {
            warn!(plugin_id = id, path = %aside.display(), error = %e, "failed to remove replaced install");
        }
        Ok(())
    }

    /// Copies the installed files and configuration into a backup.
    async fn snapshot(
        &self,
        record: &InstalledPluginRecord,
        actor: &str,
    ) -> Result<PluginBackup, PlinthError> {
        let id = &record.plugin_id;
        let created_at = Utc::now();
        let dest = self.dirs.backups.join(id).join(format!(
            "{}-{}",
            record.version,
            created_at.format("%Y%m%dT%H%M%S%.3fZ")
        ));
        let source = self.dirs.plugins.join(id);
        if tokio::fs::try_exists(&source).await? {
            package::copy_dir(&source, &dest).await?;
        } else {
            tokio::fs::create_dir_all(&dest).await?;
        }

        let backup = PluginBackup {
            id: Uuid::new_v4().to_string(),
            plugin_id: id.clone(),
            version: record.version.clone(),
            manifest: record.manifest.clone(),
            config: self.store().get_config(id).await?,
            path: dest.display().to_string(),
            created_by: actor.to_string(),
            created_at,
        };
        self.store().create_backup(&backup).await?;
        info!(plugin_id = %id, version = %record.version, path = %dest.display(), "plugin backed up");
        Ok(backup)
    }

    /// Activates an installed plugin.
    pub async fn activate(
        &self,
        id: &str,
        actor: &str,
    ) -> Result<InstalledPluginRecord, PlinthError> {
        let _guard = self.locks.lock(id).await;
        self.activate_locked(id, actor).await
    }

    async fn activate_locked(
        &self,
        id: &str,
        actor: &str,
    ) -> Result<InstalledPluginRecord, PlinthError> {
        let mut record = self.require_record(id).await?;
        if record.status == PluginStatus::Installing {
            return Err(PlinthError::Lifecycle {
                plugin_id: id.to_string(),
                message: "installation is still in progress".to_string(),
            });
        }

        self.fire(HookName::BeforeActivate, id, actor).await;
        match self.registry.activate(id).await {
            Ok(_) => {
                record.is_active = true;
                record.status = PluginStatus::Installed;
                record.last_activated = Some(Utc::now());
                record.touch();
                self.store().upsert_record(&record).await?;
                info!(plugin_id = id, actor, "plugin activated");
                self.fire(HookName::AfterActivate, id, actor).await;
                Ok(record)
            }
            Err(e) => {
                record.is_active = false;
                record.status = PluginStatus::Failed;
                record.record_error(format!("activation failed: {e}"));
                self.store().upsert_record(&record).await?;
                Err(e)
            }
        }
    }

    /// Deactivates a plugin. Deactivating an inactive plugin is a no-op.
    pub async fn deactivate(
        &self,
        id: &str,
        actor: &str,
    ) -> Result<InstalledPluginRecord, PlinthError> {
        let _guard = self.locks.lock(id).await;
        let mut record = self.require_record(id).await?;
        let live = self.registry.is_plugin_active(id).await;
        if !live && !record.is_active {
            return Ok(record);
        }

        self.fire(HookName::BeforeDeactivate, id, actor).await;
        self.registry.deactivate(id).await;
        if record.is_active {
            record.is_active = false;
            record.touch();
            self.store().upsert_record(&record).await?;
        }
        info!(plugin_id = id, actor, "plugin deactivated");
        self.fire(HookName::AfterDeactivate, id, actor).await;
        Ok(record)
    }

    /// Merges `patch` into the stored configuration and returns the result.
    ///
    /// Top-level keys replace existing ones; a `null` value removes the key.
    /// A live plugin is not reactivated; handlers see the new config on their
    /// next request.
    pub async fn configure(&self, id: &str, patch: Value, actor: &str) -> Result<Value, PlinthError> {
        let Value::Object(patch) = patch else {
            return Err(PlinthError::validation("configuration must be a JSON object"));
        };
        let _guard = self.locks.lock(id).await;
        let record = self.require_record(id).await?;

        let current = self
            .store()
            .get_config(id)
            .await?
            .or_else(|| record.manifest.default_config.clone());
        let merged = merge_config(current, patch);
        self.store().set_config(id, &merged).await?;

        info!(plugin_id = id, actor, "plugin configured");
        self.registry.emit(RegistryEvent::Configured {
            plugin_id: id.to_string(),
        });
        Ok(merged)
    }

    /// Uninstalls an inactive plugin.
    pub async fn uninstall(
        &self,
        id: &str,
        actor: &str,
        options: UninstallOptions,
    ) -> Result<(), PlinthError> {
        let guard = self.locks.lock(id).await;
        let record = self.require_record(id).await?;
        if record.is_active || self.registry.is_plugin_active(id).await {
            return Err(PlinthError::Conflict(format!(
                "plugin '{id}' is active; deactivate it before uninstalling"
            )));
        }

        self.fire(HookName::BeforeUninstall, id, actor).await;
        if options.backup {
            self.snapshot(&record, actor).await?;
        }

        self.registry.unregister(id).await;
        remove_dir_if_exists(&self.dirs.plugins.join(id)).await?;
        if !options.backup {
            let removed = self.store().delete_backups(id).await?;
            remove_dir_if_exists(&self.dirs.backups.join(id)).await?;
            if removed > 0 {
                info!(plugin_id = id, removed, "plugin backups deleted");
            }
        }
        self.store().delete_record(id).await?;

        info!(plugin_id = id, actor, "plugin uninstalled");
        self.fire(HookName::AfterUninstall, id, actor).await;
        self.registry.emit(RegistryEvent::Uninstalled {
            plugin_id: id.to_string(),
        });
        drop(guard);
        self.locks.forget(id);
        Ok(())
    }

    /// Lists plugins matching `filter`, ordered by id.
    pub async fn list(
        &self,
        filter: &RecordFilter,
        page: Pagination,
    ) -> Result<Page<PluginInfo>, PlinthError> {
        let records: Vec<InstalledPluginRecord> = self
            .store()
            .list_records(filter.is_active)
            .await?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        let total = records.len();
        let mut items = Vec::new();
        for record in records.into_iter().skip(page.offset).take(page.limit) {
            items.push(self.info(record, false).await?);
        }
        Ok(Page {
            items,
            total,
            offset: page.offset,
            limit: page.limit,
        })
    }

    /// One plugin with its configuration.
    pub async fn get(&self, id: &str) -> Result<PluginInfo, PlinthError> {
        let record = self.require_record(id).await?;
        self.info(record, true).await
    }

    async fn info(
        &self,
        record: InstalledPluginRecord,
        with_config: bool,
    ) -> Result<PluginInfo, PlinthError> {
        let id = record.plugin_id.clone();
        let live = self.registry.is_plugin_active(&id).await;
        let loaded = self.registry.get_plugin(&id).await;
        let routes = match &loaded {
            Some(plugin) => plugin.route_keys(),
            None => record.manifest.route_keys(),
        }
        .iter()
        .map(ToString::to_string)
        .collect();
        let last_error = match self.registry.last_error(&id).await {
            Some(e) => Some(e),
            None => record.last_error().map(str::to_string),
        };
        let config = if with_config {
            self.store().get_config(&id).await?
        } else {
            None
        };
        Ok(PluginInfo {
            state: LifecycleState::derive(Some(&record), live),
            live,
            routes,
            admin_pages: record.manifest.admin_pages.iter().map(|p| p.path.clone()).collect(),
            widgets: record
                .manifest
                .dashboard_widgets
                .iter()
                .map(|w| w.id.clone())
                .collect(),
            last_error,
            config,
            record,
        })
    }
}

/// Shallow merge where `null` deletes a key.
fn merge_config(current: Option<Value>, patch: Map<String, Value>) -> Value {
    let mut merged = match current {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    for (key, value) in patch {
        if value.is_null() {
            merged.remove(&key);
        } else {
            merged.insert(key, value);
        }
    }
    Value::Object(merged)
}

async fn move_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) => {
            // Staging may live on another filesystem.
            warn!(error = %e, "rename failed, copying plugin files instead");
            package::copy_dir(from, to).await.map(|_| ())
        }
    }
}

async fn remove_dir_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_replaces_and_removes_keys() {
        let current = json!({"a": 1, "b": 2, "nested": {"x": 1}});
        let patch = json!({"b": 3, "a": null, "nested": {"y": 2}, "c": "new"});
        let Value::Object(patch) = patch else { unreachable!() };
        assert_eq!(
            merge_config(Some(current), patch),
            json!({"b": 3, "nested": {"y": 2}, "c": "new"})
        );
    }

    #[test]
    fn merge_onto_nothing() {
        let Value::Object(patch) = json!({"k": true}) else { unreachable!() };
        assert_eq!(merge_config(None, patch.clone()), json!({"k": true}));
        assert_eq!(merge_config(Some(json!("scalar")), patch), json!({"k": true}));
    }

    #[test]
    fn install_options_deserialize_camel_case() {
        let options: InstallOptions =
            serde_json::from_value(json!({"skipValidation": true, "activate": true})).unwrap();
        assert!(options.skip_validation);
        assert!(options.activate);
        assert!(!options.overwrite);
    }

    #[test]
    fn dirs_default_staging_under_plugins() {
        let config = PluginsConfig {
            plugins_dir: "/srv/plugins".into(),
            ..PluginsConfig::default()
        };
        let dirs = PluginDirs::from(&config);
        assert_eq!(dirs.staging, PathBuf::from("/srv/plugins/.staging"));
    }

    #[tokio::test]
    async fn remove_missing_dir_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        remove_dir_if_exists(&dir.path().join("missing")).await.unwrap();
    }
}
