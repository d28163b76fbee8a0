// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence contract consumed by the plugin runtime.

use async_trait::async_trait;

use crate::error::PlinthError;
use crate::types::{InstalledPluginRecord, PluginBackup};

/// Durable store for plugin records, configuration blobs, and backups.
///
/// Every write is atomic per record. Implementations must support lookup by
/// plugin id and listing filtered by the active flag.
#[async_trait]
pub trait PluginStore: Send + Sync {
    /// Inserts or replaces the record keyed by `record.plugin_id`.
    async fn upsert_record(&self, record: &InstalledPluginRecord) -> Result<(), PlinthError>;

    async fn get_record(&self, plugin_id: &str)
    -> Result<Option<InstalledPluginRecord>, PlinthError>;

    /// Lists records ordered by plugin id, optionally filtered by `is_active`.
    async fn list_records(
        &self,
        is_active: Option<bool>,
    ) -> Result<Vec<InstalledPluginRecord>, PlinthError>;

    /// Deletes a record and its configuration blob. Returns false if absent.
    async fn delete_record(&self, plugin_id: &str) -> Result<bool, PlinthError>;

    async fn get_config(&self, plugin_id: &str) -> Result<Option<serde_json::Value>, PlinthError>;

    async fn set_config(
        &self,
        plugin_id: &str,
        config: &serde_json::Value,
    ) -> Result<(), PlinthError>;

    async fn create_backup(&self, backup: &PluginBackup) -> Result<(), PlinthError>;

    /// Lists backups for a plugin, newest first.
    async fn list_backups(&self, plugin_id: &str) -> Result<Vec<PluginBackup>, PlinthError>;

    /// Deletes all backups for a plugin and returns how many were removed.
    async fn delete_backups(&self, plugin_id: &str) -> Result<usize, PlinthError>;
}
