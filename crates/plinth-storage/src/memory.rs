// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory plugin store for tests and ephemeral hosts.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use plinth_core::types::PluginBackup;
use plinth_core::{InstalledPluginRecord, PlinthError, PluginStore};

/// Process-local [`PluginStore`]. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, InstalledPluginRecord>>,
    configs: RwLock<HashMap<String, Value>>,
    backups: RwLock<Vec<PluginBackup>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PluginStore for MemoryStore {
    async fn upsert_record(&self, record: &InstalledPluginRecord) -> Result<(), PlinthError> {
        self.records
            .write()
            .await
            .insert(record.plugin_id.clone(), record.clone());
        Ok(())
    }

    async fn get_record(
        &self,
        plugin_id: &str,
    ) -> Result<Option<InstalledPluginRecord>, PlinthError> {
        Ok(self.records.read().await.get(plugin_id).cloned())
    }

    async fn list_records(
        &self,
        is_active: Option<bool>,
    ) -> Result<Vec<InstalledPluginRecord>, PlinthError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| is_active.is_none_or(|a| r.is_active == a))
            .cloned()
            .collect())
    }

    async fn delete_record(&self, plugin_id: &str) -> Result<bool, PlinthError> {
        self.configs.write().await.remove(plugin_id);
        Ok(self.records.write().await.remove(plugin_id).is_some())
    }

    async fn get_config(&self, plugin_id: &str) -> Result<Option<Value>, PlinthError> {
        Ok(self.configs.read().await.get(plugin_id).cloned())
    }

    async fn set_config(&self, plugin_id: &str, config: &Value) -> Result<(), PlinthError> {
        self.configs
            .write()
            .await
            .insert(plugin_id.to_string(), config.clone());
        Ok(())
    }

    async fn create_backup(&self, backup: &PluginBackup) -> Result<(), PlinthError> {
        self.backups.write().await.push(backup.clone());
        Ok(())
    }

    async fn list_backups(&self, plugin_id: &str) -> Result<Vec<PluginBackup>, PlinthError> {
        let mut found: Vec<PluginBackup> = self
            .backups
            .read()
            .await
            .iter()
            .filter(|b| b.plugin_id == plugin_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn delete_backups(&self, plugin_id: &str) -> Result<usize, PlinthError> {
        let mut backups = self.backups.write().await;
        let before = backups.len();
        backups.retain(|b| b.plugin_id != plugin_id);
        Ok(before - backups.len())
    }
}
