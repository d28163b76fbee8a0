// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared domain types: persisted records, actors, and lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::manifest::PluginManifest;

/// Maximum number of entries kept in a record's error log.
pub const MAX_ERROR_LOG: usize = 50;

/// Persisted installation status of a plugin.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PluginStatus {
    Installed,
    Installing,
    Failed,
    Disabled,
}

/// Lifecycle state of a plugin as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum LifecycleState {
    Uninstalled,
    Installing,
    InstalledInactive,
    InstalledActive,
    Failed,
}

impl LifecycleState {
    /// Derives the state from an optional persisted record and the live flag.
    pub fn derive(record: Option<&InstalledPluginRecord>, live: bool) -> Self {
        match record {
            None => LifecycleState::Uninstalled,
            Some(r) => match r.status {
                PluginStatus::Installing => LifecycleState::Installing,
                PluginStatus::Failed => LifecycleState::Failed,
                _ if live => LifecycleState::InstalledActive,
                _ => LifecycleState::InstalledInactive,
            },
        }
    }
}

/// One entry in a plugin's error log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Durable record of an installed plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledPluginRecord {
    pub plugin_id: String,
    pub name: String,
    pub version: String,
    pub status: PluginStatus,
    pub is_active: bool,
    pub manifest: PluginManifest,
    pub installed_by: String,
    pub last_activated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_log: Vec<ErrorLogEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstalledPluginRecord {
    /// Creates a fresh record in the `installing` state.
    pub fn installing(manifest: PluginManifest, installed_by: &str) -> Self {
        let now = Utc::now();
        Self {
            plugin_id: manifest.id.clone(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            status: PluginStatus::Installing,
            is_active: false,
            manifest,
            installed_by: installed_by.to_string(),
            last_activated: None,
            error_log: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Appends to the error log, dropping the oldest entries past the cap.
    pub fn record_error(&mut self, message: impl Into<String>) {
        let now = Utc::now();
        self.error_log.push(ErrorLogEntry {
            at: now,
            message: message.into(),
        });
        if self.error_log.len() > MAX_ERROR_LOG {
            let excess = self.error_log.len() - MAX_ERROR_LOG;
            self.error_log.drain(..excess);
        }
        self.updated_at = now;
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn last_error(&self) -> Option<&str> {
        self.error_log.last().map(|e| e.message.as_str())
    }
}

/// Snapshot of a plugin's previous version and configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginBackup {
    pub id: String,
    pub plugin_id: String,
    pub version: String,
    pub manifest: PluginManifest,
    pub config: Option<serde_json::Value>,
    /// Directory holding the copied plugin files.
    pub path: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Offset/limit pagination for admin listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pagination {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// Filter for admin listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecordFilter {
    pub is_active: Option<bool>,
    pub status: Option<PluginStatus>,
    pub category: Option<crate::manifest::PluginCategory>,
}

impl RecordFilter {
    pub fn matches(&self, record: &InstalledPluginRecord) -> bool {
        self.is_active.is_none_or(|a| record.is_active == a)
            && self.status.is_none_or(|s| record.status == s)
            && self.category.is_none_or(|c| record.manifest.category == c)
    }
}

/// One page of results plus the unpaginated total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

/// An authenticated caller, resolved outside the plugin runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Role that satisfies every permission check.
pub const ADMIN_ROLE: &str = "admin";

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn with_permissions(mut self, permissions: &[&str]) -> Self {
        self.permissions = permissions.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ADMIN_ROLE)
    }

    /// Returns the first requirement this actor does not meet.
    ///
    /// A requirement is met when it names one of the actor's roles or
    /// permissions. Admins meet every requirement.
    pub fn missing<'a>(&self, required: &'a [String]) -> Option<&'a str> {
        if self.is_admin() {
            return None;
        }
        required
            .iter()
            .find(|req| !self.roles.contains(req) && !self.permissions.contains(req))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PluginCategory;

    fn manifest() -> PluginManifest {
        serde_json::from_value(serde_json::json!({
            "id": "seo", "name": "SEO", "version": "0.1.0", "category": "content"
        }))
        .unwrap()
    }

    #[test]
    fn new_record_is_installing_and_inactive() {
        let record = InstalledPluginRecord::installing(manifest(), "alice");
        assert_eq!(record.status, PluginStatus::Installing);
        assert!(!record.is_active);
        assert_eq!(record.installed_by, "alice");
        assert_eq!(
            LifecycleState::derive(Some(&record), false),
            LifecycleState::Installing
        );
    }

    #[test]
    fn lifecycle_state_derivation() {
        let mut record = InstalledPluginRecord::installing(manifest(), "a");
        assert_eq!(LifecycleState::derive(None, false), LifecycleState::Uninstalled);
        record.status = PluginStatus::Installed;
        assert_eq!(
            LifecycleState::derive(Some(&record), false),
            LifecycleState::InstalledInactive
        );
        assert_eq!(
            LifecycleState::derive(Some(&record), true),
            LifecycleState::InstalledActive
        );
        record.status = PluginStatus::Failed;
        assert_eq!(LifecycleState::derive(Some(&record), true), LifecycleState::Failed);
        assert_eq!(LifecycleState::Failed.to_string(), "failed");
        assert_eq!(
            LifecycleState::InstalledActive.to_string(),
            "installed-active"
        );
    }

    #[test]
    fn error_log_is_capped() {
        let mut record = InstalledPluginRecord::installing(manifest(), "a");
        for i in 0..(MAX_ERROR_LOG + 5) {
            record.record_error(format!("error {i}"));
        }
        assert_eq!(record.error_log.len(), MAX_ERROR_LOG);
        assert_eq!(record.error_log[0].message, "error 5");
        assert_eq!(
            record.last_error(),
            Some(format!("error {}", MAX_ERROR_LOG + 4).as_str())
        );
    }

    #[test]
    fn record_filter_matches_fields() {
        let mut record = InstalledPluginRecord::installing(manifest(), "a");
        record.status = PluginStatus::Installed;
        record.is_active = true;
        assert!(RecordFilter::default().matches(&record));
        assert!(
            RecordFilter {
                is_active: Some(true),
                ..Default::default()
            }
            .matches(&record)
        );
        assert!(
            !RecordFilter {
                is_active: Some(false),
                ..Default::default()
            }
            .matches(&record)
        );
        assert!(
            !RecordFilter {
                category: Some(PluginCategory::Security),
                ..Default::default()
            }
            .matches(&record)
        );
    }

    #[test]
    fn actor_requirements() {
        let editor = Actor::new("bob")
            .with_roles(&["editor"])
            .with_permissions(&["write:content"]);
        assert_eq!(editor.missing(&["editor".into()]), None);
        assert_eq!(editor.missing(&["write:content".into()]), None);
        assert_eq!(
            editor.missing(&["write:content".into(), "admin:access".into()]),
            Some("admin:access")
        );
        let admin = Actor::new("root").with_roles(&["admin"]);
        assert_eq!(admin.missing(&["anything".into()]), None);
    }

    #[test]
    fn record_serializes_camel_case() {
        let record = InstalledPluginRecord::installing(manifest(), "a");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["pluginId"], "seo");
        assert_eq!(json["isActive"], false);
        assert_eq!(json["status"], "installing");
    }
}
