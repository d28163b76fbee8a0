// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-backed plugin store.
//!
//! Holds a single `tokio_rusqlite::Connection`; every statement runs on its
//! background thread via `call()`, which serializes writes. Each record write
//! is one `INSERT OR REPLACE`, so per-record updates are atomic.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_rusqlite::Connection;
use tracing::debug;

use plinth_core::types::{ErrorLogEntry, PluginBackup};
use plinth_core::{InstalledPluginRecord, PlinthError, PluginStore};

use crate::migrations;

const RECORD_COLUMNS: &str = "plugin_id, name, version, status, is_active, manifest_json, \
     installed_by, last_activated, error_log_json, created_at, updated_at";

/// Raw row as stored, converted to a typed record outside the connection thread.
struct RecordRow {
    plugin_id: String,
    name: String,
    version: String,
    status: String,
    is_active: bool,
    manifest_json: String,
    installed_by: String,
    last_activated: Option<String>,
    error_log_json: String,
    created_at: String,
    updated_at: String,
}

impl RecordRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            plugin_id: row.get(0)?,
            name: row.get(1)?,
            version: row.get(2)?,
            status: row.get(3)?,
            is_active: row.get(4)?,
            manifest_json: row.get(5)?,
            installed_by: row.get(6)?,
            last_activated: row.get(7)?,
            error_log_json: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_record(self) -> Result<InstalledPluginRecord, PlinthError> {
        let error_log: Vec<ErrorLogEntry> =
            serde_json::from_str(&self.error_log_json).map_err(PlinthError::storage)?;
        Ok(InstalledPluginRecord {
            plugin_id: self.plugin_id,
            name: self.name,
            version: self.version,
            status: self
                .status
                .parse()
                .map_err(|e| PlinthError::storage(format!("bad status '{}': {e}", self.status)))?,
            is_active: self.is_active,
            manifest: serde_json::from_str(&self.manifest_json).map_err(PlinthError::storage)?,
            installed_by: self.installed_by,
            last_activated: self.last_activated.as_deref().map(parse_ts).transpose()?,
            error_log,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, PlinthError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PlinthError::storage(format!("bad timestamp '{s}': {e}")))
}

fn map_call_err(op: &str) -> impl FnOnce(tokio_rusqlite::Error<rusqlite::Error>) -> PlinthError {
    let op = op.to_string();
    move |e| PlinthError::storage(format!("failed to {op}: {e}"))
}

/// SQLite implementation of [`PluginStore`].
pub struct SqliteStore {
    conn: Arc<Connection>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path` in WAL mode and runs
    /// migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, PlinthError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let conn = Connection::open(&path)
            .await
            .map_err(|e| PlinthError::storage(format!("failed to open {}: {e}", path.display())))?;
        conn.call(|conn| {
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.busy_timeout(Duration::from_secs(5))?;
            Ok(())
        })
        .await
        .map_err(map_call_err("configure connection"))?;
        let store = Self::from_connection(Arc::new(conn)).await?;
        debug!(path = %path.display(), "SQLite plugin store opened");
        Ok(store)
    }

    /// Opens a private in-memory database.
    pub async fn open_in_memory() -> Result<Self, PlinthError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| PlinthError::storage(format!("failed to open in-memory db: {e}")))?;
        Self::from_connection(Arc::new(conn)).await
    }

    /// Wraps an existing connection and runs pending migrations on it.
    pub async fn from_connection(conn: Arc<Connection>) -> Result<Self, PlinthError> {
        conn.call(|conn| Ok(migrations::run_migrations(conn)))
            .await
            .map_err(map_call_err("run migrations"))??;
        Ok(Self { conn })
    }
}

#[async_trait]
impl PluginStore for SqliteStore {
    async fn upsert_record(&self, record: &InstalledPluginRecord) -> Result<(), PlinthError> {
        let manifest_json = serde_json::to_string(&record.manifest).map_err(PlinthError::storage)?;
        let error_log_json =
            serde_json::to_string(&record.error_log).map_err(PlinthError::storage)?;
        let plugin_id = record.plugin_id.clone();
        let name = record.name.clone();
        let version = record.version.clone();
        let status = record.status.to_string();
        let is_active = record.is_active;
        let installed_by = record.installed_by.clone();
        let last_activated = record.last_activated.map(|t| t.to_rfc3339());
        let created_at = record.created_at.to_rfc3339();
        let updated_at = record.updated_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT OR REPLACE INTO plugins ({RECORD_COLUMNS}) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                    ),
                    rusqlite::params![
                        plugin_id,
                        name,
                        version,
                        status,
                        is_active,
                        manifest_json,
                        installed_by,
                        last_activated,
                        error_log_json,
                        created_at,
                        updated_at,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(map_call_err("upsert plugin record"))
    }

    async fn get_record(
        &self,
        plugin_id: &str,
    ) -> Result<Option<InstalledPluginRecord>, PlinthError> {
        let plugin_id = plugin_id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RECORD_COLUMNS} FROM plugins WHERE plugin_id = ?1"
                ))?;
                match stmt.query_row(rusqlite::params![plugin_id], RecordRow::from_row) {
                    Ok(row) => Ok(Some(row)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(map_call_err("get plugin record"))?;
        row.map(RecordRow::into_record).transpose()
    }

    async fn list_records(
        &self,
        is_active: Option<bool>,
    ) -> Result<Vec<InstalledPluginRecord>, PlinthError> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut rows = Vec::new();
                match is_active {
                    Some(active) => {
                        let mut stmt = conn.prepare(&format!(
                            "SELECT {RECORD_COLUMNS} FROM plugins WHERE is_active = ?1 \
                             ORDER BY plugin_id"
                        ))?;
                        for row in stmt.query_map(rusqlite::params![active], RecordRow::from_row)? {
                            rows.push(row?);
                        }
                    }
                    None => {
                        let mut stmt = conn.prepare(&format!(
                            "SELECT {RECORD_COLUMNS} FROM plugins ORDER BY plugin_id"
                        ))?;
                        for row in stmt.query_map([], RecordRow::from_row)? {
                            rows.push(row?);
                        }
                    }
                }
                Ok(rows)
            })
            .await
            .map_err(map_call_err("list plugin records"))?;
        rows.into_iter().map(RecordRow::into_record).collect()
    }

    async fn delete_record(&self, plugin_id: &str) -> Result<bool, PlinthError> {
        let plugin_id = plugin_id.to_string();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM plugin_configs WHERE plugin_id = ?1",
                    rusqlite::params![plugin_id],
                )?;
                let removed = tx.execute(
                    "DELETE FROM plugins WHERE plugin_id = ?1",
                    rusqlite::params![plugin_id],
                )?;
                tx.commit()?;
                Ok(removed > 0)
            })
            .await
            .map_err(map_call_err("delete plugin record"))
    }

    async fn get_config(&self, plugin_id: &str) -> Result<Option<Value>, PlinthError> {
        let plugin_id = plugin_id.to_string();
        let raw: Option<String> = self
            .conn
            .call(move |conn| {
                let result = conn.query_row(
                    "SELECT config_json FROM plugin_configs WHERE plugin_id = ?1",
                    rusqlite::params![plugin_id],
                    |row| row.get(0),
                );
                match result {
                    Ok(json) => Ok(Some(json)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(map_call_err("get plugin config"))?;
        raw.map(|json| serde_json::from_str(&json).map_err(PlinthError::storage))
            .transpose()
    }

    async fn set_config(&self, plugin_id: &str, config: &Value) -> Result<(), PlinthError> {
        let plugin_id = plugin_id.to_string();
        let config_json = serde_json::to_string(config).map_err(PlinthError::storage)?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO plugin_configs (plugin_id, config_json, updated_at) \
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![plugin_id, config_json, now],
                )?;
                Ok(())
            })
            .await
            .map_err(map_call_err("set plugin config"))
    }

    async fn create_backup(&self, backup: &PluginBackup) -> Result<(), PlinthError> {
        let manifest_json = serde_json::to_string(&backup.manifest).map_err(PlinthError::storage)?;
        let config_json = backup
            .config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(PlinthError::storage)?;
        let backup = backup.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO plugin_backups \
                     (id, plugin_id, version, manifest_json, config_json, path, created_by, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        backup.id,
                        backup.plugin_id,
                        backup.version,
                        manifest_json,
                        config_json,
                        backup.path,
                        backup.created_by,
                        backup.created_at.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(map_call_err("create plugin backup"))
    }

    async fn list_backups(&self, plugin_id: &str) -> Result<Vec<PluginBackup>, PlinthError> {
        let plugin_id = plugin_id.to_string();
        #[allow(clippy::type_complexity)]
        let rows: Vec<(String, String, String, String, Option<String>, String, String, String)> =
            self.conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(
                        "SELECT id, plugin_id, version, manifest_json, config_json, path, \
                         created_by, created_at FROM plugin_backups WHERE plugin_id = ?1 \
                         ORDER BY created_at DESC",
                    )?;
                    let mut rows = Vec::new();
                    for row in stmt.query_map(rusqlite::params![plugin_id], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                            row.get(7)?,
                        ))
                    })? {
                        rows.push(row?);
                    }
                    Ok(rows)
                })
                .await
                .map_err(map_call_err("list plugin backups"))?;

        rows.into_iter()
            .map(
                |(id, plugin_id, version, manifest_json, config_json, path, created_by, created_at)| {
                    Ok(PluginBackup {
                        id,
                        plugin_id,
                        version,
                        manifest: serde_json::from_str(&manifest_json)
                            .map_err(PlinthError::storage)?,
                        config: config_json
                            .map(|c| serde_json::from_str(&c).map_err(PlinthError::storage))
                            .transpose()?,
                        path,
                        created_by,
                        created_at: parse_ts(&created_at)?,
                    })
                },
            )
            .collect()
    }

    async fn delete_backups(&self, plugin_id: &str) -> Result<usize, PlinthError> {
        let plugin_id = plugin_id.to_string();
        self.conn
            .call(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM plugin_backups WHERE plugin_id = ?1",
                    rusqlite::params![plugin_id],
                )?;
                Ok(removed)
            })
            .await
            .map_err(map_call_err("delete plugin backups"))
    }
}
