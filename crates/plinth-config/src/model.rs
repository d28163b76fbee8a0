// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Plinth plugin runtime.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Every table of `plinth.toml` with the keys it accepts.
///
/// Drives environment variable mapping and typo suggestions, so it must list
/// exactly what the structs below deserialize.
pub const SECTION_KEYS: &[(&str, &[&str])] = &[
    (
        "server",
        &[
            "host",
            "port",
            "route_prefix",
            "admin_prefix",
            "request_timeout_secs",
            "max_body_bytes",
        ],
    ),
    ("auth", &["tokens"]),
    ("auth.tokens", &["token", "actor_id", "roles", "permissions"]),
    (
        "plugins",
        &[
            "plugins_dir",
            "staging_dir",
            "backups_dir",
            "max_archive_bytes",
            "max_manifest_bytes",
        ],
    ),
    ("runtime", &["fuel", "epoch_timeout_secs", "hook_timeout_ms"]),
    ("sync", &["enabled", "interval_secs"]),
    ("rate_limit", &["max_tracked_clients"]),
    ("storage", &["backend", "database_path"]),
    ("logging", &["level"]),
];

/// Keys accepted by `table`, if it is a known table.
pub fn keys_of(table: &str) -> Option<&'static [&'static str]> {
    SECTION_KEYS
        .iter()
        .find(|(name, _)| *name == table)
        .map(|(_, keys)| *keys)
}

/// Top-level section names, in file order.
pub fn sections() -> impl Iterator<Item = &'static str> {
    SECTION_KEYS
        .iter()
        .map(|(name, _)| *name)
        .filter(|name| !name.contains('.'))
}

/// Top-level Plinth configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PlinthConfig {
    /// HTTP listener and route namespace settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Static bearer-token to actor mapping.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Plugin directories and package limits.
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// WASM module execution limits.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Periodic registry reconciliation.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Route rate-limiter settings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Persistence backend.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Reserved path prefix under which plugin routes are dispatched.
    #[serde(default = "default_route_prefix")]
    pub route_prefix: String,

    /// Path prefix of the admin pass-through API.
    #[serde(default = "default_admin_prefix")]
    pub admin_prefix: String,

    /// Deadline for a single plugin handler invocation.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Largest accepted request body, including uploaded archives.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            route_prefix: default_route_prefix(),
            admin_prefix: default_admin_prefix(),
            request_timeout_secs: default_request_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8420
}

fn default_route_prefix() -> String {
    "/api/plugins".to_string()
}

fn default_admin_prefix() -> String {
    "/api/admin/plugins".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    64 * 1024 * 1024
}

/// Bearer-token authentication configuration.
///
/// Session issuance lives outside Plinth; this table only maps tokens the
/// host already trusts onto actors.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

/// A single trusted bearer token.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TokenConfig {
    pub token: String,
    pub actor_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Plugin filesystem layout and package limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PluginsConfig {
    /// Directory holding one subdirectory per installed plugin.
    #[serde(default = "default_plugins_dir")]
    pub plugins_dir: String,

    /// Scratch directory for extraction. Defaults to `<plugins_dir>/.staging`
    /// so the final move is a same-filesystem rename.
    #[serde(default)]
    pub staging_dir: Option<String>,

    /// Directory holding plugin backups.
    #[serde(default = "default_backups_dir")]
    pub backups_dir: String,

    /// Largest accepted package archive.
    #[serde(default = "default_max_archive_bytes")]
    pub max_archive_bytes: u64,

    /// Largest accepted `plugin.json`.
    #[serde(default = "default_max_manifest_bytes")]
    pub max_manifest_bytes: u64,
}

impl PluginsConfig {
    /// Resolved staging directory.
    pub fn staging_path(&self) -> PathBuf {
        match &self.staging_dir {
            Some(dir) => PathBuf::from(dir),
            None => PathBuf::from(&self.plugins_dir).join(".staging"),
        }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            plugins_dir: default_plugins_dir(),
            staging_dir: None,
            backups_dir: default_backups_dir(),
            max_archive_bytes: default_max_archive_bytes(),
            max_manifest_bytes: default_max_manifest_bytes(),
        }
    }
}

fn data_path(leaf: &str) -> String {
    dirs::data_dir()
        .map(|p| p.join("plinth").join(leaf))
        .unwrap_or_else(|| PathBuf::from(leaf))
        .to_string_lossy()
        .into_owned()
}

fn default_plugins_dir() -> String {
    data_path("plugins")
}

fn default_backups_dir() -> String {
    data_path("backups")
}

fn default_max_archive_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_max_manifest_bytes() -> u64 {
    1024 * 1024
}

/// WASM module execution limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Fuel granted to each module call.
    #[serde(default = "default_fuel")]
    pub fuel: u64,

    /// Wall-clock limit for a single module call, in seconds.
    #[serde(default = "default_epoch_timeout_secs")]
    pub epoch_timeout_secs: u64,

    /// Limit for a single hook callback, in milliseconds.
    #[serde(default = "default_hook_timeout_ms")]
    pub hook_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            fuel: default_fuel(),
            epoch_timeout_secs: default_epoch_timeout_secs(),
            hook_timeout_ms: default_hook_timeout_ms(),
        }
    }
}

fn default_fuel() -> u64 {
    100_000_000
}

fn default_epoch_timeout_secs() -> u64 {
    5
}

fn default_hook_timeout_ms() -> u64 {
    5_000
}

/// Auto-sync configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_sync_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_sync_interval_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sync_interval_secs() -> u64 {
    60
}

/// Route rate-limiter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Upper bound on tracked (plugin, route, client) windows.
    #[serde(default = "default_max_tracked_clients")]
    pub max_tracked_clients: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_tracked_clients: default_max_tracked_clients(),
        }
    }
}

fn default_max_tracked_clients() -> usize {
    10_000
}

/// Persistence backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    data_path("plinth.db")
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
