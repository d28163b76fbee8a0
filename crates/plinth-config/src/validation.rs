// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.

use std::collections::HashSet;

use crate::diagnostic::ConfigError;
use crate::model::{PlinthConfig, StorageBackend};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Collects every failure instead of stopping at the first one.
pub fn validate_config(config: &PlinthConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    let host = config.server.host.trim();
    if host.is_empty() {
        fail("server.host must not be empty".to_string());
    } else if host.parse::<std::net::IpAddr>().is_err()
        && !host
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        fail(format!(
            "server.host `{host}` is not a valid IP address or hostname"
        ));
    }

    for (key, prefix) in [
        ("server.route_prefix", &config.server.route_prefix),
        ("server.admin_prefix", &config.server.admin_prefix),
    ] {
        if !prefix.starts_with('/') || prefix.len() < 2 || prefix.ends_with('/') {
            fail(format!(
                "{key} `{prefix}` must start with `/`, be non-root, and have no trailing `/`"
            ));
        }
    }

    let route = config.server.route_prefix.as_str();
    let admin = config.server.admin_prefix.as_str();
    if route == admin
        || admin.starts_with(&format!("{route}/"))
        || route.starts_with(&format!("{admin}/"))
    {
        fail(format!(
            "server.route_prefix `{route}` and server.admin_prefix `{admin}` must not overlap"
        ));
    }

    if config.server.request_timeout_secs == 0 {
        fail("server.request_timeout_secs must be greater than zero".to_string());
    }

    if config.plugins.plugins_dir.trim().is_empty() {
        fail("plugins.plugins_dir must not be empty".to_string());
    }
    if config.plugins.backups_dir.trim().is_empty() {
        fail("plugins.backups_dir must not be empty".to_string());
    }
    if config.plugins.max_archive_bytes == 0 {
        fail("plugins.max_archive_bytes must be greater than zero".to_string());
    }

    if config.runtime.fuel == 0 {
        fail("runtime.fuel must be greater than zero".to_string());
    }
    if config.runtime.epoch_timeout_secs == 0 {
        fail("runtime.epoch_timeout_secs must be greater than zero".to_string());
    }
    if config.runtime.hook_timeout_ms == 0 {
        fail("runtime.hook_timeout_ms must be greater than zero".to_string());
    }

    if config.sync.enabled && config.sync.interval_secs == 0 {
        fail("sync.interval_secs must be greater than zero when sync is enabled".to_string());
    }

    if config.rate_limit.max_tracked_clients == 0 {
        fail("rate_limit.max_tracked_clients must be greater than zero".to_string());
    }

    if config.storage.backend == StorageBackend::Sqlite
        && config.storage.database_path.trim().is_empty()
    {
        fail("storage.database_path must not be empty".to_string());
    }

    if !LOG_LEVELS.contains(&config.logging.level.as_str()) {
        fail(format!(
            "logging.level `{}` must be one of: {}",
            config.logging.level,
            LOG_LEVELS.join(", ")
        ));
    }

    let mut seen_tokens = HashSet::new();
    for (i, token) in config.auth.tokens.iter().enumerate() {
        if token.token.trim().is_empty() {
            fail(format!("auth.tokens[{i}].token must not be empty"));
        }
        if token.actor_id.trim().is_empty() {
            fail(format!("auth.tokens[{i}].actor_id must not be empty"));
        }
        if !token.token.is_empty() && !seen_tokens.insert(token.token.as_str()) {
            fail(format!(
                "auth.tokens[{i}] duplicates a token already mapped to another actor"
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
