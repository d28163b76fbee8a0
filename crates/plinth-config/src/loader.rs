// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./plinth.toml` > `~/.config/plinth/plinth.toml` > `/etc/plinth/plinth.toml`
//! with environment variable overrides via `PLINTH_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::{self, PlinthConfig};

/// System-wide config file location.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/plinth/plinth.toml";

/// Local config file name, resolved against the working directory.
pub const LOCAL_CONFIG_FILE: &str = "plinth.toml";

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/plinth/plinth.toml` (system-wide)
/// 3. `~/.config/plinth/plinth.toml` (user XDG config)
/// 4. `./plinth.toml` (local directory)
/// 5. `PLINTH_*` environment variables
pub fn load_config() -> Result<PlinthConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<PlinthConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(PlinthConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<PlinthConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(PlinthConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Config files consulted by [`load_config`], lowest precedence first.
pub fn hierarchy() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(SYSTEM_CONFIG_PATH)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("plinth").join(LOCAL_CONFIG_FILE));
    }
    paths.push(
        std::env::current_dir()
            .map(|dir| dir.join(LOCAL_CONFIG_FILE))
            .unwrap_or_else(|_| PathBuf::from(LOCAL_CONFIG_FILE)),
    );
    paths
}

/// Build the Figment used for config loading, before extraction.
pub fn build_figment() -> Figment {
    hierarchy()
        .into_iter()
        .fold(
            Figment::new().merge(Serialized::defaults(PlinthConfig::default())),
            |figment, path| figment.merge(Toml::file(path)),
        )
        .merge(env_provider())
}

/// Environment provider mapping `PLINTH_<SECTION>_<KEY>` to `<section>.<key>`.
///
/// Uses `Env::map()` rather than `Env::split("_")` because key names contain
/// underscores: `PLINTH_SERVER_ROUTE_PREFIX` must map to `server.route_prefix`.
fn env_provider() -> Env {
    Env::prefixed("PLINTH_").map(|key| map_env_key(key.as_str()).into())
}

/// Maps a lowercased, prefix-stripped env var name onto a dotted config path.
pub(crate) fn map_env_key(key: &str) -> String {
    for section in model::sections() {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_map_to_sections() {
        assert_eq!(map_env_key("server_port"), "server.port");
        assert_eq!(map_env_key("server_route_prefix"), "server.route_prefix");
        assert_eq!(
            map_env_key("rate_limit_max_tracked_clients"),
            "rate_limit.max_tracked_clients"
        );
        assert_eq!(map_env_key("sync_interval_secs"), "sync.interval_secs");
        assert_eq!(map_env_key("unrelated"), "unrelated");
    }

    #[test]
    fn local_file_has_the_last_word() {
        let paths = hierarchy();
        assert_eq!(paths[0], Path::new(SYSTEM_CONFIG_PATH));
        assert!(paths.last().is_some_and(|p| p.ends_with(LOCAL_CONFIG_FILE) && p.is_absolute()));
    }

    #[test]
    fn env_overrides_file_values() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "[server]\nport = 9000\n")?;
            jail.set_env("PLINTH_SERVER_PORT", "9100");
            jail.set_env("PLINTH_SYNC_ENABLED", "false");
            let config = load_config_from_path(Path::new("custom.toml"))?;
            assert_eq!(config.server.port, 9100);
            assert!(!config.sync.enabled);
            Ok(())
        });
    }
}
