// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the Plinth plugin runtime.
//!
//! `plinth.toml` is layered from the system, user, and working directories,
//! then `PLINTH_*` environment variables. Unknown keys are rejected, and
//! every failure comes back as a [`ConfigError`] ready for [`render_errors`].
//!
//! ```no_run
//! let config = match plinth_config::load_and_validate() {
//!     Ok(config) => config,
//!     Err(errors) => {
//!         plinth_config::render_errors(&errors);
//!         std::process::exit(2);
//!     }
//! };
//! println!("plugins live in {}", config.plugins.plugins_dir);
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

use std::path::Path;

pub use diagnostic::{ConfigError, ConfigSource, render_errors, render_report};
pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::PlinthConfig;

/// Loads the layered hierarchy and validates the result.
pub fn load_and_validate() -> Result<PlinthConfig, Vec<ConfigError>> {
    checked(loader::load_config(), || {
        loader::hierarchy()
            .iter()
            .filter_map(|path| ConfigSource::read(path))
            .collect()
    })
}

/// Loads one file plus environment overrides and validates the result.
pub fn load_and_validate_path(path: &Path) -> Result<PlinthConfig, Vec<ConfigError>> {
    checked(loader::load_config_from_path(path), || {
        ConfigSource::read(path).into_iter().collect()
    })
}

/// Loads a TOML string and validates the result.
pub fn load_and_validate_str(toml: &str) -> Result<PlinthConfig, Vec<ConfigError>> {
    checked(loader::load_config_from_str(toml), || {
        vec![ConfigSource::inline(toml)]
    })
}

/// Sources are only read back when extraction failed.
fn checked(
    loaded: Result<PlinthConfig, figment::Error>,
    sources: impl FnOnce() -> Vec<ConfigSource>,
) -> Result<PlinthConfig, Vec<ConfigError>> {
    let config = loaded.map_err(|err| diagnostic::from_figment(err, &sources()))?;
    validation::validate_config(&config)?;
    Ok(config)
}
