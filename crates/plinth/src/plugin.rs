// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `plinth plugin …` subcommands.
//!
//! Each command runs the lifecycle manager against the configured store and
//! plugin directory. A running server picks up activation changes on its
//! next auto-sync pass.

use std::path::PathBuf;

use clap::Subcommand;
use serde::Serialize;
use serde_json::Value;

use plinth_config::PlinthConfig;
use plinth_core::PlinthError;
use plinth_core::types::{Pagination, RecordFilter};
use plinth_plugin::{InstallOptions, UninstallOptions};

use crate::serve::build_host;

/// Actor recorded for operations run from the command line.
const CLI_ACTOR: &str = "cli";

#[derive(Subcommand, Debug)]
pub enum PluginCommand {
    /// Validate a package archive without installing it.
    Validate { archive: PathBuf },
    /// Install a package archive.
    Install {
        archive: PathBuf,
        /// Replace an installed plugin with the same id.
        #[arg(long)]
        overwrite: bool,
        /// Activate after installing.
        #[arg(long)]
        activate: bool,
        /// Skip manifest validation and the high-risk gate.
        #[arg(long)]
        skip_validation: bool,
        /// Back up the installed version before overwriting it.
        #[arg(long)]
        backup: bool,
    },
    /// List installed plugins.
    List {
        /// Only plugins flagged active.
        #[arg(long)]
        active: bool,
    },
    /// Activate an installed plugin.
    Activate { id: String },
    /// Deactivate a plugin.
    Deactivate { id: String },
    /// Merge a JSON object into a plugin's configuration.
    Configure { id: String, json: String },
    /// Uninstall an inactive plugin.
    Uninstall {
        id: String,
        /// Keep a final snapshot and all earlier backups.
        #[arg(long)]
        backup: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<(), PlinthError> {
    let rendered =
        serde_json::to_string_pretty(value).map_err(|e| PlinthError::Internal(e.to_string()))?;
    println!("{rendered}");
    Ok(())
}

pub async fn run(config: PlinthConfig, command: PluginCommand) -> Result<(), PlinthError> {
    let host = build_host(config).await?;
    let lifecycle = host.lifecycle();

    match command {
        PluginCommand::Validate { archive } => {
            let report = lifecycle.validate(&archive).await?;
            print_json(&report)?;
            if !report.is_valid {
                return Err(PlinthError::Validation {
                    errors: report.errors,
                });
            }
        }
        PluginCommand::Install {
            archive,
            overwrite,
            activate,
            skip_validation,
            backup,
        } => {
            let options = InstallOptions {
                overwrite,
                activate,
                skip_validation,
                backup,
            };
            let outcome = lifecycle.install(&archive, CLI_ACTOR, options).await?;
            for warning in &outcome.warnings {
                eprintln!("warning: {warning}");
            }
            if let Some(error) = &outcome.activation_error {
                eprintln!("activation failed: {error}");
            }
            println!(
                "installed {} {}",
                outcome.record.plugin_id, outcome.record.version
            );
        }
        PluginCommand::List { active } => {
            let filter = RecordFilter {
                is_active: active.then_some(true),
                ..RecordFilter::default()
            };
            let page = lifecycle
                .list(
                    &filter,
                    Pagination {
                        offset: 0,
                        limit: usize::MAX,
                    },
                )
                .await?;
            for info in &page.items {
                println!(
                    "{:<32} {:<12} {}",
                    info.record.plugin_id, info.record.version, info.state
                );
            }
        }
        PluginCommand::Activate { id } => {
            lifecycle.activate(&id, CLI_ACTOR).await?;
            println!("activated {id}");
        }
        PluginCommand::Deactivate { id } => {
            lifecycle.deactivate(&id, CLI_ACTOR).await?;
            println!("deactivated {id}");
        }
        PluginCommand::Configure { id, json } => {
            let patch: Value = serde_json::from_str(&json)
                .map_err(|e| PlinthError::validation(format!("invalid JSON: {e}")))?;
            let merged = lifecycle.configure(&id, patch, CLI_ACTOR).await?;
            print_json(&merged)?;
        }
        PluginCommand::Uninstall { id, backup } => {
            lifecycle
                .uninstall(&id, CLI_ACTOR, UninstallOptions { backup })
                .await?;
            println!("uninstalled {id}");
        }
    }

    host.shutdown().await;
    Ok(())
}
