// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plinth - a plugin host for web applications.
//!
//! This is the binary entry point: `plinth serve` runs the HTTP gateway,
//! `plinth plugin …` administers installed plugins against the same store.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod plugin;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Plinth - a plugin host for web applications.
#[derive(Parser, Debug)]
#[command(name = "plinth", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the default locations.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the plugin host and HTTP gateway.
    Serve,
    /// Manage installed plugins.
    Plugin {
        #[command(subcommand)]
        command: plugin::PluginCommand,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match cli.config.as_deref() {
        Some(path) => plinth_config::load_and_validate_path(path),
        None => plinth_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            plinth_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    serve::init_tracing(&config.logging.level);

    let result = match cli.command {
        Commands::Serve => serve::run_serve(config).await,
        Commands::Plugin { command } => plugin::run(config, command).await,
    };
    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        eprintln!("plinth: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_install_flags() {
        let cli = Cli::parse_from([
            "plinth",
            "--config",
            "/tmp/plinth.toml",
            "plugin",
            "install",
            "hello.tar.gz",
            "--activate",
            "--backup",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/plinth.toml")));
        match cli.command {
            Commands::Plugin {
                command:
                    plugin::PluginCommand::Install {
                        archive,
                        activate,
                        backup,
                        overwrite,
                        skip_validation,
                    },
            } => {
                assert_eq!(archive, PathBuf::from("hello.tar.gz"));
                assert!(activate && backup);
                assert!(!overwrite && !skip_validation);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn binary_loads_config_defaults() {
        let config = plinth_config::load_and_validate_str("")
            .expect("default config should be valid");
        assert_eq!(config.server.route_prefix, "/api/plugins");
    }
}
