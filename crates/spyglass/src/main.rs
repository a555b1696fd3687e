// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Spyglass - inspect, export and maintain captured log stores.
//!
//! This is the binary entry point for the `spyglass` tool.

mod archive;
mod info;
mod maintain;
mod query;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use spyglass_config::{ConfigError, SpyglassConfig};
use spyglass_core::types::AppInfo;
use spyglass_core::{SessionId, SpyglassError};
use spyglass_storage::{LogStore, StoreOptions};

/// Spyglass - inspect, export and maintain captured log stores.
#[derive(Parser, Debug)]
#[command(name = "spyglass", version, about, long_about = None)]
struct Cli {
    /// Configuration file. Defaults to the usual config locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store directory, overriding `store.path`.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Show store statistics.
    Info {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Write the store, or some of its sessions, to an archive.
    Export {
        /// Archive to create. Must not exist.
        output: PathBuf,
        /// Export only this session. Repeatable.
        #[arg(long = "session")]
        sessions: Vec<SessionId>,
    },
    /// Copy the sessions of an archive into the store.
    Import {
        /// Archive to read.
        archive: PathBuf,
    },
    /// Apply the retention policy now.
    Sweep,
    /// List recorded messages or network tasks.
    Query {
        #[command(subcommand)]
        target: query::Target,
    },
    /// Delete sessions and everything recorded in them.
    Remove {
        /// Session to delete. Repeatable.
        #[arg(long = "session", required_unless_present = "all")]
        sessions: Vec<SessionId>,
        /// Delete every record and body.
        #[arg(long, conflicts_with = "sessions")]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(errors) => {
            spyglass_config::render_errors(&errors);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.logging.log_level);

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("spyglass: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<SpyglassConfig, Vec<ConfigError>> {
    match path {
        Some(path) => spyglass_config::load_and_validate_path(path),
        None => spyglass_config::load_and_validate(),
    }
}

async fn run(cli: Cli, config: SpyglassConfig) -> Result<(), SpyglassError> {
    let dir = cli
        .store
        .unwrap_or_else(|| PathBuf::from(&config.store.path));
    tracing::debug!(store = %dir.display(), command = ?cli.command, "running");

    match cli.command {
        Commands::Info { json } => {
            let store = open(&dir, &config, Access::Read).await?;
            info::run_info(&store, json).await
        }
        Commands::Export { output, sessions } => {
            let store = open(&dir, &config, Access::Read).await?;
            archive::run_export(&store, &output, sessions).await
        }
        Commands::Import { archive } => {
            let store = open(&dir, &config, Access::Create).await?;
            let result = archive::run_import(&store, &archive).await;
            store.close().await?;
            result
        }
        Commands::Sweep => {
            let store = open(&dir, &config, Access::Write).await?;
            let result = maintain::run_sweep(&store).await;
            store.close().await?;
            result
        }
        Commands::Query { target } => {
            let store = open(&dir, &config, Access::Read).await?;
            query::run_query(&store, target).await
        }
        Commands::Remove { sessions, all } => {
            let store = open(&dir, &config, Access::Write).await?;
            let result = maintain::run_remove(&store, sessions, all).await;
            store.close().await?;
            result
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Access {
    Read,
    Write,
    Create,
}

async fn open(dir: &Path, config: &SpyglassConfig, access: Access) -> Result<LogStore, SpyglassError> {
    let options = match access {
        Access::Read => StoreOptions::read_only(),
        Access::Write | Access::Create => StoreOptions {
            create: matches!(access, Access::Create),
            sweep: false,
            read_only: false,
            app: AppInfo {
                name: Some("spyglass".to_string()),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
                build: None,
            },
        },
    };
    LogStore::open(dir, &config.store, options).await
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("spyglass={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
