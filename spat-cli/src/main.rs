// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Spat CLI
//!
//! Command-line interface for spat shared-memory databases. Every invocation
//! is an independent process that attaches to the database by name.

use std::path::Path;

use clap::{Parser, Subcommand};
use spat_core::{Config, ConfigLoader, DbName, Namespace};

mod commands;

use commands::db::DbCommand;
use commands::hashes::HashCommand;
use commands::lists::ListCommand;
use commands::sets::SetCommand;
use commands::strings::StringCommand;

/// Configuration file picked up from the working directory when present.
const DEFAULT_CONFIG_FILE: &str = "spat.yaml";

/// Spat - Redis-like key-value store in shared memory
#[derive(Parser)]
#[command(name = "spat")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (defaults to ./spat.yaml if it exists)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Database name, overrides the configuration file
    #[arg(long, global = true)]
    pub db: Option<String>,

    /// Shared memory namespace, overrides the configuration file
    #[arg(long, global = true)]
    pub namespace: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(flatten)]
    Strings(StringCommand),

    #[command(flatten)]
    Sets(SetCommand),

    #[command(flatten)]
    Lists(ListCommand),

    #[command(flatten)]
    Hashes(HashCommand),

    #[command(flatten)]
    Db(DbCommand),
}

fn resolve_config(cli: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_file(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            ConfigLoader::load_file(DEFAULT_CONFIG_FILE)?
        }
        None => Config::default(),
    };

    if let Some(name) = &cli.db {
        config.database.name = DbName::new(name.as_str())?;
    }
    if let Some(namespace) = &cli.namespace {
        config.database.namespace = Namespace::new(namespace.as_str())?;
    }
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .init();

    // `validate` must not fall back to defaults when the file is broken.
    if let Commands::Db(DbCommand::Validate { file }) = &cli.command {
        return commands::db::validate(file);
    }

    let config = resolve_config(&cli)?;
    tracing::debug!(
        database = %config.database.name,
        namespace = %config.database.namespace,
        "Resolved configuration"
    );

    // Dispatch to command handlers
    match cli.command {
        Commands::Strings(command) => commands::strings::execute(&config, command),
        Commands::Sets(command) => commands::sets::execute(&config, command),
        Commands::Lists(command) => commands::lists::execute(&config, command),
        Commands::Hashes(command) => commands::hashes::execute(&config, command),
        Commands::Db(command) => commands::db::execute(&config, command),
    }
}
