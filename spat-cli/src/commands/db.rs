// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Whole-database commands: sizing, key listing, flush, info and purge.

use clap::Subcommand;
use spat_core::{Config, ConfigLoader, Database};

use super::{print_integer, print_list, with_database, CommandResult};

#[derive(Subcommand)]
pub enum DbCommand {
    /// Number of live keys
    Dbsize,

    /// Shared memory reserved by the database, in bytes
    DbsizeBytes,

    /// List every live key
    Keys,

    /// Remove every key
    #[command(name = "flushdb")]
    Flush,

    /// Show database metadata as JSON
    Info,

    /// Remove the database's shared memory objects
    Purge,

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: String,
    },
}

pub fn execute(config: &Config, command: DbCommand) -> CommandResult {
    match command {
        DbCommand::Dbsize => {
            print_integer(with_database(config, |db| db.dbsize())?);
        }
        DbCommand::DbsizeBytes => {
            print_integer(with_database(config, |db| Ok(db.dbsize_bytes()))?);
        }
        DbCommand::Keys => {
            let mut keys = with_database(config, |db| db.keys())?;
            keys.sort();
            print_list(&keys);
        }
        DbCommand::Flush => {
            let removed = with_database(config, |db| db.flush())?;
            tracing::info!(database = %config.database.name, removed = removed, "Flushed");
            println!("OK");
        }
        DbCommand::Info => {
            let info = with_database(config, |db| db.info())?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        DbCommand::Purge => purge(config)?,
        DbCommand::Validate { file } => validate(&file)?,
    }
    Ok(())
}

fn purge(config: &Config) -> CommandResult {
    if Database::purge(&config.database)? {
        tracing::info!(database = %config.database.name, "Purged database");
        println!("OK");
    } else {
        println!(
            "No database named '{}' in namespace '{}'",
            config.database.name, config.database.namespace
        );
    }
    Ok(())
}

pub fn validate(file: &str) -> CommandResult {
    tracing::info!(file = %file, "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Database:");
            println!("  Name:                 {}", config.database.name);
            println!("  Namespace:            {}", config.database.namespace);
            println!("Arena:");
            println!(
                "  Initial Segment Size: {} bytes",
                config.arena.initial_segment_size
            );
            println!(
                "  Max Total Size:       {} bytes",
                config.arena.max_total_size
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
