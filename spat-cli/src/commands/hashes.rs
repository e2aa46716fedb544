// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Hash commands.

use clap::Subcommand;
use spat_core::Config;

use super::{print_bool, print_bytes, print_integer, print_optional, with_database, CommandResult};

#[derive(Subcommand)]
pub enum HashCommand {
    /// Set a field of a hash
    Hset {
        key: String,
        field: String,
        value: String,
    },

    /// Read a field of a hash
    Hget { key: String, field: String },

    /// Delete a field of a hash
    Hdel { key: String, field: String },

    /// Number of fields in a hash
    Hlen { key: String },
}

pub fn execute(config: &Config, command: HashCommand) -> CommandResult {
    match command {
        HashCommand::Hset { key, field, value } => {
            let stored = with_database(config, |db| {
                db.hset(key.as_bytes(), field.as_bytes(), value.as_bytes())
            })?;
            print_bytes(&stored);
        }
        HashCommand::Hget { key, field } => {
            print_optional(with_database(config, |db| {
                db.hget(key.as_bytes(), field.as_bytes())
            })?);
        }
        HashCommand::Hdel { key, field } => {
            print_bool(with_database(config, |db| {
                db.hdel(key.as_bytes(), field.as_bytes())
            })?);
        }
        HashCommand::Hlen { key } => {
            print_integer(with_database(config, |db| db.hlen(key.as_bytes()))?);
        }
    }
    Ok(())
}
