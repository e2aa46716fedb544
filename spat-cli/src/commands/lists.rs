// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! List commands.

use clap::Subcommand;
use spat_core::Config;

use super::{print_integer, print_optional, with_database, CommandResult};

#[derive(Subcommand)]
pub enum ListCommand {
    /// Prepend values to a list, printing the new length
    Lpush {
        key: String,
        #[arg(required = true)]
        values: Vec<String>,
    },

    /// Append values to a list, printing the new length
    Rpush {
        key: String,
        #[arg(required = true)]
        values: Vec<String>,
    },

    /// Remove and print the first element
    Lpop { key: String },

    /// Remove and print the last element
    Rpop { key: String },

    /// Length of a list
    Llen { key: String },
}

pub fn execute(config: &Config, command: ListCommand) -> CommandResult {
    match command {
        ListCommand::Lpush { key, values } => {
            let len = with_database(config, |db| {
                let mut len = 0;
                for value in &values {
                    len = db.lpush(key.as_bytes(), value.as_bytes())?;
                }
                Ok(len)
            })?;
            print_integer(len);
        }
        ListCommand::Rpush { key, values } => {
            let len = with_database(config, |db| {
                let mut len = 0;
                for value in &values {
                    len = db.rpush(key.as_bytes(), value.as_bytes())?;
                }
                Ok(len)
            })?;
            print_integer(len);
        }
        ListCommand::Lpop { key } => {
            print_optional(with_database(config, |db| db.lpop(key.as_bytes()))?);
        }
        ListCommand::Rpop { key } => {
            print_optional(with_database(config, |db| db.rpop(key.as_bytes()))?);
        }
        ListCommand::Llen { key } => {
            print_integer(with_database(config, |db| db.llen(key.as_bytes()))?);
        }
    }
    Ok(())
}
