// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Set commands.

use clap::Subcommand;
use spat_core::Config;

use super::{print_bool, print_integer, print_list, with_database, CommandResult};

#[derive(Subcommand)]
pub enum SetCommand {
    /// Add members to a set, printing how many were new
    Sadd {
        key: String,
        #[arg(required = true)]
        members: Vec<String>,
    },

    /// Check set membership
    Sismember { key: String, member: String },

    /// Remove members from a set, printing how many were present
    Srem {
        key: String,
        #[arg(required = true)]
        members: Vec<String>,
    },

    /// Number of members in a set
    Scard { key: String },

    /// List the members of a set
    Smembers { key: String },
}

pub fn execute(config: &Config, command: SetCommand) -> CommandResult {
    match command {
        SetCommand::Sadd { key, members } => {
            let added = with_database(config, |db| {
                let mut added = 0;
                for member in &members {
                    if db.sadd(key.as_bytes(), member.as_bytes())? {
                        added += 1;
                    }
                }
                Ok(added)
            })?;
            print_integer(added);
        }
        SetCommand::Sismember { key, member } => {
            print_bool(with_database(config, |db| {
                db.sismember(key.as_bytes(), member.as_bytes())
            })?);
        }
        SetCommand::Srem { key, members } => {
            let removed = with_database(config, |db| {
                let mut removed = 0;
                for member in &members {
                    if db.srem(key.as_bytes(), member.as_bytes())? {
                        removed += 1;
                    }
                }
                Ok(removed)
            })?;
            print_integer(removed);
        }
        SetCommand::Scard { key } => {
            print_integer(with_database(config, |db| db.scard(key.as_bytes()))?);
        }
        SetCommand::Smembers { key } => {
            let mut members = with_database(config, |db| db.smembers(key.as_bytes()))?;
            members.sort();
            print_list(&members);
        }
    }
    Ok(())
}
