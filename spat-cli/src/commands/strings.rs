// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! String and keyspace commands: `set`, `get`, `del`, `type` and expiry.

use std::time::Duration;

use clap::Subcommand;
use spat_core::Config;

use super::{print_bool, print_bytes, print_optional, with_database, CommandResult};

#[derive(Subcommand)]
pub enum StringCommand {
    /// Store a string value
    Set {
        key: String,
        value: String,

        /// Expire the key after this many milliseconds
        #[arg(long = "px", value_name = "MILLIS")]
        ttl_ms: Option<u64>,
    },

    /// Read a string value
    Get { key: String },

    /// Delete keys of any type
    #[command(name = "del")]
    Del {
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Show the type of the value stored at a key
    #[command(name = "type")]
    Type { key: String },

    /// Show when a key expires
    #[command(name = "expireat")]
    ExpireAt { key: String },

    /// Give a key a time to live in milliseconds
    #[command(name = "pexpire")]
    Expire { key: String, millis: u64 },

    /// Remove the expiry of a key
    Persist { key: String },

    /// Show the remaining time to live of a key
    #[command(name = "pttl")]
    Ttl { key: String },
}

pub fn execute(config: &Config, command: StringCommand) -> CommandResult {
    match command {
        StringCommand::Set { key, value, ttl_ms } => {
            let ttl = ttl_ms.map(Duration::from_millis);
            let stored = with_database(config, |db| db.set(key.as_bytes(), value.as_bytes(), ttl))?;
            print_bytes(&stored);
        }
        StringCommand::Get { key } => {
            print_optional(with_database(config, |db| db.get(key.as_bytes()))?);
        }
        StringCommand::Del { keys } => {
            let removed = with_database(config, |db| {
                let mut removed = 0;
                for key in &keys {
                    if db.del(key.as_bytes())? {
                        removed += 1;
                    }
                }
                Ok(removed)
            })?;
            super::print_integer(removed);
        }
        StringCommand::Type { key } => {
            let tag = with_database(config, |db| db.type_of(key.as_bytes()))?;
            println!("{}", tag);
        }
        StringCommand::ExpireAt { key } => {
            match with_database(config, |db| db.expire_at(key.as_bytes()))? {
                Some(at) => println!("{}", at),
                None => println!("(nil)"),
            }
        }
        StringCommand::Expire { key, millis } => {
            with_database(config, |db| {
                db.expire(key.as_bytes(), Duration::from_millis(millis))
            })?;
            println!("OK");
        }
        StringCommand::Persist { key } => {
            print_bool(with_database(config, |db| db.persist(key.as_bytes()))?);
        }
        StringCommand::Ttl { key } => {
            match with_database(config, |db| db.ttl(key.as_bytes()))? {
                Some(left) => println!("(integer) {}", left.as_millis()),
                None => println!("(nil)"),
            }
        }
    }
    Ok(())
}
