// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules.

pub mod db;
pub mod hashes;
pub mod lists;
pub mod sets;
pub mod strings;

use spat_core::{Config, Database, SpatResult};

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Attach through the process registry, run `op`, then detach.
pub fn with_database<T>(
    config: &Config,
    op: impl FnOnce(&Database) -> SpatResult<T>,
) -> Result<T, Box<dyn std::error::Error>> {
    let db = spat_core::attach(config)?;
    let result = op(&db);
    drop(db);
    spat_core::detach(&config.database);
    Ok(result?)
}

/// Print a stored byte string, lossily decoded.
pub fn print_bytes(bytes: &[u8]) {
    println!("\"{}\"", String::from_utf8_lossy(bytes));
}

pub fn print_optional(value: Option<Vec<u8>>) {
    match value {
        Some(bytes) => print_bytes(&bytes),
        None => println!("(nil)"),
    }
}

pub fn print_list(items: &[Vec<u8>]) {
    if items.is_empty() {
        println!("(empty)");
        return;
    }
    for (i, item) in items.iter().enumerate() {
        println!("{}) \"{}\"", i + 1, String::from_utf8_lossy(item));
    }
}

pub fn print_bool(value: bool) {
    println!("(integer) {}", u8::from(value));
}

pub fn print_integer(value: u64) {
    println!("(integer) {}", value);
}
