// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Spat Core Library
//!
//! Redis-like key-value engine living entirely in POSIX shared memory.
//! Independent processes attach to the same named database and work on the
//! same strings, sets, lists and hashes concurrently. Provides the arena
//! allocator, shared strings, the partition-locked hash directory, composite
//! values, named databases and a per-process attach registry.

pub mod arena;
pub mod composite;
pub mod config;
pub mod database;
pub mod directory;
pub mod dss;
pub mod entry;
pub mod error;
pub mod hash;
pub mod registry;
pub mod shm;
pub mod types;

// Re-export commonly used types
pub use arena::{Arena, ArenaHandle, ArenaPtr, ArenaStats};
pub use config::{ArenaConfig, Config, ConfigLoader, DatabaseConfig};
pub use database::{Database, DatabaseInfo};
pub use directory::{Directory, DirectoryHandle, DirectoryParams};
pub use dss::{Dss, MAX_VALUE_LEN};
pub use entry::{Entry, Value, ValueTag};
pub use error::{HardValidationError, SharedMemoryError, SpatError, SpatResult};
pub use registry::{attach, detach, DatabaseRegistry};
pub use types::{DbName, Expiry, Namespace, Timestamp, DEFAULT_DB_NAME};
