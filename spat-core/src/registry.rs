// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Thread-safe per-process attach cache using DashMap.
//!
//! A process maps each database at most once. Attaching again bumps a
//! reference count and hands out the same [`Database`]; the mapping is
//! dropped when the last reference is detached.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::config::{Config, DatabaseConfig};
use crate::database::Database;
use crate::error::SpatResult;

static GLOBAL: Lazy<DatabaseRegistry> = Lazy::new(DatabaseRegistry::new);

/// Entry in the database registry.
#[derive(Debug)]
struct Attachment {
    database: Arc<Database>,
    refs: usize,
}

/// Registry of databases attached by this process.
#[derive(Debug, Default)]
pub struct DatabaseRegistry {
    /// Keyed by control object name, which covers namespace and name.
    attached: DashMap<String, Attachment>,
}

impl DatabaseRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            attached: DashMap::new(),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static DatabaseRegistry {
        &GLOBAL
    }

    /// Attach to a database, reusing this process's mapping if there is one.
    pub fn attach(&self, config: &Config) -> SpatResult<Arc<Database>> {
        let key = Self::key(&config.database);

        if let Some(mut attachment) = self.attached.get_mut(&key) {
            attachment.refs += 1;
            return Ok(Arc::clone(&attachment.database));
        }

        // Opening can wait on another process, so no shard lock is held here.
        // If another thread attached meanwhile, its mapping wins.
        let opened = Arc::new(Database::open(config)?);
        let mut attachment = self.attached.entry(key).or_insert_with(|| Attachment {
            database: opened,
            refs: 0,
        });
        attachment.refs += 1;
        Ok(Arc::clone(&attachment.database))
    }

    /// Drop one reference. Returns `false` if the database was not attached.
    pub fn detach(&self, database: &DatabaseConfig) -> bool {
        let key = Self::key(database);

        let Some(mut attachment) = self.attached.get_mut(&key) else {
            return false;
        };
        attachment.refs -= 1;
        let last = attachment.refs == 0;
        drop(attachment);

        if last {
            self.attached.remove_if(&key, |_, a| a.refs == 0);
            tracing::debug!(database = %database.name, "Released last attachment");
        }
        true
    }

    /// Current reference count, 0 when not attached.
    pub fn refs(&self, database: &DatabaseConfig) -> usize {
        self.attached
            .get(&Self::key(database))
            .map(|a| a.refs)
            .unwrap_or(0)
    }

    pub fn is_attached(&self, database: &DatabaseConfig) -> bool {
        self.attached.contains_key(&Self::key(database))
    }

    /// Get the number of attached databases.
    pub fn len(&self) -> usize {
        self.attached.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }

    fn key(database: &DatabaseConfig) -> String {
        database.namespace.control_object(&database.name)
    }
}

/// Attach through the process-wide registry.
pub fn attach(config: &Config) -> SpatResult<Arc<Database>> {
    DatabaseRegistry::global().attach(config)
}

/// Detach through the process-wide registry. A no-op if never attached.
pub fn detach(database: &DatabaseConfig) -> bool {
    DatabaseRegistry::global().detach(database)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SharedMemoryError, SpatError};
    use crate::shm::SharedMemoryRegion;
    use crate::types::{DbName, Namespace};
    use std::time::{Duration, Instant};

    fn test_config(tag: &str) -> Config {
        let mut config = Config::default();
        config.database.name = DbName::new(format!("reg-{}", tag)).unwrap();
        config.database.namespace =
            Namespace::new(format!("spat-reg-{}", std::process::id())).unwrap();
        config.arena.initial_segment_size = 128 * 1024;
        config.arena.max_total_size = 8 * 1024 * 1024;
        config
    }

    #[test]
    fn test_attach_is_reference_counted() {
        let registry = DatabaseRegistry::new();
        let config = test_config("refs");

        let a = registry.attach(&config).unwrap();
        let b = registry.attach(&config).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.refs(&config.database), 2);
        assert_eq!(registry.len(), 1);

        assert!(registry.detach(&config.database));
        assert!(registry.is_attached(&config.database));
        assert!(registry.detach(&config.database));
        assert!(!registry.is_attached(&config.database));
        assert!(registry.is_empty());

        a.unlink().unwrap();
    }

    #[test]
    fn test_concurrent_attach_shares_one_mapping() {
        let registry = DatabaseRegistry::new();
        let config = test_config("concurrent");

        let attached: Vec<Arc<Database>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| registry.attach(&config).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(registry.refs(&config.database), 4);
        let kept = registry.attach(&config).unwrap();
        assert!(attached.iter().all(|db| Arc::ptr_eq(db, &kept)));

        kept.unlink().unwrap();
    }

    #[test]
    fn test_slow_open_does_not_block_registry() {
        let registry = DatabaseRegistry::new();
        let stuck = test_config("stuck");
        let other = test_config("unblocked");

        // A control object whose creator never finishes initializing.
        let object = stuck.database.namespace.control_object(&stuck.database.name);
        let _ = SharedMemoryRegion::unlink(&object);
        let _control = SharedMemoryRegion::create(&object, 4096).unwrap();

        std::thread::scope(|s| {
            let waiting = s.spawn(|| registry.attach(&stuck));
            std::thread::sleep(Duration::from_millis(50));

            let started = Instant::now();
            assert_eq!(registry.refs(&stuck.database), 0);
            let db = registry.attach(&other).unwrap();
            assert!(started.elapsed() < Duration::from_secs(1));
            db.unlink().unwrap();

            assert!(matches!(
                waiting.join().unwrap(),
                Err(SpatError::SharedMemory(SharedMemoryError::InitTimeout { .. }))
            ));
        });

        assert!(!registry.is_attached(&stuck.database));
        SharedMemoryRegion::unlink(&object).unwrap();
    }

    #[test]
    fn test_detach_without_attach_is_noop() {
        let registry = DatabaseRegistry::new();
        let config = test_config("noop");
        assert!(!registry.detach(&config.database));
        assert_eq!(registry.refs(&config.database), 0);
    }

    #[test]
    fn test_global_registry() {
        let config = test_config("global");
        let db = attach(&config).unwrap();
        db.set(b"k", b"v", None).unwrap();
        assert_eq!(attach(&config).unwrap().get(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(detach(&config.database));
        assert!(detach(&config.database));
        assert!(!detach(&config.database));
        db.unlink().unwrap();
    }
}
