// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Named databases and their command surface.
//!
//! A database is discovered by name through a small control object
//! (`{namespace}.db.{name}`) that records the arena handle and the root
//! directory. Whichever process creates that object first initializes the
//! storage; every other process opens it and waits for the `READY` state.
//!
//! Commands lock exactly one root entry for their duration. Composite
//! commands additionally lock inside the nested directory while the root
//! entry is held, which is the only lock nesting in the engine.

use std::cell::UnsafeCell;
use std::mem::size_of;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::arena::{Arena, ArenaHandle, ArenaPtr};
use crate::composite::{Composite, HashHeader, ListHeader, SetHeader};
use crate::config::{ArenaConfig, Config, DatabaseConfig};
use crate::directory::{Directory, DirectoryHandle};
use crate::dss::Dss;
use crate::entry::{RootParams, Value, ValueTag};
use crate::error::{SharedMemoryError, SpatError, SpatResult};
use crate::shm::{SharedMemoryRegion, ShmRwLock};
use crate::types::{DbName, Expiry, Namespace, Timestamp, MAX_DB_NAME_LEN};

const DB_MAGIC: u64 = 0x5350_4154_4442_3031; // "SPATDB01"

const STATE_READY: u32 = 1;
const STATE_FAILED: u32 = 2;

/// How long a joining process waits for the creator to publish `READY`.
const READY_WAIT: Duration = Duration::from_secs(5);
const READY_POLL: Duration = Duration::from_millis(1);

const CONTROL_SIZE: usize = 4096;
const NAME_CAPACITY: usize = 64;

/// Fields written once by the initializer, read under the metadata lock.
#[repr(C)]
#[derive(Clone, Copy)]
struct DatabaseMeta {
    name: [u8; NAME_CAPACITY],
    name_len: u32,
    created_at: Timestamp,
    arena_handle: u64,
    root_handle: ArenaPtr,
}

#[repr(C)]
struct DatabaseControl {
    magic: AtomicU64,
    state: AtomicU32,
    metadata: ShmRwLock,
    meta: UnsafeCell<DatabaseMeta>,
}

const _: () = assert!(size_of::<DatabaseControl>() <= CONTROL_SIZE);
const _: () = assert!(MAX_DB_NAME_LEN < NAME_CAPACITY);

/// Summary reported by `info`.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub namespace: String,
    pub created_at: Timestamp,
    pub keys: u64,
    pub buckets: usize,
    pub arena_handle: String,
    pub arena_segments: usize,
    pub arena_total_bytes: u64,
    pub arena_allocated_bytes: u64,
}

/// A process-local attachment to a named database.
pub struct Database {
    name: DbName,
    namespace: Namespace,
    control_object: String,
    control_region: SharedMemoryRegion,
    arena: Arena,
    root: DirectoryHandle,
}

impl Database {
    /// Attach to the database named in `config`, creating it if needed.
    ///
    /// This always maps the database afresh; use the registry to share one
    /// attachment per process.
    pub fn open(config: &Config) -> SpatResult<Self> {
        let DatabaseConfig { name, namespace } = &config.database;
        let object = namespace.control_object(name);

        match SharedMemoryRegion::create(&object, CONTROL_SIZE) {
            Ok(region) => Self::initialize(region, object, &config.database, &config.arena),
            Err(SharedMemoryError::AlreadyExists { .. }) => {
                Self::join(object, &config.database)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn control_of(region: &SharedMemoryRegion) -> &DatabaseControl {
        // SAFETY: the region is CONTROL_SIZE bytes, enough for the control
        // block, and page-aligned.
        unsafe { &*(region.as_ptr() as *const DatabaseControl) }
    }

    fn initialize(
        region: SharedMemoryRegion,
        object: String,
        database: &DatabaseConfig,
        arena_config: &ArenaConfig,
    ) -> SpatResult<Self> {
        let control = Self::control_of(&region);

        let (arena, root) = match Self::build_storage(&database.namespace, arena_config) {
            Ok(storage) => storage,
            Err(e) => {
                control.state.store(STATE_FAILED, Ordering::Release);
                SharedMemoryRegion::unlink(&object)?;
                return Err(e);
            }
        };

        let created_at = Timestamp::now();
        let mut name = [0u8; NAME_CAPACITY];
        let bytes = database.name.as_str().as_bytes();
        name[..bytes.len()].copy_from_slice(bytes);

        {
            let _guard = control.metadata.write();
            // SAFETY: exclusive metadata lock; nobody reads before READY.
            unsafe {
                *control.meta.get() = DatabaseMeta {
                    name,
                    name_len: bytes.len() as u32,
                    created_at,
                    arena_handle: arena.handle().as_u64(),
                    root_handle: root.as_ptr(),
                };
            }
            control.magic.store(DB_MAGIC, Ordering::Relaxed);
        }
        control.state.store(STATE_READY, Ordering::Release);

        tracing::debug!(
            database = %database.name,
            arena = %arena.handle(),
            "Created database"
        );

        Ok(Self {
            name: database.name.clone(),
            namespace: database.namespace.clone(),
            control_object: object,
            control_region: region,
            arena,
            root,
        })
    }

    fn build_storage(
        namespace: &Namespace,
        arena_config: &ArenaConfig,
    ) -> SpatResult<(Arena, DirectoryHandle)> {
        let arena = Arena::create(namespace, arena_config)?;
        let root = match Directory::<RootParams>::create(&arena) {
            Ok(dir) => dir.handle(),
            Err(e) => {
                arena.unlink_segments()?;
                return Err(e);
            }
        };
        Ok((arena, root))
    }

    fn join(object: String, database: &DatabaseConfig) -> SpatResult<Self> {
        let region = SharedMemoryRegion::open(&object, CONTROL_SIZE)?;
        let control = Self::control_of(&region);

        let started = Instant::now();
        loop {
            match control.state.load(Ordering::Acquire) {
                STATE_READY => break,
                STATE_FAILED => {
                    return Err(SharedMemoryError::OpenFailed {
                        name: object,
                        reason: "creator failed to initialize the database".to_string(),
                    }
                    .into())
                }
                _ if started.elapsed() >= READY_WAIT => {
                    return Err(SharedMemoryError::InitTimeout { name: object }.into())
                }
                _ => std::thread::sleep(READY_POLL),
            }
        }

        let meta = Self::read_meta(control)?;
        let stored = &meta.name[..(meta.name_len as usize).min(NAME_CAPACITY)];
        if stored != database.name.as_str().as_bytes() {
            return Err(SpatError::invariant(format!(
                "control object {} names database '{}'",
                object,
                String::from_utf8_lossy(stored)
            )));
        }

        let arena = Arena::attach(
            &database.namespace,
            ArenaHandle::from_raw(meta.arena_handle),
        )?;
        let root = DirectoryHandle::from_ptr(meta.root_handle);
        Directory::<RootParams>::attach(&arena, root)?;

        tracing::debug!(database = %database.name, "Attached database");

        Ok(Self {
            name: database.name.clone(),
            namespace: database.namespace.clone(),
            control_object: object,
            control_region: region,
            arena,
            root,
        })
    }

    fn read_meta(control: &DatabaseControl) -> SpatResult<DatabaseMeta> {
        let _guard = control.metadata.read();
        if control.magic.load(Ordering::Relaxed) != DB_MAGIC {
            return Err(SpatError::invariant("database control block has a bad magic"));
        }
        // SAFETY: shared metadata lock; the fields are plain data.
        Ok(unsafe { *control.meta.get() })
    }

    fn control(&self) -> &DatabaseControl {
        Self::control_of(&self.control_region)
    }

    fn root(&self) -> SpatResult<Directory<'_, RootParams>> {
        Directory::attach(&self.arena, self.root)
    }

    pub fn name(&self) -> &DbName {
        &self.name
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Creation time recorded by the initializing process.
    pub fn created_at(&self) -> SpatResult<Timestamp> {
        Ok(Self::read_meta(self.control())?.created_at)
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn info(&self) -> SpatResult<DatabaseInfo> {
        let stats = self.arena.stats();
        Ok(DatabaseInfo {
            name: self.name.to_string(),
            namespace: self.namespace.to_string(),
            created_at: self.created_at()?,
            keys: self.dbsize()?,
            buckets: self.root()?.bucket_count(),
            arena_handle: self.arena.handle().to_string(),
            arena_segments: stats.segments,
            arena_total_bytes: stats.total_bytes,
            arena_allocated_bytes: stats.allocated_bytes,
        })
    }

    /// Remove the database's shared memory objects by name.
    ///
    /// Processes that are still attached keep working on their mappings;
    /// the next `open` creates a fresh, empty database.
    pub fn unlink(&self) -> SpatResult<()> {
        let segments = self.arena.unlink_segments()?;
        SharedMemoryRegion::unlink(&self.control_object)?;
        tracing::debug!(
            database = %self.name,
            segments = segments,
            "Unlinked database"
        );
        Ok(())
    }

    /// Unlink the named database without creating it if it is absent.
    ///
    /// Returns `false` if no control object existed.
    pub fn purge(database: &DatabaseConfig) -> SpatResult<bool> {
        let object = database.namespace.control_object(&database.name);
        let region = match SharedMemoryRegion::open(&object, CONTROL_SIZE) {
            Ok(region) => region,
            Err(SharedMemoryError::OpenFailed { .. }) => {
                return Ok(SharedMemoryRegion::unlink(&object)?)
            }
            Err(e) => return Err(e.into()),
        };

        let control = Self::control_of(&region);
        if control.state.load(Ordering::Acquire) == STATE_READY {
            let meta = Self::read_meta(control)?;
            let arena = Arena::attach(
                &database.namespace,
                ArenaHandle::from_raw(meta.arena_handle),
            )?;
            arena.unlink_segments()?;
        }
        SharedMemoryRegion::unlink(&object)?;

        tracing::debug!(database = %database.name, "Purged database");
        Ok(true)
    }

    // =========================================================================
    // Keyspace
    // =========================================================================

    /// SET: store a string, replacing any string already there.
    ///
    /// Returns the stored value. A composite key is a type mismatch.
    pub fn set(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> SpatResult<Vec<u8>> {
        let arena = &self.arena;
        let root = self.root()?;

        let data = Dss::from_bytes(arena, value)?;
        let (mut entry, found) = match root.find_or_insert(key) {
            Ok(res) => res,
            Err(e) => {
                data.free(arena)?;
                return Err(e);
            }
        };

        if let Err(e) = entry.prepare_write(arena, key, ValueTag::String, Timestamp::now()) {
            data.free(arena)?;
            if !found {
                entry.delete()?;
            }
            return Err(e);
        }

        let old = std::mem::replace(&mut entry.value, Value::String(data));
        entry.expire_at = Expiry::from_ttl(ttl);
        old.teardown(arena)?;
        Ok(value.to_vec())
    }

    /// GET: the string stored at `key`.
    pub fn get(&self, key: &[u8]) -> SpatResult<Option<Vec<u8>>> {
        let root = self.root()?;
        let Some(entry) = root.find_shared(key)? else {
            return Ok(None);
        };
        entry.check()?;
        if entry.is_expired(Timestamp::now()) {
            return Ok(None);
        }
        match entry.value {
            Value::String(data) => Ok(Some(data.to_local(&self.arena)?)),
            Value::Null => Ok(None),
            other => Err(SpatError::type_mismatch(
                key,
                ValueTag::String.name(),
                other.tag().name(),
            )),
        }
    }

    /// DEL: remove `key` of any type, freeing everything it owns.
    ///
    /// An expired key is reclaimed but reported as not deleted.
    pub fn del(&self, key: &[u8]) -> SpatResult<bool> {
        let root = self.root()?;
        let Some(entry) = root.find_exclusive(key)? else {
            return Ok(false);
        };
        let live = !entry.is_expired(Timestamp::now());
        entry.delete()?;
        Ok(live)
    }

    /// TYPE: the kind of value at `key`, `Null` when absent.
    pub fn type_of(&self, key: &[u8]) -> SpatResult<ValueTag> {
        let root = self.root()?;
        match root.find_shared(key)? {
            Some(entry) => {
                entry.check()?;
                Ok(entry.visible_tag(Timestamp::now()))
            }
            None => Ok(ValueTag::Null),
        }
    }

    /// EXPIREAT: when `key` expires, `None` if never or absent.
    pub fn expire_at(&self, key: &[u8]) -> SpatResult<Option<Timestamp>> {
        let root = self.root()?;
        let Some(entry) = root.find_shared(key)? else {
            return Ok(None);
        };
        if entry.is_expired(Timestamp::now()) {
            return Ok(None);
        }
        Ok(entry.expire_at.timestamp())
    }

    /// EXPIRE: give an existing key a time to live.
    pub fn expire(&self, key: &[u8], ttl: Duration) -> SpatResult<()> {
        let root = self.root()?;
        let now = Timestamp::now();
        match root.find_exclusive(key)? {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expire_at = Expiry::At(now.after(ttl));
                Ok(())
            }
            _ => Err(SpatError::KeyNotFound {
                key: String::from_utf8_lossy(key).into_owned(),
            }),
        }
    }

    /// PERSIST: drop the expiry of `key`. Returns `true` if one was removed.
    pub fn persist(&self, key: &[u8]) -> SpatResult<bool> {
        let root = self.root()?;
        let now = Timestamp::now();
        match root.find_exclusive(key)? {
            Some(mut entry) if !entry.is_expired(now) => {
                let had_expiry = entry.expire_at != Expiry::Never;
                entry.expire_at = Expiry::Never;
                Ok(had_expiry)
            }
            _ => Ok(false),
        }
    }

    /// TTL: time left before `key` expires.
    pub fn ttl(&self, key: &[u8]) -> SpatResult<Option<Duration>> {
        let now = Timestamp::now();
        Ok(self
            .expire_at(key)?
            .and_then(|at| at.remaining_from(now)))
    }

    /// DBSIZE: number of live keys, counted by a full scan.
    pub fn dbsize(&self) -> SpatResult<u64> {
        let root = self.root()?;
        let now = Timestamp::now();
        let mut scan = root.seq_scan_shared()?;
        let mut count = 0;
        while let Some(entry) = scan.next()? {
            if !entry.is_expired(now) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// DBSIZE_BYTES: shared memory reserved by the arena.
    pub fn dbsize_bytes(&self) -> u64 {
        self.arena.total_bytes()
    }

    /// KEYS: every live key.
    pub fn keys(&self) -> SpatResult<Vec<Vec<u8>>> {
        let root = self.root()?;
        let now = Timestamp::now();
        let mut scan = root.seq_scan_shared()?;
        let mut keys = Vec::new();
        while let Some(entry) = scan.next()? {
            if !entry.is_expired(now) {
                keys.push(entry.key.to_local(&self.arena)?);
            }
        }
        Ok(keys)
    }

    /// FLUSHDB: remove every key. Returns how many entries were freed.
    pub fn flush(&self) -> SpatResult<u64> {
        let root = self.root()?;
        let mut scan = root.seq_scan_exclusive()?;
        let mut removed = 0;
        while scan.next()?.is_some() {
            scan.delete_current()?;
            removed += 1;
        }
        drop(scan);

        tracing::debug!(database = %self.name, removed = removed, "Flushed database");
        Ok(removed)
    }

    // =========================================================================
    // Sets
    // =========================================================================

    /// SADD: returns `true` if `member` was new.
    pub fn sadd(&self, key: &[u8], member: &[u8]) -> SpatResult<bool> {
        self.update::<SetHeader, _>(key, |arena, set| set.add(arena, member))
    }

    /// SISMEMBER
    pub fn sismember(&self, key: &[u8], member: &[u8]) -> SpatResult<bool> {
        Ok(self
            .read::<SetHeader, _>(key, |arena, set| set.contains(arena, member))?
            .unwrap_or(false))
    }

    /// SREM: returns `true` if `member` was present.
    pub fn srem(&self, key: &[u8], member: &[u8]) -> SpatResult<bool> {
        Ok(self
            .modify::<SetHeader, _>(key, |arena, set| set.remove(arena, member))?
            .unwrap_or(false))
    }

    /// SCARD
    pub fn scard(&self, key: &[u8]) -> SpatResult<u64> {
        Ok(self
            .read::<SetHeader, _>(key, |_, set| Ok(set.len()))?
            .unwrap_or(0))
    }

    /// SMEMBERS
    pub fn smembers(&self, key: &[u8]) -> SpatResult<Vec<Vec<u8>>> {
        Ok(self
            .read::<SetHeader, _>(key, |arena, set| set.members(arena))?
            .unwrap_or_default())
    }

    // =========================================================================
    // Lists
    // =========================================================================

    /// LPUSH: returns the new length.
    pub fn lpush(&self, key: &[u8], value: &[u8]) -> SpatResult<u64> {
        self.update::<ListHeader, _>(key, |arena, list| list.push_front(arena, value))
    }

    /// RPUSH: returns the new length.
    pub fn rpush(&self, key: &[u8], value: &[u8]) -> SpatResult<u64> {
        self.update::<ListHeader, _>(key, |arena, list| list.push_back(arena, value))
    }

    /// LPOP: `None` when the list is empty or absent.
    pub fn lpop(&self, key: &[u8]) -> SpatResult<Option<Vec<u8>>> {
        Ok(self
            .modify::<ListHeader, _>(key, |arena, list| list.pop_front(arena))?
            .flatten())
    }

    /// RPOP: `None` when the list is empty or absent.
    pub fn rpop(&self, key: &[u8]) -> SpatResult<Option<Vec<u8>>> {
        Ok(self
            .modify::<ListHeader, _>(key, |arena, list| list.pop_back(arena))?
            .flatten())
    }

    /// LLEN
    pub fn llen(&self, key: &[u8]) -> SpatResult<u64> {
        Ok(self
            .read::<ListHeader, _>(key, |_, list| Ok(list.len()))?
            .unwrap_or(0))
    }

    // =========================================================================
    // Hashes
    // =========================================================================

    /// HSET: returns the stored value.
    pub fn hset(&self, key: &[u8], field: &[u8], value: &[u8]) -> SpatResult<Vec<u8>> {
        self.update::<HashHeader, _>(key, |arena, hash| hash.set(arena, field, value))?;
        Ok(value.to_vec())
    }

    /// HGET
    pub fn hget(&self, key: &[u8], field: &[u8]) -> SpatResult<Option<Vec<u8>>> {
        Ok(self
            .read::<HashHeader, _>(key, |arena, hash| hash.get(arena, field))?
            .flatten())
    }

    /// HDEL: returns `true` if `field` was present.
    pub fn hdel(&self, key: &[u8], field: &[u8]) -> SpatResult<bool> {
        Ok(self
            .modify::<HashHeader, _>(key, |arena, hash| hash.delete(arena, field))?
            .unwrap_or(false))
    }

    /// HLEN
    pub fn hlen(&self, key: &[u8]) -> SpatResult<u64> {
        Ok(self
            .read::<HashHeader, _>(key, |_, hash| Ok(hash.len()))?
            .unwrap_or(0))
    }

    // =========================================================================
    // Composite plumbing
    // =========================================================================

    /// Run `op` on the composite at `key`, creating an empty one if absent.
    ///
    /// A composite created here is removed again when `op` fails.
    fn update<C: Composite, T>(
        &self,
        key: &[u8],
        op: impl FnOnce(&Arena, &mut C) -> SpatResult<T>,
    ) -> SpatResult<T> {
        let arena = &self.arena;
        let root = self.root()?;
        let (mut entry, _) = root.find_or_insert(key)?;

        if let Err(e) = entry.prepare_write(arena, key, C::TAG, Timestamp::now()) {
            if entry.tag() == ValueTag::Null {
                entry.delete()?;
            }
            return Err(e);
        }

        let initialized = entry.tag() == ValueTag::Null;
        if initialized {
            entry.value = C::default().into_value();
        }

        let result = match C::from_value_mut(&mut entry.value) {
            Some(header) => op(arena, header),
            None => Err(SpatError::invariant(format!(
                "entry holds {} after preparing a {} write",
                entry.tag(),
                C::TAG
            ))),
        };

        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                if initialized {
                    entry.delete()?;
                }
                Err(e)
            }
        }
    }

    /// Run `op` on an existing composite. Absent keys yield `None`.
    fn modify<C: Composite, T>(
        &self,
        key: &[u8],
        op: impl FnOnce(&Arena, &mut C) -> SpatResult<T>,
    ) -> SpatResult<Option<T>> {
        let root = self.root()?;
        let Some(mut entry) = root.find_exclusive(key)? else {
            return Ok(None);
        };
        entry.check()?;
        if entry.is_expired(Timestamp::now()) {
            entry.delete()?;
            return Ok(None);
        }

        let tag = entry.tag();
        match C::from_value_mut(&mut entry.value) {
            Some(header) => op(&self.arena, header).map(Some),
            None if tag == ValueTag::Null => Ok(None),
            None => Err(SpatError::type_mismatch(key, C::TAG.name(), tag.name())),
        }
    }

    /// Run `op` on a composite under a shared lock. Absent keys yield `None`.
    fn read<C: Composite, T>(
        &self,
        key: &[u8],
        op: impl FnOnce(&Arena, &C) -> SpatResult<T>,
    ) -> SpatResult<Option<T>> {
        let root = self.root()?;
        let Some(entry) = root.find_shared(key)? else {
            return Ok(None);
        };
        entry.check()?;
        if entry.is_expired(Timestamp::now()) {
            return Ok(None);
        }

        match C::from_value(&entry.value) {
            Some(header) => op(&self.arena, header).map(Some),
            None if entry.tag() == ValueTag::Null => Ok(None),
            None => Err(SpatError::type_mismatch(
                key,
                C::TAG.name(),
                entry.tag().name(),
            )),
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("arena", &self.arena)
            .finish()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        tracing::debug!(database = %self.name, "Detached database");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(tag: &str) -> Config {
        let mut config = Config::default();
        config.database.name = DbName::new(format!("unit-{}", tag)).unwrap();
        config.database.namespace =
            Namespace::new(format!("spat-db-{}", std::process::id())).unwrap();
        config.arena.initial_segment_size = 256 * 1024;
        config.arena.max_total_size = 32 * 1024 * 1024;
        config
    }

    #[test]
    fn test_second_open_joins_existing() {
        let config = test_config("join");
        let first = Database::open(&config).unwrap();
        first.set(b"k", b"v", None).unwrap();

        let second = Database::open(&config).unwrap();
        assert_eq!(second.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(second.arena().handle(), first.arena().handle());
        assert_eq!(second.created_at().unwrap(), first.created_at().unwrap());
        assert_eq!(second.name().as_str(), "unit-join");

        first.unlink().unwrap();
    }

    #[test]
    fn test_string_overwrite_frees_old_value() {
        let config = test_config("overwrite");
        let db = Database::open(&config).unwrap();
        db.set(b"k", b"first value", None).unwrap();
        let allocated = db.arena().stats().allocated_bytes;
        db.set(b"k", b"other value", None).unwrap();
        assert_eq!(db.arena().stats().allocated_bytes, allocated);
        assert_eq!(db.get(b"k").unwrap(), Some(b"other value".to_vec()));
        db.unlink().unwrap();
    }

    #[test]
    fn test_oversized_value_leaves_no_entry() {
        let config = test_config("oversized");
        let db = Database::open(&config).unwrap();
        let before = db.arena().stats().allocated_bytes;

        let big = vec![0u8; 64 * 1024 * 1024];
        assert!(matches!(
            db.set(b"big", &big, None),
            Err(SpatError::OutOfMemory { .. })
        ));
        assert!(matches!(
            db.rpush(b"list", &big),
            Err(SpatError::OutOfMemory { .. })
        ));
        assert_eq!(db.type_of(b"list").unwrap(), ValueTag::Null);
        assert_eq!(db.dbsize().unwrap(), 0);
        assert_eq!(db.arena().stats().allocated_bytes, before);
        db.unlink().unwrap();
    }

    #[test]
    fn test_failed_first_insert_rolls_back_new_composite() {
        let config = test_config("rollback-new");
        let db = Database::open(&config).unwrap();
        let before = db.arena().stats().allocated_bytes;
        let big = vec![7u8; 64 * 1024 * 1024];

        assert!(matches!(
            db.sadd(b"set", &big),
            Err(SpatError::OutOfMemory { .. })
        ));
        assert!(matches!(
            db.hset(b"hash-field", &big, b"v"),
            Err(SpatError::OutOfMemory { .. })
        ));
        assert!(matches!(
            db.hset(b"hash-value", b"f", &big),
            Err(SpatError::OutOfMemory { .. })
        ));

        for key in [&b"set"[..], b"hash-field", b"hash-value"] {
            assert_eq!(db.type_of(key).unwrap(), ValueTag::Null);
        }
        assert_eq!(db.dbsize().unwrap(), 0);
        assert_eq!(db.arena().stats().allocated_bytes, before);
        db.unlink().unwrap();
    }

    #[test]
    fn test_failed_insert_keeps_existing_composite() {
        let config = test_config("rollback-existing");
        let db = Database::open(&config).unwrap();
        db.sadd(b"set", b"a").unwrap();
        db.hset(b"hash", b"f", b"old").unwrap();
        let before = db.arena().stats().allocated_bytes;
        let big = vec![7u8; 64 * 1024 * 1024];

        assert!(matches!(
            db.sadd(b"set", &big),
            Err(SpatError::OutOfMemory { .. })
        ));
        assert!(matches!(
            db.hset(b"hash", b"f", &big),
            Err(SpatError::OutOfMemory { .. })
        ));

        assert_eq!(db.scard(b"set").unwrap(), 1);
        assert!(db.sismember(b"set", b"a").unwrap());
        assert_eq!(db.hget(b"hash", b"f").unwrap(), Some(b"old".to_vec()));
        assert_eq!(db.hlen(b"hash").unwrap(), 1);
        assert_eq!(db.arena().stats().allocated_bytes, before);
        db.unlink().unwrap();
    }

    #[test]
    fn test_purge_missing_database() {
        let config = test_config("never-created");
        assert!(!Database::purge(&config.database).unwrap());
    }

    #[test]
    fn test_purge_then_reopen_is_empty() {
        let config = test_config("purge");
        let db = Database::open(&config).unwrap();
        db.set(b"k", b"v", None).unwrap();
        assert!(Database::purge(&config.database).unwrap());
        drop(db);

        let fresh = Database::open(&config).unwrap();
        assert_eq!(fresh.get(b"k").unwrap(), None);
        fresh.unlink().unwrap();
    }

    #[test]
    fn test_info_reports_keys() {
        let config = test_config("info");
        let db = Database::open(&config).unwrap();
        db.set(b"a", b"1", None).unwrap();
        db.sadd(b"s", b"x").unwrap();
        let info = db.info().unwrap();
        assert_eq!(info.keys, 2);
        assert_eq!(info.name, "unit-info");
        assert!(info.arena_total_bytes >= 256 * 1024);
        db.unlink().unwrap();
    }
}
