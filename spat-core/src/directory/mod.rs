// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Concurrent hash directory stored in an arena.
//!
//! Every structure here lives in shared memory and is reached through
//! [`ArenaPtr`]s, so any attached process can open a directory from its
//! [`DirectoryHandle`] alone.
//!
//! # Locking
//!
//! Buckets are split into [`PARTITIONS`] lock partitions by the top bits of
//! the key hash. A lookup holds exactly one partition lock (shared or
//! exclusive) for as long as the returned entry guard lives. Growing the
//! bucket array takes every partition lock exclusively in ascending order,
//! and so does a sequential scan, which keeps lock order total.
//!
//! Each partition owns a contiguous range of buckets, so doubling the bucket
//! array never moves an item to a different partition.

mod scan;

use std::marker::PhantomData;
use std::mem::size_of;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::arena::{Arena, ArenaPtr};
use crate::dss::Dss;
use crate::error::{SpatError, SpatResult};
use crate::hash::hash_bytes;
use crate::shm::{ShmReadGuard, ShmRwLock, ShmWriteGuard};

pub use scan::SeqScan;

const DIRECTORY_MAGIC: u64 = 0x5350_4154_4449_5231; // "SPATDIR1"

/// log2 of the number of lock partitions.
pub const PARTITION_BITS: u32 = 7;
pub const PARTITIONS: usize = 1 << PARTITION_BITS;

/// A new directory starts with one bucket per partition.
const INITIAL_SIZE_LOG2: u32 = PARTITION_BITS;
const MAX_SIZE_LOG2: u32 = 30;

/// Average chain length per partition that triggers a resize.
const MAX_LOAD: u64 = 2;

/// Layout and key handling for one kind of directory.
///
/// Keys are arena strings embedded in the entry. Lookups probe with local
/// bytes so reads never allocate.
pub trait DirectoryParams {
    type Entry: Copy;

    fn key(entry: &Self::Entry) -> &Dss;

    /// Entry for a freshly inserted key. The key is already in the arena.
    fn new_entry(key: Dss) -> Self::Entry;

    /// Free everything the entry owns, key included.
    fn release(arena: &Arena, entry: Self::Entry) -> SpatResult<()>;

    fn hash(key: &[u8]) -> u32 {
        hash_bytes(key)
    }

    fn matches(arena: &Arena, stored: &Dss, probe: &[u8]) -> SpatResult<bool> {
        stored.matches(arena, probe)
    }
}

/// Arena location of a directory's control block.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryHandle(ArenaPtr);

impl DirectoryHandle {
    pub const fn from_ptr(ptr: ArenaPtr) -> Self {
        Self(ptr)
    }

    pub const fn as_ptr(&self) -> ArenaPtr {
        self.0
    }
}

#[repr(C)]
struct DirectoryControl {
    magic: AtomicU64,
    size_log2: AtomicU32,
    _reserved: AtomicU32,
    /// `[ArenaPtr; 1 << size_log2]`, read under any partition lock.
    buckets: AtomicU64,
    locks: [ShmRwLock; PARTITIONS],
    counts: [AtomicU64; PARTITIONS],
}

#[repr(C)]
struct Item<E> {
    next: ArenaPtr,
    hash: u32,
    _pad: u32,
    entry: E,
}

fn partition_of(hash: u32) -> usize {
    (hash >> (32 - PARTITION_BITS)) as usize
}

fn bucket_of(hash: u32, size_log2: u32) -> usize {
    (hash >> (32 - size_log2)) as usize
}

/// Low-level access shared by the directory, its entry guards and scans.
struct Table<'a, P: DirectoryParams> {
    arena: &'a Arena,
    control: &'a DirectoryControl,
    _params: PhantomData<fn() -> P>,
}

impl<P: DirectoryParams> Clone for Table<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: DirectoryParams> Copy for Table<'_, P> {}

impl<'a, P: DirectoryParams> Table<'a, P> {
    fn item(&self, ptr: ArenaPtr) -> SpatResult<NonNull<Item<P::Entry>>> {
        self.arena.resolve_as::<Item<P::Entry>>(ptr)
    }

    /// Bucket heads and the current size. Caller holds a partition lock.
    fn buckets(&self) -> SpatResult<(NonNull<ArenaPtr>, u32)> {
        let size_log2 = self.control.size_log2.load(Ordering::Acquire);
        let buckets = ArenaPtr::from_raw(self.control.buckets.load(Ordering::Acquire));
        Ok((self.arena.resolve_as::<ArenaPtr>(buckets)?, size_log2))
    }

    /// Caller holds the key's partition lock.
    fn lookup(&self, hash: u32, key: &[u8]) -> SpatResult<Option<ArenaPtr>> {
        let (heads, size_log2) = self.buckets()?;
        // SAFETY: bucket index < 1 << size_log2, the length of the array.
        let mut cur = unsafe { *heads.as_ptr().add(bucket_of(hash, size_log2)) };
        while !cur.is_null() {
            // SAFETY: items in a chain are live while the partition is locked.
            let item = unsafe { self.item(cur)?.as_ref() };
            if item.hash == hash && P::matches(self.arena, P::key(&item.entry), key)? {
                return Ok(Some(cur));
            }
            cur = item.next;
        }
        Ok(None)
    }

    /// Caller holds the key's partition lock exclusively.
    fn insert(&self, hash: u32, key: &[u8]) -> SpatResult<ArenaPtr> {
        let key = Dss::from_bytes(self.arena, key)?;
        let item_ptr = match self.arena.allocate(size_of::<Item<P::Entry>>()) {
            Ok(ptr) => ptr,
            Err(e) => {
                key.free(self.arena)?;
                return Err(e);
            }
        };

        let (heads, size_log2) = self.buckets()?;
        // SAFETY: bucket index is in range; the item allocation fits an Item.
        unsafe {
            let head = heads.as_ptr().add(bucket_of(hash, size_log2));
            self.item(item_ptr)?.as_ptr().write(Item {
                next: *head,
                hash,
                _pad: 0,
                entry: P::new_entry(key),
            });
            *head = item_ptr;
        }
        self.control.counts[partition_of(hash)].fetch_add(1, Ordering::Relaxed);
        Ok(item_ptr)
    }

    /// Unlink an item, release its entry and free it. Caller holds the
    /// item's partition lock exclusively.
    fn remove(&self, hash: u32, target: ArenaPtr) -> SpatResult<()> {
        let (heads, size_log2) = self.buckets()?;
        // SAFETY: bucket index is in range.
        let mut link: *mut ArenaPtr = unsafe { heads.as_ptr().add(bucket_of(hash, size_log2)) };

        loop {
            // SAFETY: link points at a bucket head or at a live item's `next`.
            let cur = unsafe { *link };
            if cur.is_null() {
                return Err(SpatError::invariant(format!(
                    "directory item {} missing from its bucket",
                    target
                )));
            }
            let item = self.item(cur)?.as_ptr();
            if cur == target {
                // SAFETY: item is live; unlinked before it is freed.
                let entry = unsafe {
                    *link = (*item).next;
                    (*item).entry
                };
                self.control.counts[partition_of(hash)].fetch_sub(1, Ordering::Relaxed);
                P::release(self.arena, entry)?;
                return self.arena.free(target);
            }
            // SAFETY: item is live.
            link = unsafe { std::ptr::addr_of_mut!((*item).next) };
        }
    }

    fn len(&self) -> u64 {
        self.control
            .counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }
}

/// One attached view of a directory.
pub struct Directory<'a, P: DirectoryParams> {
    table: Table<'a, P>,
    handle: DirectoryHandle,
}

impl<'a, P: DirectoryParams> Directory<'a, P> {
    /// Create an empty directory in `arena`.
    pub fn create(arena: &'a Arena) -> SpatResult<Self> {
        let control_ptr = arena.allocate_zeroed(size_of::<DirectoryControl>())?;
        let buckets = match arena
            .allocate_zeroed(size_of::<ArenaPtr>() << INITIAL_SIZE_LOG2)
        {
            Ok(ptr) => ptr,
            Err(e) => {
                arena.free(control_ptr)?;
                return Err(e);
            }
        };

        // SAFETY: zeroed allocation sized for DirectoryControl; zero is a
        // valid value for all of its fields.
        let control = unsafe { &*arena.resolve_as::<DirectoryControl>(control_ptr)?.as_ptr() };
        control.size_log2.store(INITIAL_SIZE_LOG2, Ordering::Relaxed);
        control.buckets.store(buckets.as_u64(), Ordering::Relaxed);
        control.magic.store(DIRECTORY_MAGIC, Ordering::Release);

        Ok(Self {
            table: Table {
                arena,
                control,
                _params: PhantomData,
            },
            handle: DirectoryHandle(control_ptr),
        })
    }

    /// Open a directory created earlier, possibly by another process.
    pub fn attach(arena: &'a Arena, handle: DirectoryHandle) -> SpatResult<Self> {
        // SAFETY: the handle came from `create`; the magic check below
        // rejects anything else.
        let control = unsafe { &*arena.resolve_as::<DirectoryControl>(handle.0)?.as_ptr() };
        if control.magic.load(Ordering::Acquire) != DIRECTORY_MAGIC {
            return Err(SpatError::invariant(format!(
                "no directory at {}",
                handle.0
            )));
        }
        Ok(Self {
            table: Table {
                arena,
                control,
                _params: PhantomData,
            },
            handle,
        })
    }

    pub fn handle(&self) -> DirectoryHandle {
        self.handle
    }

    pub fn arena(&self) -> &'a Arena {
        self.table.arena
    }

    /// Number of entries. Not synchronized with concurrent writers.
    pub fn len(&self) -> u64 {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket_count(&self) -> usize {
        1 << self.table.control.size_log2.load(Ordering::Relaxed)
    }

    /// Look up `key` holding its partition in shared mode.
    pub fn find_shared(&self, key: &[u8]) -> SpatResult<Option<SharedEntry<'a, P>>> {
        let hash = P::hash(key);
        let guard = self.table.control.locks[partition_of(hash)].read();
        match self.table.lookup(hash, key)? {
            Some(ptr) => Ok(Some(SharedEntry {
                table: self.table,
                item: self.table.item(ptr)?,
                _guard: guard,
            })),
            None => Ok(None),
        }
    }

    /// Look up `key` holding its partition in exclusive mode.
    pub fn find_exclusive(&self, key: &[u8]) -> SpatResult<Option<ExclusiveEntry<'a, P>>> {
        let hash = P::hash(key);
        let guard = self.table.control.locks[partition_of(hash)].write();
        match self.table.lookup(hash, key)? {
            Some(ptr) => Ok(Some(ExclusiveEntry::new(self.table, ptr, hash, guard)?)),
            None => Ok(None),
        }
    }

    /// Look up `key`, inserting a fresh entry if it is absent.
    ///
    /// Returns the locked entry and whether it already existed.
    pub fn find_or_insert(&self, key: &[u8]) -> SpatResult<(ExclusiveEntry<'a, P>, bool)> {
        let hash = P::hash(key);
        let partition = partition_of(hash);
        let mut may_grow = true;

        loop {
            let guard = self.table.control.locks[partition].write();
            if let Some(ptr) = self.table.lookup(hash, key)? {
                return Ok((ExclusiveEntry::new(self.table, ptr, hash, guard)?, true));
            }

            let size_log2 = self.table.control.size_log2.load(Ordering::Acquire);
            let per_partition = 1u64 << (size_log2 - PARTITION_BITS);
            let count = self.table.control.counts[partition].load(Ordering::Relaxed);
            if may_grow && count >= per_partition * MAX_LOAD && size_log2 < MAX_SIZE_LOG2 {
                drop(guard);
                self.grow(size_log2)?;
                may_grow = false;
                continue;
            }

            let ptr = self.table.insert(hash, key)?;
            return Ok((ExclusiveEntry::new(self.table, ptr, hash, guard)?, false));
        }
    }

    /// Remove `key` if present.
    pub fn delete_key(&self, key: &[u8]) -> SpatResult<bool> {
        match self.find_exclusive(key)? {
            Some(entry) => {
                entry.delete()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Visit every entry with all partitions held shared.
    pub fn seq_scan_shared(&self) -> SpatResult<SeqScan<'a, P>> {
        SeqScan::new(self.table, false)
    }

    /// Visit every entry with all partitions held exclusively. Entries can
    /// be removed mid-scan with [`SeqScan::delete_current`].
    pub fn seq_scan_exclusive(&self) -> SpatResult<SeqScan<'a, P>> {
        SeqScan::new(self.table, true)
    }

    /// Release every entry, then the directory itself.
    pub fn destroy(self) -> SpatResult<()> {
        let mut scan = self.seq_scan_exclusive()?;
        while scan.next()?.is_some() {
            scan.delete_current()?;
        }
        let buckets = ArenaPtr::from_raw(self.table.control.buckets.load(Ordering::Acquire));
        drop(scan);

        self.table.control.magic.store(0, Ordering::Release);
        self.table.arena.free(buckets)?;
        self.table.arena.free(self.handle.0)
    }

    /// Double the bucket array unless someone already did.
    fn grow(&self, expected_log2: u32) -> SpatResult<()> {
        let control = self.table.control;
        let _guards: Vec<ShmWriteGuard<'a>> = control.locks.iter().map(|l| l.write()).collect();

        let size_log2 = control.size_log2.load(Ordering::Acquire);
        if size_log2 != expected_log2 || size_log2 >= MAX_SIZE_LOG2 {
            return Ok(());
        }

        let new_log2 = size_log2 + 1;
        let new_buckets = match self
            .table
            .arena
            .allocate_zeroed(size_of::<ArenaPtr>() << new_log2)
        {
            Ok(ptr) => ptr,
            Err(SpatError::OutOfMemory { requested }) => {
                tracing::warn!(
                    buckets = 1u64 << size_log2,
                    requested = requested,
                    "Directory resize skipped, arena exhausted"
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let (old_heads, _) = self.table.buckets()?;
        let new_heads = self.table.arena.resolve_as::<ArenaPtr>(new_buckets)?;
        for index in 0..(1usize << size_log2) {
            // SAFETY: index is within the old array; every lock is held.
            let mut cur = unsafe { *old_heads.as_ptr().add(index) };
            while !cur.is_null() {
                let item = self.table.item(cur)?.as_ptr();
                // SAFETY: item is live; new index is within the new array.
                unsafe {
                    let next = (*item).next;
                    let slot = new_heads.as_ptr().add(bucket_of((*item).hash, new_log2));
                    (*item).next = *slot;
                    *slot = cur;
                    cur = next;
                }
            }
        }

        let old_buckets = ArenaPtr::from_raw(control.buckets.load(Ordering::Acquire));
        control.buckets.store(new_buckets.as_u64(), Ordering::Release);
        control.size_log2.store(new_log2, Ordering::Release);
        self.table.arena.free(old_buckets)?;

        tracing::debug!(
            directory = %self.handle.0,
            buckets = 1u64 << new_log2,
            entries = self.table.len(),
            "Resized directory"
        );
        Ok(())
    }
}

/// Entry found under a shared partition lock. Read-only.
#[must_use = "the partition stays locked until the entry is released"]
pub struct SharedEntry<'a, P: DirectoryParams> {
    table: Table<'a, P>,
    item: NonNull<Item<P::Entry>>,
    _guard: ShmReadGuard<'a>,
}

impl<'a, P: DirectoryParams> SharedEntry<'a, P> {
    pub fn arena(&self) -> &'a Arena {
        self.table.arena
    }

    /// Drop the partition lock.
    pub fn release(self) {}
}

impl<P: DirectoryParams> Deref for SharedEntry<'_, P> {
    type Target = P::Entry;

    fn deref(&self) -> &P::Entry {
        // SAFETY: the item stays live while its partition is locked.
        unsafe { &(*self.item.as_ptr()).entry }
    }
}

/// Entry found under an exclusive partition lock.
#[must_use = "the partition stays locked until the entry is released"]
pub struct ExclusiveEntry<'a, P: DirectoryParams> {
    table: Table<'a, P>,
    ptr: ArenaPtr,
    item: NonNull<Item<P::Entry>>,
    hash: u32,
    _guard: ShmWriteGuard<'a>,
}

impl<'a, P: DirectoryParams> ExclusiveEntry<'a, P> {
    fn new(
        table: Table<'a, P>,
        ptr: ArenaPtr,
        hash: u32,
        guard: ShmWriteGuard<'a>,
    ) -> SpatResult<Self> {
        Ok(Self {
            table,
            ptr,
            item: table.item(ptr)?,
            hash,
            _guard: guard,
        })
    }

    pub fn arena(&self) -> &'a Arena {
        self.table.arena
    }

    /// Remove the entry, freeing everything it owns, and drop the lock.
    pub fn delete(self) -> SpatResult<()> {
        self.table.remove(self.hash, self.ptr)
    }

    /// Drop the partition lock.
    pub fn release(self) {}
}

impl<P: DirectoryParams> Deref for ExclusiveEntry<'_, P> {
    type Target = P::Entry;

    fn deref(&self) -> &P::Entry {
        // SAFETY: the item stays live while its partition is locked.
        unsafe { &(*self.item.as_ptr()).entry }
    }
}

impl<P: DirectoryParams> DerefMut for ExclusiveEntry<'_, P> {
    fn deref_mut(&mut self) -> &mut P::Entry {
        // SAFETY: exclusive partition lock; no other reference exists.
        unsafe { &mut (*self.item.as_ptr()).entry }
    }
}
