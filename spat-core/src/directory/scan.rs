// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Sequential scans over a whole directory.

use std::ptr::NonNull;

use super::{DirectoryParams, Table};
use crate::arena::ArenaPtr;
use crate::error::{SpatError, SpatResult};
use crate::shm::ShmLockGuard;

/// Iterator-like cursor over every entry of a directory.
///
/// Holds all partition locks until dropped, so the directory cannot change
/// underneath it except through [`SeqScan::delete_current`].
#[must_use = "the directory stays locked until the scan is dropped"]
pub struct SeqScan<'a, P: DirectoryParams> {
    table: Table<'a, P>,
    heads: NonNull<ArenaPtr>,
    bucket_count: usize,
    next_bucket: usize,
    next_item: ArenaPtr,
    current: Option<(ArenaPtr, u32)>,
    guards: Vec<ShmLockGuard<'a>>,
}

impl<'a, P: DirectoryParams> SeqScan<'a, P> {
    pub(super) fn new(table: Table<'a, P>, exclusive: bool) -> SpatResult<Self> {
        let guards: Vec<ShmLockGuard<'a>> = table
            .control
            .locks
            .iter()
            .map(|lock| lock.lock(exclusive))
            .collect();

        let (heads, size_log2) = table.buckets()?;
        Ok(Self {
            table,
            heads,
            bucket_count: 1 << size_log2,
            next_bucket: 0,
            next_item: ArenaPtr::NULL,
            current: None,
            guards,
        })
    }

    /// Advance to the next entry, returning a copy of it.
    pub fn next(&mut self) -> SpatResult<Option<P::Entry>> {
        while self.next_item.is_null() {
            if self.next_bucket >= self.bucket_count {
                self.current = None;
                return Ok(None);
            }
            // SAFETY: next_bucket < bucket_count; the array cannot be
            // replaced while every partition is locked.
            self.next_item = unsafe { *self.heads.as_ptr().add(self.next_bucket) };
            self.next_bucket += 1;
        }

        let ptr = self.next_item;
        // SAFETY: chained items are live under the partition locks.
        let item = unsafe { self.table.item(ptr)?.as_ref() };
        self.next_item = item.next;
        self.current = Some((ptr, item.hash));
        Ok(Some(item.entry))
    }

    /// Remove the entry last returned by [`SeqScan::next`].
    pub fn delete_current(&mut self) -> SpatResult<()> {
        if !self.guards.iter().all(ShmLockGuard::is_exclusive) {
            return Err(SpatError::invariant("delete during a shared directory scan"));
        }
        let (ptr, hash) = self
            .current
            .take()
            .ok_or_else(|| SpatError::invariant("delete without a current scan entry"))?;
        self.table.remove(hash, ptr)
    }
}
