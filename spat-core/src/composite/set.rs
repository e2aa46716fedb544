// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Set values backed by a nested directory whose entries are just keys.

use crate::arena::{Arena, ArenaPtr};
use crate::directory::{Directory, DirectoryHandle, DirectoryParams};
use crate::dss::Dss;
use crate::error::SpatResult;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SetMember {
    pub member: Dss,
}

/// Member directory layout.
pub struct SetParams;

impl DirectoryParams for SetParams {
    type Entry = SetMember;

    fn key(entry: &SetMember) -> &Dss {
        &entry.member
    }

    fn new_entry(member: Dss) -> SetMember {
        SetMember { member }
    }

    fn release(arena: &Arena, entry: SetMember) -> SpatResult<()> {
        entry.member.free(arena)
    }
}

/// Inline part of a set value.
///
/// The member directory is created on the first insert, so a set that has
/// never held a member owns no arena storage.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetHeader {
    members: DirectoryHandle,
    cardinality: u64,
}

impl Default for SetHeader {
    fn default() -> Self {
        Self {
            members: DirectoryHandle::from_ptr(ArenaPtr::NULL),
            cardinality: 0,
        }
    }
}

impl SetHeader {
    pub fn len(&self) -> u64 {
        self.cardinality
    }

    pub fn is_empty(&self) -> bool {
        self.cardinality == 0
    }

    fn directory<'a>(&self, arena: &'a Arena) -> SpatResult<Option<Directory<'a, SetParams>>> {
        if self.members.as_ptr().is_null() {
            return Ok(None);
        }
        Directory::attach(arena, self.members).map(Some)
    }

    /// Insert `member`. Returns `true` if it was not already present.
    pub fn add(&mut self, arena: &Arena, member: &[u8]) -> SpatResult<bool> {
        let (dir, created) = match self.directory(arena)? {
            Some(dir) => (dir, false),
            None => (Directory::<SetParams>::create(arena)?, true),
        };

        match dir.find_or_insert(member) {
            Ok((entry, found)) => {
                entry.release();
                if created {
                    self.members = dir.handle();
                }
                if !found {
                    self.cardinality += 1;
                }
                Ok(!found)
            }
            Err(e) => {
                if created {
                    dir.destroy()?;
                }
                Err(e)
            }
        }
    }

    pub fn contains(&self, arena: &Arena, member: &[u8]) -> SpatResult<bool> {
        match self.directory(arena)? {
            Some(dir) => Ok(dir.find_shared(member)?.is_some()),
            None => Ok(false),
        }
    }

    /// Remove `member`. Returns `true` if it was present.
    pub fn remove(&mut self, arena: &Arena, member: &[u8]) -> SpatResult<bool> {
        let Some(dir) = self.directory(arena)? else {
            return Ok(false);
        };
        let removed = dir.delete_key(member)?;
        if removed {
            self.cardinality -= 1;
        }
        Ok(removed)
    }

    /// Copy every member out, in directory order.
    pub fn members(&self, arena: &Arena) -> SpatResult<Vec<Vec<u8>>> {
        let Some(dir) = self.directory(arena)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(self.cardinality as usize);
        let mut scan = dir.seq_scan_shared()?;
        while let Some(entry) = scan.next()? {
            out.push(entry.member.to_local(arena)?);
        }
        Ok(out)
    }

    pub fn destroy(self, arena: &Arena) -> SpatResult<()> {
        match self.directory(arena)? {
            Some(dir) => dir.destroy(),
            None => Ok(()),
        }
    }
}
