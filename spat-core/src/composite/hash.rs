// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Hash values: a nested directory from field to value.

use crate::arena::{Arena, ArenaPtr};
use crate::directory::{Directory, DirectoryHandle, DirectoryParams};
use crate::dss::Dss;
use crate::error::SpatResult;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HashField {
    pub field: Dss,
    pub value: Dss,
}

/// Field directory layout.
pub struct HashParams;

impl DirectoryParams for HashParams {
    type Entry = HashField;

    fn key(entry: &HashField) -> &Dss {
        &entry.field
    }

    fn new_entry(field: Dss) -> HashField {
        HashField {
            field,
            value: Dss::EMPTY,
        }
    }

    fn release(arena: &Arena, entry: HashField) -> SpatResult<()> {
        entry.value.free(arena)?;
        entry.field.free(arena)
    }
}

/// Inline part of a hash value. The field directory is created lazily.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashHeader {
    fields: DirectoryHandle,
    len: u64,
}

impl Default for HashHeader {
    fn default() -> Self {
        Self {
            fields: DirectoryHandle::from_ptr(ArenaPtr::NULL),
            len: 0,
        }
    }
}

impl HashHeader {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn directory<'a>(&self, arena: &'a Arena) -> SpatResult<Option<Directory<'a, HashParams>>> {
        if self.fields.as_ptr().is_null() {
            return Ok(None);
        }
        Directory::attach(arena, self.fields).map(Some)
    }

    /// Store `value` under `field`, replacing any previous value.
    ///
    /// Returns `true` if the field is new.
    pub fn set(&mut self, arena: &Arena, field: &[u8], value: &[u8]) -> SpatResult<bool> {
        let value = Dss::from_bytes(arena, value)?;

        let (dir, created) = match self.directory(arena) {
            Ok(Some(dir)) => (dir, false),
            Ok(None) => match Directory::<HashParams>::create(arena) {
                Ok(dir) => (dir, true),
                Err(e) => {
                    value.free(arena)?;
                    return Err(e);
                }
            },
            Err(e) => {
                value.free(arena)?;
                return Err(e);
            }
        };

        match dir.find_or_insert(field) {
            Ok((mut entry, found)) => {
                let old = std::mem::replace(&mut entry.value, value);
                entry.release();
                old.free(arena)?;
                if created {
                    self.fields = dir.handle();
                }
                if !found {
                    self.len += 1;
                }
                Ok(!found)
            }
            Err(e) => {
                value.free(arena)?;
                if created {
                    dir.destroy()?;
                }
                Err(e)
            }
        }
    }

    pub fn get(&self, arena: &Arena, field: &[u8]) -> SpatResult<Option<Vec<u8>>> {
        let Some(dir) = self.directory(arena)? else {
            return Ok(None);
        };
        match dir.find_shared(field)? {
            Some(entry) => Ok(Some(entry.value.to_local(arena)?)),
            None => Ok(None),
        }
    }

    /// Remove `field`. Returns `true` if it was present.
    pub fn delete(&mut self, arena: &Arena, field: &[u8]) -> SpatResult<bool> {
        let Some(dir) = self.directory(arena)? else {
            return Ok(false);
        };
        let removed = dir.delete_key(field)?;
        if removed {
            self.len -= 1;
        }
        Ok(removed)
    }

    pub fn destroy(self, arena: &Arena) -> SpatResult<()> {
        match self.directory(arena)? {
            Some(dir) => dir.destroy(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArenaConfig;
    use crate::types::Namespace;

    fn test_arena() -> Arena {
        let ns = Namespace::new(format!("spat-hash-{}", std::process::id())).unwrap();
        Arena::create(
            &ns,
            &ArenaConfig {
                initial_segment_size: 256 * 1024,
                max_total_size: 16 * 1024 * 1024,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_set_get_overwrite() {
        let arena = test_arena();
        let mut hash = HashHeader::default();
        assert!(hash.set(&arena, b"f", b"v1").unwrap());
        assert_eq!(hash.get(&arena, b"f").unwrap(), Some(b"v1".to_vec()));

        let allocated = arena.stats().allocated_bytes;
        assert!(!hash.set(&arena, b"f", b"v2").unwrap());
        assert_eq!(hash.get(&arena, b"f").unwrap(), Some(b"v2".to_vec()));
        // The old value was freed, not leaked.
        assert_eq!(arena.stats().allocated_bytes, allocated);
        assert_eq!(hash.len(), 1);
        assert_eq!(hash.get(&arena, b"missing").unwrap(), None);
        arena.unlink_segments().unwrap();
    }

    #[test]
    fn test_delete_field() {
        let arena = test_arena();
        let mut hash = HashHeader::default();
        hash.set(&arena, b"a", b"1").unwrap();
        hash.set(&arena, b"b", b"2").unwrap();
        assert!(hash.delete(&arena, b"a").unwrap());
        assert!(!hash.delete(&arena, b"a").unwrap());
        assert_eq!(hash.len(), 1);
        assert_eq!(hash.get(&arena, b"a").unwrap(), None);
        arena.unlink_segments().unwrap();
    }

    #[test]
    fn test_empty_value_allowed() {
        let arena = test_arena();
        let mut hash = HashHeader::default();
        hash.set(&arena, b"f", b"").unwrap();
        assert_eq!(hash.get(&arena, b"f").unwrap(), Some(Vec::new()));
        arena.unlink_segments().unwrap();
    }

    #[test]
    fn test_destroy_frees_fields() {
        let arena = test_arena();
        let before = arena.stats().allocated_bytes;
        let mut hash = HashHeader::default();
        for i in 0..100 {
            hash.set(&arena, format!("f{}", i).as_bytes(), b"value").unwrap();
        }
        hash.destroy(&arena).unwrap();
        assert_eq!(arena.stats().allocated_bytes, before);
        arena.unlink_segments().unwrap();
    }
}
