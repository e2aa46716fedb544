// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Dynamic shared strings.
//!
//! A [`Dss`] is a length-prefixed byte string whose bytes live in the arena.
//! The descriptor itself is plain data and is stored inline in entries and
//! list nodes. Strings are never mutated in place: a new value is a new
//! allocation and the old one is freed.

use crate::arena::{Arena, ArenaPtr};
use crate::error::{SpatError, SpatResult};
use crate::hash::hash_bytes;

/// Largest value accepted for a single string.
pub const MAX_VALUE_LEN: usize = 512 * 1024 * 1024;

/// Byte string stored in arena memory.
///
/// The empty string has a null pointer and owns no allocation.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dss {
    ptr: ArenaPtr,
    len: u64,
}

impl Dss {
    pub const EMPTY: Self = Self {
        ptr: ArenaPtr::NULL,
        len: 0,
    };

    /// Copy `bytes` into a fresh arena allocation.
    pub fn from_bytes(arena: &Arena, bytes: &[u8]) -> SpatResult<Self> {
        if bytes.len() > MAX_VALUE_LEN {
            return Err(SpatError::UnsupportedValue {
                reason: format!(
                    "value of {} bytes exceeds the {} byte limit",
                    bytes.len(),
                    MAX_VALUE_LEN
                ),
            });
        }
        if bytes.is_empty() {
            return Ok(Self::EMPTY);
        }

        let ptr = arena.allocate(bytes.len())?;
        let dst = arena.resolve(ptr)?;
        // SAFETY: the allocation holds at least bytes.len() bytes.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.as_ptr(), bytes.len()) };

        Ok(Self {
            ptr,
            len: bytes.len() as u64,
        })
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrow the bytes through the local mapping.
    ///
    /// Valid while the arena is attached and the string is not freed, so
    /// callers keep the owning entry locked for the lifetime of the slice.
    pub fn as_bytes<'a>(&self, arena: &'a Arena) -> SpatResult<&'a [u8]> {
        if self.len == 0 {
            return Ok(&[]);
        }
        let addr = arena.resolve(self.ptr)?;
        // SAFETY: ptr/len describe a live allocation in a mapped segment.
        Ok(unsafe { std::slice::from_raw_parts(addr.as_ptr(), self.len as usize) })
    }

    /// Copy into process-local memory.
    pub fn to_local(&self, arena: &Arena) -> SpatResult<Vec<u8>> {
        Ok(self.as_bytes(arena)?.to_vec())
    }

    /// Byte-wise comparison against a local byte string.
    pub fn matches(&self, arena: &Arena, bytes: &[u8]) -> SpatResult<bool> {
        if self.len() != bytes.len() {
            return Ok(false);
        }
        Ok(self.as_bytes(arena)? == bytes)
    }

    /// Byte-wise comparison of two arena strings.
    pub fn equals(&self, arena: &Arena, other: &Dss) -> SpatResult<bool> {
        if self.len != other.len {
            return Ok(false);
        }
        if self.ptr == other.ptr {
            return Ok(true);
        }
        Ok(self.as_bytes(arena)? == other.as_bytes(arena)?)
    }

    pub fn hash(&self, arena: &Arena) -> SpatResult<u32> {
        Ok(hash_bytes(self.as_bytes(arena)?))
    }

    /// Release the bytes. The descriptor must not be used afterwards.
    pub fn free(self, arena: &Arena) -> SpatResult<()> {
        arena.free(self.ptr)
    }
}

impl Default for Dss {
    fn default() -> Self {
        Self::EMPTY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArenaConfig;
    use crate::types::Namespace;

    fn test_arena() -> Arena {
        let ns = Namespace::new(format!("spat-dss-{}", std::process::id())).unwrap();
        Arena::create(
            &ns,
            &ArenaConfig {
                initial_segment_size: 64 * 1024,
                max_total_size: 1024 * 1024,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_copy_in_and_out() {
        let arena = test_arena();
        let s = Dss::from_bytes(&arena, b"hello").unwrap();
        assert_eq!(s.len(), 5);
        assert_eq!(s.to_local(&arena).unwrap(), b"hello");
        assert!(s.matches(&arena, b"hello").unwrap());
        assert!(!s.matches(&arena, b"hellp").unwrap());
        assert!(!s.matches(&arena, b"hell").unwrap());
        assert_eq!(s.hash(&arena).unwrap(), hash_bytes(b"hello"));
        s.free(&arena).unwrap();
        arena.unlink_segments().unwrap();
    }

    #[test]
    fn test_empty_string_owns_nothing() {
        let arena = test_arena();
        let before = arena.stats().allocated_bytes;
        let s = Dss::from_bytes(&arena, b"").unwrap();
        assert!(s.is_empty());
        assert_eq!(arena.stats().allocated_bytes, before);
        assert_eq!(s.to_local(&arena).unwrap(), Vec::<u8>::new());
        assert!(s.matches(&arena, b"").unwrap());
        s.free(&arena).unwrap();
        arena.unlink_segments().unwrap();
    }

    #[test]
    fn test_equals_distinct_allocations() {
        let arena = test_arena();
        let a = Dss::from_bytes(&arena, b"same").unwrap();
        let b = Dss::from_bytes(&arena, b"same").unwrap();
        let c = Dss::from_bytes(&arena, b"diff").unwrap();
        assert!(a.equals(&arena, &b).unwrap());
        assert!(!a.equals(&arena, &c).unwrap());
        arena.unlink_segments().unwrap();
    }

    #[test]
    fn test_binary_bytes_preserved() {
        let arena = test_arena();
        let raw = [0u8, 255, 0, 10, 13, 0];
        let s = Dss::from_bytes(&arena, &raw).unwrap();
        assert_eq!(s.to_local(&arena).unwrap(), raw);
        arena.unlink_segments().unwrap();
    }
}
