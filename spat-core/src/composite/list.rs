// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! List values: a doubly-linked chain of arena nodes.

use crate::arena::{Arena, ArenaPtr};
use crate::dss::Dss;
use crate::error::{SpatError, SpatResult};

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct ListNode {
    data: Dss,
    prev: ArenaPtr,
    next: ArenaPtr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Head,
    Tail,
}

/// Inline part of a list value: both ends and the node count.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListHeader {
    head: ArenaPtr,
    tail: ArenaPtr,
    len: u64,
}

fn node(arena: &Arena, ptr: ArenaPtr) -> SpatResult<*mut ListNode> {
    Ok(arena.resolve_as::<ListNode>(ptr)?.as_ptr())
}

impl ListHeader {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Prepend `value`. Returns the new length.
    pub fn push_front(&mut self, arena: &Arena, value: &[u8]) -> SpatResult<u64> {
        self.push(arena, value, End::Head)
    }

    /// Append `value`. Returns the new length.
    pub fn push_back(&mut self, arena: &Arena, value: &[u8]) -> SpatResult<u64> {
        self.push(arena, value, End::Tail)
    }

    /// Remove and return the first value, `None` when empty.
    pub fn pop_front(&mut self, arena: &Arena) -> SpatResult<Option<Vec<u8>>> {
        self.pop(arena, End::Head)
    }

    /// Remove and return the last value, `None` when empty.
    pub fn pop_back(&mut self, arena: &Arena) -> SpatResult<Option<Vec<u8>>> {
        self.pop(arena, End::Tail)
    }

    fn push(&mut self, arena: &Arena, value: &[u8], end: End) -> SpatResult<u64> {
        let data = Dss::from_bytes(arena, value)?;
        let (prev, next) = match end {
            End::Head => (ArenaPtr::NULL, self.head),
            End::Tail => (self.tail, ArenaPtr::NULL),
        };
        let ptr = match arena.allocate_value(ListNode { data, prev, next }) {
            Ok(ptr) => ptr,
            Err(e) => {
                data.free(arena)?;
                return Err(e);
            }
        };

        // SAFETY: neighbours are live nodes of this list; the entry lock is held.
        unsafe {
            match end {
                End::Head if !next.is_null() => (*node(arena, next)?).prev = ptr,
                End::Tail if !prev.is_null() => (*node(arena, prev)?).next = ptr,
                _ => {}
            }
        }
        match end {
            End::Head => {
                self.head = ptr;
                if self.tail.is_null() {
                    self.tail = ptr;
                }
            }
            End::Tail => {
                self.tail = ptr;
                if self.head.is_null() {
                    self.head = ptr;
                }
            }
        }

        self.len += 1;
        Ok(self.len)
    }

    fn pop(&mut self, arena: &Arena, end: End) -> SpatResult<Option<Vec<u8>>> {
        let ptr = match end {
            End::Head => self.head,
            End::Tail => self.tail,
        };
        if ptr.is_null() {
            return Ok(None);
        }
        if self.len == 0 {
            return Err(SpatError::invariant("list has nodes but zero length"));
        }

        // SAFETY: ptr is a live node of this list; the entry lock is held.
        let removed = unsafe { *node(arena, ptr)? };
        let bytes = removed.data.to_local(arena)?;

        match end {
            End::Head => {
                self.head = removed.next;
                if removed.next.is_null() {
                    self.tail = ArenaPtr::NULL;
                } else {
                    // SAFETY: live neighbour.
                    unsafe { (*node(arena, removed.next)?).prev = ArenaPtr::NULL };
                }
            }
            End::Tail => {
                self.tail = removed.prev;
                if removed.prev.is_null() {
                    self.head = ArenaPtr::NULL;
                } else {
                    // SAFETY: live neighbour.
                    unsafe { (*node(arena, removed.prev)?).next = ArenaPtr::NULL };
                }
            }
        }
        self.len -= 1;

        removed.data.free(arena)?;
        arena.free(ptr)?;
        Ok(Some(bytes))
    }

    /// Copy every value out, head to tail.
    pub fn values(&self, arena: &Arena) -> SpatResult<Vec<Vec<u8>>> {
        let mut out = Vec::with_capacity(self.len as usize);
        let mut cur = self.head;
        while !cur.is_null() {
            // SAFETY: live node.
            let n = unsafe { *node(arena, cur)? };
            out.push(n.data.to_local(arena)?);
            cur = n.next;
        }
        Ok(out)
    }

    /// Free every node and its data.
    pub fn destroy(self, arena: &Arena) -> SpatResult<()> {
        let mut cur = self.head;
        while !cur.is_null() {
            // SAFETY: live node; read before it is freed.
            let n = unsafe { *node(arena, cur)? };
            n.data.free(arena)?;
            arena.free(cur)?;
            cur = n.next;
        }
        Ok(())
    }
}
