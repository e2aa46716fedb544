// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Root store entries with typed value transitions.
//!
//! Every key of a database maps to an [`Entry`] in the root directory. The
//! value is a tagged union; the tag decides which payload is valid and the
//! payload must be torn down before the tag changes.
//!
//! Transitions: a new entry starts `Null`. The first write picks the tag.
//! After that only a string overwrite (`Null`/`String` to `String`) or a
//! delete may change it; anything else is a type mismatch.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::arena::Arena;
use crate::composite::{HashHeader, ListHeader, SetHeader};
use crate::directory::DirectoryParams;
use crate::dss::Dss;
use crate::error::{SpatError, SpatResult};
use crate::types::{Expiry, Timestamp};

/// Value kinds, as reported by `TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueTag {
    /// Never initialized. Seeing one means shared memory is corrupt.
    Invalid,
    Null,
    String,
    Set,
    List,
    Hash,
}

impl ValueTag {
    /// Get the tag name for replies and error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Null => "null",
            Self::String => "string",
            Self::Set => "set",
            Self::List => "list",
            Self::Hash => "hash",
        }
    }

    /// Check if a write of kind `target` may be applied to a value of this kind.
    pub fn can_transition_to(&self, target: ValueTag) -> bool {
        matches!(
            (self, target),
            // First write picks the kind
            (Self::Null, Self::String | Self::Set | Self::List | Self::Hash) |
            // Plain string overwrite
            (Self::String, Self::String) |
            // Same-kind composite updates
            (Self::Set, Self::Set) |
            (Self::List, Self::List) |
            (Self::Hash, Self::Hash)
        )
    }
}

impl fmt::Display for ValueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Payload of an entry.
#[repr(C, u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Invalid,
    Null,
    String(Dss),
    Set(SetHeader),
    List(ListHeader),
    Hash(HashHeader),
}

impl Value {
    pub const fn tag(&self) -> ValueTag {
        match self {
            Self::Invalid => ValueTag::Invalid,
            Self::Null => ValueTag::Null,
            Self::String(_) => ValueTag::String,
            Self::Set(_) => ValueTag::Set,
            Self::List(_) => ValueTag::List,
            Self::Hash(_) => ValueTag::Hash,
        }
    }

    /// Free all arena storage owned by the payload.
    pub fn teardown(self, arena: &Arena) -> SpatResult<()> {
        match self {
            Self::Invalid | Self::Null => Ok(()),
            Self::String(s) => s.free(arena),
            Self::Set(set) => set.destroy(arena),
            Self::List(list) => list.destroy(arena),
            Self::Hash(hash) => hash.destroy(arena),
        }
    }
}

/// One key of the root store.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub key: Dss,
    pub expire_at: Expiry,
    pub value: Value,
}

impl Entry {
    pub fn tag(&self) -> ValueTag {
        self.value.tag()
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expire_at.is_expired(now)
    }

    /// Tag as seen by readers: expired entries read as `Null`.
    pub fn visible_tag(&self, now: Timestamp) -> ValueTag {
        if self.is_expired(now) {
            ValueTag::Null
        } else {
            self.tag()
        }
    }

    /// Reject entries whose tag can only come from corrupt memory.
    pub fn check(&self) -> SpatResult<()> {
        match self.value {
            Value::Invalid => Err(SpatError::invariant("root entry has an invalid value tag")),
            _ => Ok(()),
        }
    }

    /// Drop the payload and expiry, leaving a `Null` entry.
    pub fn reset(&mut self, arena: &Arena) -> SpatResult<()> {
        let old = std::mem::replace(&mut self.value, Value::Null);
        self.expire_at = Expiry::Never;
        old.teardown(arena)
    }

    /// Make the entry writable by an operation producing `target`.
    ///
    /// Expired entries are reset first. Returns a type mismatch if the live
    /// value holds a different kind.
    pub fn prepare_write(
        &mut self,
        arena: &Arena,
        key: &[u8],
        target: ValueTag,
        now: Timestamp,
    ) -> SpatResult<()> {
        self.check()?;
        if self.is_expired(now) {
            tracing::debug!(tag = %self.tag(), "Resetting expired entry on write");
            self.reset(arena)?;
        }

        let current = self.tag();
        if !current.can_transition_to(target) {
            return Err(SpatError::type_mismatch(key, target.name(), current.name()));
        }
        Ok(())
    }
}

/// Root directory layout: DSS key to [`Entry`].
pub struct RootParams;

impl DirectoryParams for RootParams {
    type Entry = Entry;

    fn key(entry: &Entry) -> &Dss {
        &entry.key
    }

    fn new_entry(key: Dss) -> Entry {
        Entry {
            key,
            expire_at: Expiry::Never,
            value: Value::Null,
        }
    }

    fn release(arena: &Arena, entry: Entry) -> SpatResult<()> {
        entry.value.teardown(arena)?;
        entry.key.free(arena)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_names() {
        assert_eq!(ValueTag::Null.name(), "null");
        assert_eq!(ValueTag::String.to_string(), "string");
        assert_eq!(Value::Set(SetHeader::default()).tag(), ValueTag::Set);
        assert_eq!(Value::List(ListHeader::default()).tag(), ValueTag::List);
        assert_eq!(Value::Hash(HashHeader::default()).tag(), ValueTag::Hash);
    }

    #[test]
    fn test_valid_transitions() {
        assert!(ValueTag::Null.can_transition_to(ValueTag::Set));
        assert!(ValueTag::Null.can_transition_to(ValueTag::String));
        assert!(ValueTag::String.can_transition_to(ValueTag::String));
        assert!(ValueTag::List.can_transition_to(ValueTag::List));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!ValueTag::String.can_transition_to(ValueTag::Set));
        assert!(!ValueTag::Set.can_transition_to(ValueTag::String));
        assert!(!ValueTag::Hash.can_transition_to(ValueTag::List));
        assert!(!ValueTag::Invalid.can_transition_to(ValueTag::String));
    }

    #[test]
    fn test_expired_entry_reads_null() {
        let entry = Entry {
            key: Dss::EMPTY,
            expire_at: Expiry::At(Timestamp::from_micros(100)),
            value: Value::Null,
        };
        assert!(entry.is_expired(Timestamp::from_micros(100)));
        assert_eq!(entry.visible_tag(Timestamp::from_micros(200)), ValueTag::Null);
        assert!(!entry.is_expired(Timestamp::from_micros(99)));
    }

    #[test]
    fn test_invalid_entry_rejected() {
        let entry = Entry {
            key: Dss::EMPTY,
            expire_at: Expiry::Never,
            value: Value::Invalid,
        };
        assert!(matches!(
            entry.check(),
            Err(SpatError::InvariantViolation { .. })
        ));
    }
}
