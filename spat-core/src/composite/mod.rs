// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Composite values: sets, hashes and lists.
//!
//! Each composite keeps a small header inline in its root [`Entry`] and the
//! rest of its storage in the arena. Headers are only touched while the
//! owning entry is locked exclusively (reads: shared), and each has a
//! `destroy` that frees nested storage in reverse construction order.
//!
//! [`Entry`]: crate::entry::Entry

mod hash;
mod list;
mod set;

pub use hash::{HashField, HashHeader, HashParams};
pub use list::ListHeader;
pub use set::{SetHeader, SetMember, SetParams};

use crate::entry::{Value, ValueTag};

/// Maps a composite header to and from the entry value that holds it.
pub(crate) trait Composite: Default {
    const TAG: ValueTag;

    fn from_value(value: &Value) -> Option<&Self>;

    fn from_value_mut(value: &mut Value) -> Option<&mut Self>;

    fn into_value(self) -> Value;
}

impl Composite for SetHeader {
    const TAG: ValueTag = ValueTag::Set;

    fn from_value(value: &Value) -> Option<&Self> {
        match value {
            Value::Set(set) => Some(set),
            _ => None,
        }
    }

    fn from_value_mut(value: &mut Value) -> Option<&mut Self> {
        match value {
            Value::Set(set) => Some(set),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Set(self)
    }
}

impl Composite for ListHeader {
    const TAG: ValueTag = ValueTag::List;

    fn from_value(value: &Value) -> Option<&Self> {
        match value {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    fn from_value_mut(value: &mut Value) -> Option<&mut Self> {
        match value {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::List(self)
    }
}

impl Composite for HashHeader {
    const TAG: ValueTag = ValueTag::Hash;

    fn from_value(value: &Value) -> Option<&Self> {
        match value {
            Value::Hash(hash) => Some(hash),
            _ => None,
        }
    }

    fn from_value_mut(value: &mut Value) -> Option<&mut Self> {
        match value {
            Value::Hash(hash) => Some(hash),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Hash(self)
    }
}
