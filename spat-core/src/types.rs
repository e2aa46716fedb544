// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! Following the "Newtype" pattern in Rust to ensure valid state by construction.
//! Names end up inside shared memory object names, so they are validated
//! before anything touches `/dev/shm`.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;

/// Maximum length of a database name; fits the 64-byte name slot of the
/// database control block.
pub const MAX_DB_NAME_LEN: usize = 63;

/// Maximum length of a namespace prefix.
pub const MAX_NAMESPACE_LEN: usize = 32;

/// Database attached when no name is configured.
pub const DEFAULT_DB_NAME: &str = "spat-default";

fn validate_shm_component(
    field: &'static str,
    value: &str,
    max_len: usize,
) -> Result<(), HardValidationError> {
    if value.is_empty() {
        return Err(HardValidationError::InvalidFieldValue {
            field,
            value: value.to_string(),
            reason: "Cannot be empty".to_string(),
        });
    }

    if value.len() > max_len {
        return Err(HardValidationError::InvalidFieldValue {
            field,
            value: value.to_string(),
            reason: format!("Too long: {} chars (max {})", value.len(), max_len),
        });
    }

    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(HardValidationError::InvalidFieldValue {
            field,
            value: value.to_string(),
            reason: "Must contain only ASCII alphanumeric characters, hyphens, and underscores"
                .to_string(),
        });
    }

    Ok(())
}

/// Validated database name.
/// Non-empty, ASCII alphanumeric with hyphens/underscores, max 63 chars.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DbName(String);

impl DbName {
    /// Create a new DbName with validation.
    pub fn new(name: impl Into<String>) -> Result<Self, HardValidationError> {
        let name = name.into();
        validate_shm_component("database.name", &name, MAX_DB_NAME_LEN)?;
        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DbName {
    fn default() -> Self {
        Self(DEFAULT_DB_NAME.to_string())
    }
}

impl fmt::Display for DbName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for DbName {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DbName> for String {
    fn from(name: DbName) -> Self {
        name.0
    }
}

/// Validated prefix for every shared memory object a database creates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    pub fn new(prefix: impl Into<String>) -> Result<Self, HardValidationError> {
        let prefix = prefix.into();
        validate_shm_component("database.namespace", &prefix, MAX_NAMESPACE_LEN)?;
        Ok(Self(prefix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the control block object for a database.
    pub fn control_object(&self, db: &DbName) -> String {
        format!("{}.db.{}", self.0, db)
    }

    /// Name of one arena segment object.
    pub fn segment_object(&self, arena_handle: u64, index: usize) -> String {
        format!("{}.arena.{:016x}.{}", self.0, arena_handle, index)
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self("spat".to_string())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Namespace {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self {
        ns.0
    }
}

/// Wall-clock instant in microseconds since the Unix epoch.
///
/// Stored inside shared memory, so it must be plain data that every
/// attached process interprets the same way.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Self(micros)
    }

    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub const fn as_micros(&self) -> i64 {
        self.0
    }

    /// This instant shifted forward by `ttl`, saturating.
    pub fn after(&self, ttl: Duration) -> Self {
        let delta = i64::try_from(ttl.as_micros()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(delta))
    }

    /// Time left until this instant, or `None` once it has passed.
    pub fn remaining_from(&self, now: Timestamp) -> Option<Duration> {
        let delta = self.0.checked_sub(now.0)?;
        (delta > 0).then(|| Duration::from_micros(delta as u64))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.div_euclid(1_000_000);
        let micros = self.0.rem_euclid(1_000_000);
        write!(f, "{}.{:06}", secs, micros)
    }
}

/// Per-key expiry metadata.
#[repr(C, u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Never,
    At(Timestamp),
}

impl Expiry {
    /// Expiry for a key written with an optional time-to-live.
    pub fn from_ttl(ttl: Option<Duration>) -> Self {
        match ttl {
            Some(ttl) => Self::At(Timestamp::now().after(ttl)),
            None => Self::Never,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        match self {
            Self::Never => false,
            Self::At(at) => *at <= now,
        }
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            Self::Never => None,
            Self::At(at) => Some(*at),
        }
    }
}
