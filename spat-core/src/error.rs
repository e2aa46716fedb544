// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for spat.
//!
//! This module defines explicit enum error types as per coding guidelines.
//! No `Box<dyn Error>`, no `anyhow::Result` - all errors are strongly typed.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the spat engine.
/// All errors are explicit variants - no catch-all or generic handling.
#[derive(Debug, Error)]
pub enum SpatError {
    // =========================================================================
    // Engine Errors - surfaced to the command layer unchanged
    // =========================================================================
    #[error("Out of shared memory: cannot allocate {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("WRONGTYPE key '{key}' holds a {actual} value, operation expects {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Key not found: {key}")]
    KeyNotFound { key: String },

    #[error("Unsupported value: {reason}")]
    UnsupportedValue { reason: String },

    /// Shared state is corrupt. Fatal to the operation, never retried.
    #[error("Invariant violation: {reason}")]
    InvariantViolation { reason: String },

    // =========================================================================
    // Shared Memory Errors - No Fallback
    // =========================================================================
    #[error("Shared memory error: {0}")]
    SharedMemory(#[from] SharedMemoryError),

    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl SpatError {
    pub(crate) fn invariant(reason: impl Into<String>) -> Self {
        Self::InvariantViolation {
            reason: reason.into(),
        }
    }

    pub(crate) fn type_mismatch(key: &[u8], expected: &'static str, actual: &'static str) -> Self {
        Self::TypeMismatch {
            key: String::from_utf8_lossy(key).into_owned(),
            expected,
            actual,
        }
    }
}

/// Hard validation errors for configuration and names.
/// Used when input is invalid and the engine cannot safely start.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Arena size out of bounds: {size_bytes} bytes (min: {min}, max: {max})")]
    ArenaSizeOutOfBounds { size_bytes: u64, min: u64, max: u64 },
}

/// Shared memory errors - critical failures with no fallback.
#[derive(Debug, Error)]
pub enum SharedMemoryError {
    #[error("Failed to create shared memory region: {name} - {reason}")]
    CreateFailed { name: String, reason: String },

    #[error("Shared memory region already exists: {name}")]
    AlreadyExists { name: String },

    #[error("Failed to open shared memory region: {name} - {reason}")]
    OpenFailed { name: String, reason: String },

    #[error("Failed to map shared memory: {reason}")]
    MapFailed { reason: String },

    #[error("Failed to unlink shared memory region: {name} - {reason}")]
    UnlinkFailed { name: String, reason: String },

    #[error("Timed out waiting for {name} to be initialized")]
    InitTimeout { name: String },
}

/// Result type alias using SpatError.
pub type SpatResult<T> = Result<T, SpatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mismatch_display() {
        let err = SpatError::type_mismatch(b"my-key", "set", "string");
        let msg = err.to_string();
        assert!(msg.contains("my-key"));
        assert!(msg.contains("set"));
        assert!(msg.contains("string"));
    }

    #[test]
    fn test_error_chain() {
        let shm_err = SharedMemoryError::MapFailed {
            reason: "mmap failed".to_string(),
        };
        let err: SpatError = shm_err.into();
        assert!(matches!(err, SpatError::SharedMemory(_)));

        let validation_err = HardValidationError::InvalidFieldValue {
            field: "name",
            value: String::new(),
            reason: "empty".to_string(),
        };
        let err: SpatError = validation_err.into();
        assert!(matches!(err, SpatError::HardValidation(_)));
    }
}
