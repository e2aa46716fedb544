// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict schema validation.
//!
//! Selects which named database a process attaches to and how the arena
//! behind a newly created database is sized. Any invalid field results in a
//! HardValidationError before shared memory is touched.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HardValidationError, SpatError, SpatResult};
use crate::types::{DbName, Namespace, DEFAULT_DB_NAME};

const MIN_SEGMENT_SIZE: u64 = 64 * 1024;
const MAX_SEGMENT_SIZE: u64 = 1024 * 1024 * 1024;
const MAX_TOTAL_SIZE: u64 = 64 * 1024 * 1024 * 1024;

/// Raw database section as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
struct RawDatabaseConfig {
    #[serde(default = "default_db_name")]
    name: String,
    #[serde(default = "default_namespace")]
    namespace: String,
}

fn default_db_name() -> String {
    DEFAULT_DB_NAME.to_string()
}

fn default_namespace() -> String {
    Namespace::default().to_string()
}

impl Default for RawDatabaseConfig {
    fn default() -> Self {
        Self {
            name: default_db_name(),
            namespace: default_namespace(),
        }
    }
}

/// Raw arena section.
#[derive(Debug, Deserialize)]
struct RawArenaConfig {
    #[serde(default = "default_initial_segment_size")]
    initial_segment_size: u64,
    #[serde(default = "default_max_total_size")]
    max_total_size: u64,
}

fn default_initial_segment_size() -> u64 {
    1024 * 1024 // 1MB
}

fn default_max_total_size() -> u64 {
    1024 * 1024 * 1024 // 1GB
}

impl Default for RawArenaConfig {
    fn default() -> Self {
        Self {
            initial_segment_size: default_initial_segment_size(),
            max_total_size: default_max_total_size(),
        }
    }
}

/// Raw root configuration file.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    database: RawDatabaseConfig,
    #[serde(default)]
    arena: RawArenaConfig,
}

/// Validated database selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub name: DbName,
    pub namespace: Namespace,
}

/// Validated arena sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaConfig {
    pub initial_segment_size: usize,
    pub max_total_size: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            initial_segment_size: default_initial_segment_size() as usize,
            max_total_size: default_max_total_size() as usize,
        }
    }
}

/// Complete validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database: DatabaseConfig,
    pub arena: ArenaConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                name: DbName::default(),
                namespace: Namespace::default(),
            },
            arena: ArenaConfig::default(),
        }
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    /// Returns HardValidationError for any invalid fields.
    pub fn load_file(path: impl AsRef<Path>) -> SpatResult<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(SpatError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| SpatError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    /// An empty document yields the defaults.
    pub fn load_string(content: &str) -> SpatResult<Config> {
        let raw: RawConfig = if content.trim().is_empty() {
            RawConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| SpatError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?
        };

        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> SpatResult<Config> {
        let database = DatabaseConfig {
            name: DbName::new(raw.database.name)?,
            namespace: Namespace::new(raw.database.namespace)?,
        };
        let arena = Self::validate_arena(raw.arena)?;

        Ok(Config { database, arena })
    }

    fn validate_arena(raw: RawArenaConfig) -> SpatResult<ArenaConfig> {
        if raw.initial_segment_size < MIN_SEGMENT_SIZE
            || raw.initial_segment_size > MAX_SEGMENT_SIZE
        {
            return Err(HardValidationError::ArenaSizeOutOfBounds {
                size_bytes: raw.initial_segment_size,
                min: MIN_SEGMENT_SIZE,
                max: MAX_SEGMENT_SIZE,
            }
            .into());
        }

        if raw.max_total_size < raw.initial_segment_size {
            return Err(HardValidationError::InvalidFieldValue {
                field: "arena.max_total_size",
                value: raw.max_total_size.to_string(),
                reason: format!(
                    "Must be at least the initial segment size ({} bytes)",
                    raw.initial_segment_size
                ),
            }
            .into());
        }

        if raw.max_total_size > MAX_TOTAL_SIZE {
            return Err(HardValidationError::ArenaSizeOutOfBounds {
                size_bytes: raw.max_total_size,
                min: raw.initial_segment_size,
                max: MAX_TOTAL_SIZE,
            }
            .into());
        }

        Ok(ArenaConfig {
            initial_segment_size: raw.initial_segment_size as usize,
            max_total_size: raw.max_total_size as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_CONFIG: &str = r#"
database:
  name: sessions
  namespace: app

arena:
  initial_segment_size: 2097152
  max_total_size: 268435456
"#;

    #[test]
    fn test_valid_config() {
        let config = ConfigLoader::load_string(VALID_CONFIG).unwrap();
        assert_eq!(config.database.name.as_str(), "sessions");
        assert_eq!(config.database.namespace.as_str(), "app");
        assert_eq!(config.arena.initial_segment_size, 2 * 1024 * 1024);
        assert_eq!(config.arena.max_total_size, 256 * 1024 * 1024);
    }

    #[test]
    fn test_defaults_applied() {
        let config = ConfigLoader::load_string("database:\n  name: other\n").unwrap();
        assert_eq!(config.database.name.as_str(), "other");
        assert_eq!(config.database.namespace.as_str(), "spat");
        assert_eq!(config.arena, ArenaConfig::default());
    }

    #[test]
    fn test_empty_document() {
        let config = ConfigLoader::load_string("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.database.name.as_str(), DEFAULT_DB_NAME);
    }

    #[test]
    fn test_invalid_db_name() {
        let yaml = r#"
database:
  name: "bad/name"
"#;
        let result = ConfigLoader::load_string(yaml);
        assert!(matches!(result, Err(SpatError::HardValidation(_))));
    }

    #[test]
    fn test_segment_too_small() {
        let yaml = r#"
arena:
  initial_segment_size: 1024
"#;
        let result = ConfigLoader::load_string(yaml);
        assert!(matches!(
            result,
            Err(SpatError::HardValidation(
                HardValidationError::ArenaSizeOutOfBounds { .. }
            ))
        ));
    }

    #[test]
    fn test_max_below_initial() {
        let yaml = r#"
arena:
  initial_segment_size: 4194304
  max_total_size: 1048576
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_malformed_yaml() {
        let result = ConfigLoader::load_string("database: [unclosed");
        assert!(matches!(result, Err(SpatError::ConfigParse { .. })));
    }
}
