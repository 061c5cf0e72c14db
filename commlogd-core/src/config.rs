//! Storage configuration for commlogd.
//!
//! The daemon keeps a durable copy of every message-part file it accepts
//! (the transport engine's spool is transient). [`StorageConfig`] says
//! where those copies live.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, CoreError};

/// Where durable message data is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for per-message part files. Each message gets a
    /// subdirectory named after its event id.
    pub message_parts_root: PathBuf,
}

impl StorageConfig {
    pub fn new(message_parts_root: impl Into<PathBuf>) -> Self {
        Self {
            message_parts_root: message_parts_root.into(),
        }
    }

    /// Parses a configuration from a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: StorageConfig = toml::from_str(input)?;
        if config.message_parts_root.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "message_parts_root".to_string(),
                reason: "path must not be empty".to_string(),
            });
        }
        Ok(config)
    }

    /// Directory holding the part files of one message.
    pub fn message_part_dir(&self, event_id: i64) -> PathBuf {
        self.message_parts_root.join(event_id.to_string())
    }
}

/// Creates a directory and its parents if missing.
pub fn ensure_dir_exists(path: &Path) -> Result<(), CoreError> {
    std::fs::create_dir_all(path).map_err(|source| CoreError::Filesystem {
        message: "failed to create directory".to_string(),
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_config() {
        let config = StorageConfig::from_toml_str("message_parts_root = \"/var/lib/commlogd/parts\"").unwrap();
        assert_eq!(
            config.message_part_dir(42),
            PathBuf::from("/var/lib/commlogd/parts/42")
        );
    }

    #[test]
    fn empty_root_is_rejected() {
        let err = StorageConfig::from_toml_str("message_parts_root = \"\"").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn garbage_toml_is_rejected() {
        assert!(StorageConfig::from_toml_str("not toml at all [").is_err());
    }

    #[test]
    fn ensure_dir_exists_creates_nested_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        ensure_dir_exists(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
