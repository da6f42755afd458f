//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tuning knobs shared by the move, clipboard, drag and upload engines.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct VfsConfig {
    /// Parallel copy requests within one folder move or copy.
    #[builder(default = "8")]
    pub max_concurrent_copies: usize,

    /// Parallel delete requests within one folder delete.
    #[builder(default = "8")]
    pub max_concurrent_deletes: usize,

    /// Files uploading at the same time.
    #[builder(default = "3")]
    pub max_concurrent_uploads: usize,

    /// Chunk requests in flight per uploading file.
    #[builder(default = "4")]
    pub max_concurrent_chunks: usize,

    /// Upload chunk size in bytes.
    #[builder(default = "DEFAULT_CHUNK_SIZE")]
    pub chunk_size: u64,

    /// Attempts per chunk before the upload fails.
    #[builder(default = "5")]
    pub max_chunk_attempts: u32,

    /// First retry delay; doubled after every failed attempt.
    #[builder(default = "500")]
    pub retry_base_delay_ms: u64,

    /// Hover time before a collapsed drop target auto-expands.
    #[builder(default = "700")]
    pub hover_expand_delay_ms: u64,
}

/// Default upload chunk size (8 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_copies: 8,
            max_concurrent_deletes: 8,
            max_concurrent_uploads: 3,
            max_concurrent_chunks: 4,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunk_attempts: 5,
            retry_base_delay_ms: 500,
            hover_expand_delay_ms: 700,
        }
    }
}

impl VfsConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        let limits = [
            ("max_concurrent_copies", self.max_concurrent_copies),
            ("max_concurrent_deletes", self.max_concurrent_deletes),
            ("max_concurrent_uploads", self.max_concurrent_uploads),
            ("max_concurrent_chunks", self.max_concurrent_chunks),
        ];
        for (name, value) in limits {
            if value == Some(0) {
                return Err(format!("{name} must be at least 1"));
            }
        }
        if self.chunk_size == Some(0) {
            return Err("chunk_size must be at least 1 byte".to_string());
        }
        if self.max_chunk_attempts == Some(0) {
            return Err("max_chunk_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

impl VfsConfig {
    /// Create a new config builder.
    pub fn builder() -> VfsConfigBuilder {
        VfsConfigBuilder::default()
    }

    /// Parse a TOML document; missing fields take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.check()?;
        Ok(config)
    }

    /// Load a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Re-run the builder validation on an already-built value.
    pub fn check(&self) -> Result<(), ConfigError> {
        Self::builder()
            .max_concurrent_copies(self.max_concurrent_copies)
            .max_concurrent_deletes(self.max_concurrent_deletes)
            .max_concurrent_uploads(self.max_concurrent_uploads)
            .max_concurrent_chunks(self.max_concurrent_chunks)
            .chunk_size(self.chunk_size)
            .max_chunk_attempts(self.max_chunk_attempts)
            .retry_base_delay_ms(self.retry_base_delay_ms)
            .hover_expand_delay_ms(self.hover_expand_delay_ms)
            .build()
            .map(|_| ())
            .map_err(|e| ConfigError::Invalid {
                message: e.to_string(),
            })
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }

    /// Hover time before auto-expanding a drop target.
    pub fn hover_expand_delay(&self) -> Duration {
        Duration::from_millis(self.hover_expand_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = VfsConfig::builder()
            .max_concurrent_uploads(2usize)
            .chunk_size(1024u64)
            .build()
            .unwrap();
        assert_eq!(config.max_concurrent_uploads, 2);
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.max_concurrent_copies, 8);
    }

    #[test]
    fn test_builder_rejects_zero_limits() {
        assert!(VfsConfig::builder().max_concurrent_chunks(0usize).build().is_err());
        assert!(VfsConfig::builder().chunk_size(0u64).build().is_err());
        assert!(VfsConfig::builder().max_chunk_attempts(0u32).build().is_err());
    }

    #[test]
    fn test_from_toml_defaults() {
        let config = VfsConfig::from_toml_str("max_concurrent_uploads = 5\n").unwrap();
        assert_eq!(config.max_concurrent_uploads, 5);
        assert_eq!(config.hover_expand_delay_ms, 700);
    }

    #[test]
    fn test_from_toml_invalid() {
        assert!(matches!(
            VfsConfig::from_toml_str("chunk_size = 0\n"),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            VfsConfig::from_toml_str("chunk_size = \"big\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefixfs.toml");
        std::fs::write(&path, "max_concurrent_copies = 2\n").unwrap();
        assert_eq!(VfsConfig::load(&path).unwrap().max_concurrent_copies, 2);
    }

    #[test]
    fn test_retry_delay_doubles() {
        let config = VfsConfig::default();
        assert_eq!(config.retry_delay(0), Duration::from_millis(500));
        assert_eq!(config.retry_delay(1), Duration::from_millis(1000));
        assert_eq!(config.retry_delay(3), Duration::from_millis(4000));
    }
}
