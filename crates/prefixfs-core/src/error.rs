//! Error types shared by every prefixfs crate.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for object-store calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// A path that failed local validation.
///
/// Raised before any store call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// The path starts with `/`.
    #[error("Invalid path '{path}': must not start with '/'")]
    LeadingSlash { path: String },

    /// The path ends with `/` (folder paths are stored without it).
    #[error("Invalid path '{path}': must not end with '/'")]
    TrailingSlash { path: String },

    /// Two consecutive separators.
    #[error("Invalid path '{path}': empty segment")]
    EmptySegment { path: String },

    /// `.` or `..` used as a segment.
    #[error("Invalid path '{path}': '{segment}' is a reserved segment")]
    ReservedSegment { path: String, segment: String },

    /// A control character appears in the path.
    #[error("Invalid path '{path}': contains control character {ch:?}")]
    ControlCharacter { path: String, ch: char },

    /// A single name contains a separator or is empty.
    #[error("Invalid name '{name}'")]
    InvalidName { name: String },
}

impl PathError {
    /// The offending path or name.
    pub fn path(&self) -> &str {
        match self {
            Self::LeadingSlash { path }
            | Self::TrailingSlash { path }
            | Self::EmptySegment { path }
            | Self::ReservedSegment { path, .. }
            | Self::ControlCharacter { path, .. } => path,
            Self::InvalidName { name } => name,
        }
    }
}

/// Errors returned by an [`ObjectStore`](crate::ObjectStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The key does not exist.
    #[error("Object not found: {key}")]
    NotFound { key: String },

    /// Transient transport failure.
    #[error("Network error on '{key}': {message}")]
    Network { key: String, message: String },

    /// The call was aborted through its cancellation token.
    #[error("Request cancelled")]
    Cancelled,

    /// The store does not implement an optional capability.
    #[error("Store does not support {operation}")]
    Unsupported { operation: &'static str },

    /// Local I/O failure in a store backed by the filesystem.
    #[error("I/O error on '{key}': {message}")]
    Io { key: String, message: String },
}

impl StoreError {
    /// Create a network error for a key.
    pub fn network(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create an I/O error with key context.
    pub fn io(key: impl Into<String>, source: &std::io::Error) -> Self {
        let key = key.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { key },
            _ => Self::Io {
                key,
                message: source.to_string(),
            },
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML could not be parsed.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}
