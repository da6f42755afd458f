//! Errors raised by the mutating engines.

use prefixfs_core::{PathError, StoreError};
use thiserror::Error;

/// Result type for engine operations.
pub type OpsResult<T> = Result<T, OpsError>;

/// Errors from move, rename, copy, delete and paste.
#[derive(Debug, Error)]
pub enum OpsError {
    /// A path or key failed validation. No store call was made.
    #[error(transparent)]
    InvalidPath(#[from] PathError),

    /// The move would create a cycle or is otherwise meaningless.
    /// No store call was made.
    #[error("Cannot move '{from}' to '{to}': {reason}")]
    InvalidMove {
        from: String,
        to: String,
        reason: String,
    },

    /// An object with the same name already exists at the destination.
    #[error("'{name}' already exists in '{parent}'")]
    NameConflict {
        parent: String,
        name: String,
        existing_key: String,
    },

    /// The source key does not exist.
    #[error("Nothing exists at '{key}'")]
    NotFound { key: String },

    /// Every copy succeeded but some originals could not be deleted.
    /// The listed keys now exist at both locations.
    #[error("Moved '{from}' to '{to}' but {} original(s) could not be deleted", undeleted.len())]
    PartialMove {
        from: String,
        to: String,
        undeleted: Vec<String>,
    },

    /// Some keys of a folder delete failed; the rest are gone.
    #[error("{} of {total} key(s) could not be deleted", failed.len())]
    PartialDelete { failed: Vec<String>, total: usize },

    /// The clipboard item was not captured from the clipboard's source folder.
    #[error("'{key}' is not inside '{source_path}'")]
    MixedSource { key: String, source_path: String },

    /// A store call failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OpsError {
    pub(crate) fn invalid_move(from: &str, to: &str, reason: impl Into<String>) -> Self {
        Self::InvalidMove {
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the error was raised locally, before any store call.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::InvalidPath(_) | Self::InvalidMove { .. } | Self::MixedSource { .. }
        )
    }

    /// Whether the store was left holding a split state that needs the
    /// user to decide what to do.
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::PartialMove { .. } | Self::PartialDelete { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let cycle = OpsError::invalid_move("photos", "photos/2024/photos", "cycle");
        assert!(cycle.is_local());
        assert!(!cycle.is_partial());

        let partial = OpsError::PartialMove {
            from: "docs/a".into(),
            to: "archive/a".into(),
            undeleted: vec!["docs/a".into()],
        };
        assert!(partial.is_partial());
        assert!(partial.to_string().contains("1 original"));
    }

    #[test]
    fn test_store_error_converts() {
        let err: OpsError = StoreError::network("k", "reset").into();
        assert!(matches!(err, OpsError::Store(StoreError::Network { .. })));
        assert!(!err.is_local());
    }
}
