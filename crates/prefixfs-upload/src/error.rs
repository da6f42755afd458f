//! Upload error types.

use prefixfs_core::{PathError, StoreError};
use thiserror::Error;

/// Result type for upload operations.
pub type UploadResult<T> = Result<T, UploadError>;

/// Errors from the upload pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    /// The destination path or file name is invalid.
    #[error(transparent)]
    InvalidPath(#[from] PathError),

    /// A store call failed. Chunk writes only surface this after every
    /// retry is spent.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The upload cannot continue from where it stopped; it has to be
    /// restarted from the first byte.
    #[error("Cannot resume upload of '{key}': {reason}")]
    ResumeUnsupported { key: String, reason: String },

    /// The file needs more chunks than a part index can address.
    #[error("'{name}' ({bytes} bytes) needs too many {chunk_size}-byte chunks")]
    TooManyChunks {
        name: String,
        bytes: u64,
        chunk_size: u64,
    },

    /// The task was cancelled.
    #[error("Upload cancelled")]
    Cancelled,

    /// Reading the local file failed.
    #[error("Failed to read '{name}': {message}")]
    Read { name: String, message: String },

    /// A checkpoint could not be written or parsed.
    #[error("Invalid upload checkpoint: {message}")]
    Checkpoint { message: String },

    /// No task has this id.
    #[error("No upload task with id {id}")]
    UnknownTask { id: u64 },

    /// The task is not in a state that allows the request.
    #[error("Upload {id} is {status}")]
    InvalidState { id: u64, status: String },
}

impl UploadError {
    pub(crate) fn resume_unsupported(key: &str, reason: impl Into<String>) -> Self {
        Self::ResumeUnsupported {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the chunk request that raised this may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_transient())
    }
}

impl From<serde_json::Error> for UploadError {
    fn from(err: serde_json::Error) -> Self {
        Self::Checkpoint {
            message: err.to_string(),
        }
    }
}
