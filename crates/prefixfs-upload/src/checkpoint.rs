//! Upload checkpoints for resuming after a restart.

use std::path::Path;

use chrono::{DateTime, Utc};
use prefixfs_core::VfsPath;
use serde::{Deserialize, Serialize};

use crate::error::{UploadError, UploadResult};
use crate::task::{TaskId, UploadTask};

/// Everything needed to continue an interrupted upload.
///
/// Serialized as JSON next to whatever tracks the local file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadCheckpoint {
    /// Task id at the time the checkpoint was taken.
    pub task_id: TaskId,
    /// File name.
    pub name: String,
    /// Folder the file is uploaded into.
    pub destination: VfsPath,
    /// Final storage key.
    pub key: String,
    /// Total file size.
    pub total_bytes: u64,
    /// Chunk size the staged parts were cut with.
    pub chunk_size: u64,
    /// Highest contiguously committed chunk.
    pub chunk_cursor: Option<u32>,
    /// When the checkpoint was taken.
    pub saved_at: DateTime<Utc>,
}

impl UploadCheckpoint {
    pub(crate) fn from_task(task: &UploadTask) -> Self {
        Self {
            task_id: task.id,
            name: task.name.clone(),
            destination: task.destination.clone(),
            key: task.key.clone(),
            total_bytes: task.total_bytes,
            chunk_size: task.chunk_size,
            chunk_cursor: task.chunk_cursor,
            saved_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> UploadResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> UploadResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the checkpoint to `path`.
    pub async fn save(&self, path: impl AsRef<Path>) -> UploadResult<()> {
        let json = self.to_json()?;
        tokio::fs::write(path.as_ref(), json)
            .await
            .map_err(|e| UploadError::Checkpoint {
                message: format!("failed to write {}: {e}", path.as_ref().display()),
            })
    }

    /// Read a checkpoint from `path`, or `None` if there is none.
    pub async fn load(path: impl AsRef<Path>) -> UploadResult<Option<Self>> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(json) => Self::from_json(&json).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(UploadError::Checkpoint {
                message: format!("failed to read {}: {e}", path.display()),
            }),
        }
    }

    /// Remove a checkpoint file. A missing file is not an error.
    pub async fn delete(path: impl AsRef<Path>) -> UploadResult<()> {
        let path = path.as_ref();
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(UploadError::Checkpoint {
                message: format!("failed to delete {}: {e}", path.display()),
            }),
        }
    }
}
