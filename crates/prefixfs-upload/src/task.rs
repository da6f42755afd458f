//! Upload task state.

use prefixfs_core::VfsPath;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::UploadError;

/// Identifier of a queued upload.
pub type TaskId = u64;

/// Lifecycle of an upload task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UploadStatus {
    /// Queued, or suspended with its cursor kept.
    #[default]
    Pending,
    /// Holding one of the file-level upload slots.
    Uploading,
    /// Every byte is in the store.
    Completed,
    /// Stopped with an error (see [`UploadTask::error`]).
    Failed,
}

impl UploadStatus {
    /// Whether the task will not change again without a resume.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A file being uploaded.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadTask {
    pub id: TaskId,
    /// File name.
    pub name: String,
    /// Folder the file is uploaded into.
    pub destination: VfsPath,
    /// Final storage key.
    pub key: String,
    pub total_bytes: u64,
    pub chunk_size: u64,
    /// Number of chunks the file splits into. An empty file is one empty chunk.
    pub chunks: u32,
    pub status: UploadStatus,
    /// Completion, 0 to 100.
    pub progress: f64,
    /// Highest chunk index committed together with every chunk before it.
    pub chunk_cursor: Option<u32>,
    /// Why the task failed.
    pub error: Option<UploadError>,
}

impl UploadTask {
    pub fn chunk_count(&self) -> u32 {
        self.chunks
    }

    /// First chunk still to send.
    pub fn next_chunk(&self) -> u32 {
        self.chunk_cursor.map_or(0, |c| c + 1)
    }

    /// Bytes covered by chunks `0..=chunk_cursor`.
    pub fn committed_bytes(&self) -> u64 {
        match self.chunk_cursor {
            Some(cursor) => ((cursor as u64 + 1) * self.chunk_size).min(self.total_bytes),
            None => 0,
        }
    }
}

/// Chunks needed for `total_bytes`, or `None` when a chunk index would
/// not fit in a `u32`.
pub fn chunk_count(total_bytes: u64, chunk_size: u64) -> Option<u32> {
    let chunk_size = chunk_size.max(1);
    u32::try_from(total_bytes.div_ceil(chunk_size).max(1)).ok()
}

/// Sent after every committed chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadProgress {
    pub task_id: TaskId,
    pub bytes_sent: u64,
    pub total_bytes: u64,
    pub progress_percent: f64,
}

impl UploadProgress {
    pub(crate) fn new(task_id: TaskId, bytes_sent: u64, total_bytes: u64) -> Self {
        Self {
            task_id,
            bytes_sent,
            total_bytes,
            progress_percent: percent(bytes_sent, total_bytes),
        }
    }
}

pub(crate) fn percent(sent: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        (sent as f64 / total as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_count() {
        const MB: u64 = 1024 * 1024;
        assert_eq!(chunk_count(250 * MB, 10 * MB), Some(25));
        assert_eq!(chunk_count(250 * MB + 1, 10 * MB), Some(26));
        assert_eq!(chunk_count(0, 10 * MB), Some(1));
        assert_eq!(chunk_count(5, 10 * MB), Some(1));
    }

    #[test]
    fn test_chunk_count_overflow() {
        let max = u64::from(u32::MAX);
        assert_eq!(chunk_count(max, 1), Some(u32::MAX));
        assert_eq!(chunk_count(max + 100, 1), None);
        assert_eq!(chunk_count(max * 10 + 1, 10), None);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(UploadStatus::Uploading.to_string(), "uploading");
        assert!(UploadStatus::Failed.is_terminal());
        assert!(!UploadStatus::Pending.is_terminal());
    }

    #[test]
    fn test_committed_bytes_clamped() {
        let task = UploadTask {
            id: 1,
            name: "a".into(),
            destination: VfsPath::root(),
            key: "a".into(),
            total_bytes: 25,
            chunk_size: 10,
            chunks: 3,
            status: UploadStatus::Pending,
            progress: 0.0,
            chunk_cursor: Some(2),
            error: None,
        };
        assert_eq!(task.committed_bytes(), 25);
        assert_eq!(task.next_chunk(), 3);
        assert_eq!(task.chunk_count(), 3);
    }
}
