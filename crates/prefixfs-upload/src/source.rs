//! Byte sources that can be read one chunk at a time.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use prefixfs_core::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{UploadError, UploadResult};

/// A file queued for upload.
///
/// Chunks are read on demand so only the chunks in flight are held in
/// memory.
pub trait UploadSource: Send + Sync {
    /// File name used for the destination key.
    fn name(&self) -> &str;

    /// Total size in bytes.
    fn len(&self) -> u64;

    /// Whether the source holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read `len` bytes starting at `offset`.
    fn read_chunk(&self, offset: u64, len: usize) -> BoxFuture<'_, UploadResult<Vec<u8>>>;
}

/// An in-memory file.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    name: String,
    data: Arc<[u8]>,
}

impl MemoryFile {
    pub fn new(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// The file contents.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl UploadSource for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_chunk(&self, offset: u64, len: usize) -> BoxFuture<'_, UploadResult<Vec<u8>>> {
        Box::pin(async move {
            let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.data.len());
            let end = start.saturating_add(len).min(self.data.len());
            Ok(self.data[start..end].to_vec())
        })
    }
}

/// A file on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
    name: String,
    len: u64,
}

impl LocalFile {
    /// Open `path`, recording its current size.
    pub async fn open(path: impl AsRef<Path>) -> UploadResult<Self> {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| read_error(&name, &e))?;
        Ok(Self {
            path,
            name,
            len: metadata.len(),
        })
    }

    /// Upload under a different file name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_error(name: &str, err: &std::io::Error) -> UploadError {
    UploadError::Read {
        name: name.to_string(),
        message: err.to_string(),
    }
}

impl UploadSource for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn read_chunk(&self, offset: u64, len: usize) -> BoxFuture<'_, UploadResult<Vec<u8>>> {
        Box::pin(async move {
            let mut file = tokio::fs::File::open(&self.path)
                .await
                .map_err(|e| read_error(&self.name, &e))?;
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(|e| read_error(&self.name, &e))?;
            let mut buf = Vec::with_capacity(len);
            file.take(len as u64)
                .read_to_end(&mut buf)
                .await
                .map_err(|e| read_error(&self.name, &e))?;
            Ok(buf)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_file_reads_past_end_short() {
        let file = MemoryFile::new("a.bin", vec![1u8, 2, 3, 4, 5]);
        assert_eq!(file.read_chunk(0, 2).await.unwrap(), vec![1, 2]);
        assert_eq!(file.read_chunk(4, 2).await.unwrap(), vec![5]);
        assert!(file.read_chunk(9, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_file_reads_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, (0u8..100).collect::<Vec<_>>()).unwrap();

        let file = LocalFile::open(&path).await.unwrap();
        assert_eq!(file.name(), "data.bin");
        assert_eq!(file.len(), 100);
        assert_eq!(file.read_chunk(90, 20).await.unwrap(), (90u8..100).collect::<Vec<_>>());
    }
}
