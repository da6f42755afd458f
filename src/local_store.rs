//! Directory-backed object store.
//!
//! Keys map to paths relative to the root directory. Folder keys map to
//! directories, so an empty folder survives as an empty directory. Staged
//! upload parts live under `.pfs-staging`, which listings never show.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use jwalk::WalkDir;
use prefixfs_core::{BoxFuture, ObjectStore, StorageObject, StoreError, StoreResult, VfsPath};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Directory holding staged upload parts.
pub const STAGING_DIR: &str = ".pfs-staging";

/// Object store over a local directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Open a store rooted at an existing directory.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref();
        let root = root.canonicalize().map_err(|e| io_error("", &e))?;
        if !root.is_dir() {
            return Err(StoreError::Io {
                key: String::new(),
                message: format!("{} is not a directory", root.display()),
            });
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path for a key, rejecting keys that could escape the root.
    fn resolve(&self, key: &str) -> StoreResult<PathBuf> {
        let (path, _) = VfsPath::from_key(key).map_err(|e| StoreError::Io {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        if path.as_str().split('/').next() == Some(STAGING_DIR) {
            return Err(StoreError::Io {
                key: key.to_string(),
                message: format!("{STAGING_DIR} is reserved"),
            });
        }
        Ok(path.as_str().split('/').fold(self.root.clone(), |acc, seg| acc.join(seg)))
    }

    fn parts_dir(&self, key: &str) -> StoreResult<PathBuf> {
        let target = self.resolve(key)?;
        let relative = target.strip_prefix(&self.root).unwrap_or(&target);
        let mut dir = self.root.join(STAGING_DIR).join(relative);
        dir.as_mut_os_string().push(".parts");
        Ok(dir)
    }

    fn walk(&self, prefix: &str) -> StoreResult<Vec<StorageObject>> {
        // Walk the deepest directory the prefix names in full.
        let dir_part = prefix.rfind('/').map_or("", |i| &prefix[..=i]);
        let start = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.resolve(dir_part)?
        };
        if !start.is_dir() {
            return Ok(Vec::new());
        }

        let walker = WalkDir::new(&start)
            .skip_hidden(false)
            .sort(true)
            .process_read_dir(|_, _, _, children| {
                children.retain(|child| {
                    child
                        .as_ref()
                        .map_or(true, |entry| entry.file_name() != STAGING_DIR)
                });
            });

        let mut objects = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| StoreError::Io {
                key: prefix.to_string(),
                message: e.to_string(),
            })?;
            let path = entry.path();
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let mut key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            if key.is_empty() {
                continue;
            }
            let is_dir = entry.file_type().is_dir();
            if is_dir {
                key.push('/');
            }
            if !key.starts_with(prefix) {
                continue;
            }
            let metadata = entry.metadata().map_err(|e| StoreError::Io {
                key: key.clone(),
                message: e.to_string(),
            })?;
            let modified: DateTime<Utc> = metadata.modified().map(DateTime::from).unwrap_or_else(|_| Utc::now());
            let size = if is_dir { 0 } else { metadata.len() };
            objects.push(StorageObject::new(key, size, modified));
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}

fn io_error(key: &str, err: &std::io::Error) -> StoreError {
    if err.kind() == ErrorKind::NotFound {
        StoreError::NotFound { key: key.to_string() }
    } else {
        StoreError::Io {
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}

async fn ensure_parent(path: &Path, key: &str) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(key, &e))?;
    }
    Ok(())
}

fn part_file(dir: &Path, index: u32) -> PathBuf {
    dir.join(format!("{index:08}"))
}

impl ObjectStore for LocalStore {
    fn list_objects<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, StoreResult<Vec<StorageObject>>> {
        Box::pin(async move {
            debug!(target: "local_store", %prefix, "walking");
            let store = self.clone();
            let prefix_owned = prefix.to_string();
            tokio::task::spawn_blocking(move || store.walk(&prefix_owned))
                .await
                .map_err(|e| StoreError::Io {
                    key: prefix.to_string(),
                    message: e.to_string(),
                })?
        })
    }

    fn get_object<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StoreResult<Vec<u8>>> {
        Box::pin(async move {
            let path = self.resolve(key)?;
            if key.ends_with('/') {
                return if path.is_dir() {
                    Ok(Vec::new())
                } else {
                    Err(StoreError::NotFound { key: key.to_string() })
                };
            }
            tokio::fs::read(&path).await.map_err(|e| io_error(key, &e))
        })
    }

    fn put_object<'a>(&'a self, key: &'a str, data: Vec<u8>) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let path = self.resolve(key)?;
            if key.ends_with('/') {
                return tokio::fs::create_dir_all(&path)
                    .await
                    .map_err(|e| io_error(key, &e));
            }
            ensure_parent(&path, key).await?;
            tokio::fs::write(&path, data)
                .await
                .map_err(|e| io_error(key, &e))
        })
    }

    fn delete_object<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let path = self.resolve(key)?;
            let result = if key.ends_with('/') {
                tokio::fs::remove_dir(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                // The folder still has children, so it stays as an implicit folder.
                Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => Ok(()),
                Err(e) => Err(io_error(key, &e)),
            }
        })
    }

    fn copy_object<'a>(&'a self, src_key: &'a str, dst_key: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let src = self.resolve(src_key)?;
            let dst = self.resolve(dst_key)?;
            if src_key.ends_with('/') {
                if !src.is_dir() {
                    return Err(StoreError::NotFound {
                        key: src_key.to_string(),
                    });
                }
                return tokio::fs::create_dir_all(&dst)
                    .await
                    .map_err(|e| io_error(dst_key, &e));
            }
            ensure_parent(&dst, dst_key).await?;
            tokio::fs::copy(&src, &dst)
                .await
                .map(|_| ())
                .map_err(|e| io_error(src_key, &e))
        })
    }

    fn supports_staged_writes(&self) -> bool {
        true
    }

    fn put_part<'a>(&'a self, key: &'a str, index: u32, data: Vec<u8>) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let dir = self.parts_dir(key)?;
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| io_error(key, &e))?;
            // Write then rename so a torn write never looks committed.
            let part = part_file(&dir, index);
            let partial = dir.join(format!("{index:08}.tmp"));
            tokio::fs::write(&partial, data)
                .await
                .map_err(|e| io_error(key, &e))?;
            tokio::fs::rename(&partial, &part)
                .await
                .map_err(|e| io_error(key, &e))
        })
    }

    fn committed_parts<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StoreResult<Vec<u32>>> {
        Box::pin(async move {
            let dir = self.parts_dir(key)?;
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(io_error(key, &e)),
            };
            let mut parts = Vec::new();
            while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(key, &e))? {
                if let Some(index) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) {
                    parts.push(index);
                }
            }
            parts.sort_unstable();
            Ok(parts)
        })
    }

    fn complete_parts<'a>(&'a self, key: &'a str, part_count: u32) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let dir = self.parts_dir(key)?;
            for index in 0..part_count {
                if !part_file(&dir, index).is_file() {
                    return Err(StoreError::NotFound {
                        key: format!("{key}#part{index}"),
                    });
                }
            }

            let target = self.resolve(key)?;
            ensure_parent(&target, key).await?;
            let assembling = dir.join("assembled.tmp");
            let mut out = tokio::fs::File::create(&assembling)
                .await
                .map_err(|e| io_error(key, &e))?;
            for index in 0..part_count {
                let mut part = tokio::fs::File::open(part_file(&dir, index))
                    .await
                    .map_err(|e| io_error(key, &e))?;
                tokio::io::copy(&mut part, &mut out)
                    .await
                    .map_err(|e| io_error(key, &e))?;
            }
            out.flush().await.map_err(|e| io_error(key, &e))?;
            drop(out);
            tokio::fs::rename(&assembling, &target)
                .await
                .map_err(|e| io_error(key, &e))?;
            tokio::fs::remove_dir_all(&dir)
                .await
                .map_err(|e| io_error(key, &e))?;
            debug!(target: "local_store", %key, part_count, "assembled");
            Ok(())
        })
    }

    fn abort_parts<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let dir = self.parts_dir(key)?;
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(io_error(key, &e)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("photos/2024")).unwrap();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();
        std::fs::write(dir.path().join("photos/a.jpg"), b"aaaa").unwrap();
        std::fs::write(dir.path().join("photos/2024/b.jpg"), b"bb").unwrap();
        std::fs::write(dir.path().join("readme.md"), b"hi").unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn keys(objects: &[StorageObject]) -> Vec<&str> {
        objects.iter().map(|o| o.key.as_str()).collect()
    }

    #[tokio::test]
    async fn test_list_maps_directories_to_folder_keys() {
        let (_dir, store) = seeded();
        let all = store.list_objects("").await.unwrap();
        assert_eq!(
            keys(&all),
            vec!["empty/", "photos/", "photos/2024/", "photos/2024/b.jpg", "photos/a.jpg", "readme.md"]
        );

        let photos = store.list_objects("photos/").await.unwrap();
        assert_eq!(
            keys(&photos),
            vec!["photos/", "photos/2024/", "photos/2024/b.jpg", "photos/a.jpg"]
        );
        assert_eq!(photos[3].size, 4);
        assert!(store.list_objects("missing/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_copy_delete_and_folder_markers() {
        let (dir, store) = seeded();
        store.copy_object("photos/a.jpg", "archive/a.jpg").await.unwrap();
        assert_eq!(store.get_object("archive/a.jpg").await.unwrap(), b"aaaa");

        store.delete_object("photos/a.jpg").await.unwrap();
        store.delete_object("photos/a.jpg").await.unwrap();
        assert!(matches!(
            store.get_object("photos/a.jpg").await,
            Err(StoreError::NotFound { .. })
        ));

        // A marker above remaining children is kept.
        store.delete_object("photos/").await.unwrap();
        assert!(dir.path().join("photos/2024/b.jpg").exists());
        store.delete_object("empty/").await.unwrap();
        assert!(!dir.path().join("empty").exists());

        store.put_object("new/", Vec::new()).await.unwrap();
        assert!(dir.path().join("new").is_dir());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let (_dir, store) = seeded();
        assert!(store.get_object("../secret").await.is_err());
        assert!(store.put_object(".pfs-staging/x", vec![1]).await.is_err());
    }

    #[tokio::test]
    async fn test_staged_parts_are_hidden_and_assembled() {
        let (dir, store) = seeded();
        store.put_part("up/data.bin", 1, b"world".to_vec()).await.unwrap();
        store.put_part("up/data.bin", 0, b"hello ".to_vec()).await.unwrap();
        assert_eq!(store.committed_parts("up/data.bin").await.unwrap(), vec![0, 1]);
        assert!(!keys(&store.list_objects("").await.unwrap()).iter().any(|k| k.contains("staging")));

        let err = store.complete_parts("up/data.bin", 3).await.unwrap_err();
        assert_eq!(err, StoreError::NotFound { key: "up/data.bin#part2".into() });

        store.complete_parts("up/data.bin", 2).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("up/data.bin")).unwrap(), b"hello world");
        assert!(store.committed_parts("up/data.bin").await.unwrap().is_empty());

        store.put_part("other", 0, vec![1]).await.unwrap();
        store.abort_parts("other").await.unwrap();
        store.abort_parts("other").await.unwrap();
        assert!(store.committed_parts("other").await.unwrap().is_empty());
    }
}
