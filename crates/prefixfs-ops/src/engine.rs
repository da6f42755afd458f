//! Folder-aware move, rename, copy and delete over a flat object store.
//!
//! The store has no rename and no recursive delete, so every operation here
//! is a batch of single-key requests. A move copies every key first and only
//! deletes originals once all copies have landed; a copy failure leaves the
//! source untouched, so re-running the move is safe.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use prefixfs_core::{ObjectStore, StorageObject, StoreError, VfsConfig, VfsPath, cancellable};
use prefixfs_tree::{PatchOp, PatchOutcome, TreeCache};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{OpsError, OpsResult};
use crate::progress::{OperationComplete, OperationProgress, OperationType};

/// A key resolved into its path and kind.
#[derive(Debug, Clone)]
struct Resolved {
    key: String,
    path: VfsPath,
    parent: VfsPath,
    is_folder: bool,
}

impl Resolved {
    fn from_key(key: &str) -> OpsResult<Self> {
        let (path, is_folder) = VfsPath::from_key(key)?;
        let parent = path.parent().unwrap_or_default();
        Ok(Self {
            key: path.to_key(is_folder),
            path,
            parent,
            is_folder,
        })
    }
}

/// Executes multi-request mutations and keeps the tree cache in step.
#[derive(Clone)]
pub struct MoveEngine {
    store: Arc<dyn ObjectStore>,
    cache: Arc<TreeCache>,
    config: VfsConfig,
    progress: Option<mpsc::Sender<OperationProgress>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for MoveEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoveEngine")
            .field("config", &self.config)
            .field("reports_progress", &self.progress.is_some())
            .finish_non_exhaustive()
    }
}

impl MoveEngine {
    /// Create an engine writing through the cache's store.
    pub fn new(cache: Arc<TreeCache>, config: VfsConfig) -> Self {
        Self {
            store: Arc::clone(cache.store()),
            cache,
            config,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Send progress snapshots to `tx`. Snapshots are dropped when the
    /// channel is full.
    pub fn with_progress(mut self, tx: mpsc::Sender<OperationProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Abort in-flight requests when `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The cache this engine keeps consistent.
    pub fn cache(&self) -> &Arc<TreeCache> {
        &self.cache
    }

    /// The engine's configuration.
    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    fn report(&self, progress: &OperationProgress) {
        if let Some(tx) = &self.progress {
            let _ = tx.try_send(progress.clone());
        }
    }

    /// Fail with `NameConflict` if `name` is taken inside `parent`.
    async fn ensure_free(&self, parent: &VfsPath, name: &str) -> OpsResult<()> {
        if let Some(existing) = cancellable(&self.cancel, self.cache.lookup(parent, name)).await? {
            return Err(OpsError::NameConflict {
                parent: parent.to_string(),
                name: name.to_string(),
                existing_key: existing.key,
            });
        }
        Ok(())
    }

    /// Check that `from -> to` is a meaningful transfer. Makes no store call.
    fn validate_transfer(from: &Resolved, to: &Resolved) -> OpsResult<()> {
        if from.path.is_root() || to.path.is_root() {
            return Err(OpsError::invalid_move(&from.key, &to.key, "the root cannot be moved"));
        }
        if from.is_folder != to.is_folder {
            return Err(OpsError::invalid_move(
                &from.key,
                &to.key,
                "source and destination must both be files or both be folders",
            ));
        }
        if from.path == to.path {
            return Err(OpsError::invalid_move(
                &from.key,
                &to.key,
                "source and destination are the same",
            ));
        }
        if from.is_folder && to.path.is_within(&from.path) {
            return Err(OpsError::invalid_move(
                &from.key,
                &to.key,
                "a folder cannot be moved into itself",
            ));
        }
        Ok(())
    }

    /// Move `old_key` to `new_key`.
    ///
    /// Folder keys end with `/`. Every key under a folder is copied before
    /// any original is deleted. Cache entries for both parents and both
    /// subtrees are invalidated whatever the outcome.
    pub async fn move_key(&self, old_key: &str, new_key: &str) -> OpsResult<OperationComplete> {
        let from = Resolved::from_key(old_key)?;
        let to = Resolved::from_key(new_key)?;
        Self::validate_transfer(&from, &to)?;
        self.ensure_free(&to.parent, to.path.name()).await?;

        let op_type = if from.parent == to.parent {
            OperationType::Rename
        } else {
            OperationType::Move
        };
        info!(target: "move_engine", from = %from.key, to = %to.key, %op_type, "starting");

        let inserted = self
            .cache
            .listing(&from.parent)
            .and_then(|l| l.into_iter().find(|o| o.key == from.key))
            .map(|o| StorageObject {
                key: to.key.clone(),
                ..o
            })
            .unwrap_or_else(|| StorageObject::new(to.key.clone(), 0, Utc::now()));
        let patch = self.cache.begin_patch(vec![
            PatchOp::remove(from.parent.clone(), from.key.clone()),
            PatchOp::insert(to.parent.clone(), inserted),
        ]);

        let result = if from.is_folder {
            self.move_folder(&from, &to, op_type).await
        } else {
            self.move_file(&from, &to, op_type).await
        };

        let outcome = if result.is_ok() {
            PatchOutcome::Confirmed
        } else {
            PatchOutcome::RolledBack
        };
        self.cache.settle(patch, outcome);
        self.cache.invalidate(&from.parent);
        self.cache.invalidate(&to.parent);
        if from.is_folder {
            if result.is_ok() {
                self.cache.evict_subtree(&from.path);
            } else {
                self.cache.invalidate_subtree(&from.path);
            }
            self.cache.invalidate_subtree(&to.path);
        }

        match &result {
            Ok(complete) => info!(target: "move_engine", summary = %complete.summary(), "finished"),
            Err(e) => warn!(target: "move_engine", from = %from.key, to = %to.key, error = %e, "failed"),
        }
        result
    }

    async fn move_file(
        &self,
        from: &Resolved,
        to: &Resolved,
        op_type: OperationType,
    ) -> OpsResult<OperationComplete> {
        let mut progress = OperationProgress::start(op_type, 1, 0);
        self.report(&progress);

        cancellable(&self.cancel, self.store.copy_object(&from.key, &to.key)).await?;
        debug!(target: "move_engine", from = %from.key, to = %to.key, "copied");

        if let Err(e) = cancellable(&self.cancel, self.store.delete_object(&from.key)).await {
            warn!(target: "move_engine", key = %from.key, error = %e, "original not deleted");
            return Err(OpsError::PartialMove {
                from: from.key.clone(),
                to: to.key.clone(),
                undeleted: vec![from.key.clone()],
            });
        }

        progress.advance(&from.key, 0);
        self.report(&progress);
        Ok(OperationComplete::done(op_type, 1, 0))
    }

    async fn move_folder(
        &self,
        from: &Resolved,
        to: &Resolved,
        op_type: OperationType,
    ) -> OpsResult<OperationComplete> {
        let objects = self.list_subtree(from).await?;
        let old_prefix = from.path.as_prefix();
        let new_prefix = to.path.as_prefix();
        let total_bytes = objects.iter().map(|o| o.size).sum();
        let mut progress = OperationProgress::start(op_type, objects.len(), total_bytes);
        self.report(&progress);

        self.copy_all(&objects, &old_prefix, &new_prefix, &mut progress)
            .await?;
        debug!(target: "move_engine", count = objects.len(), "all copies landed, deleting originals");

        let undeleted = self.delete_all(&objects).await;
        if !undeleted.is_empty() {
            return Err(OpsError::PartialMove {
                from: from.key.clone(),
                to: to.key.clone(),
                undeleted,
            });
        }

        Ok(OperationComplete::done(op_type, objects.len(), progress.bytes_done))
    }

    /// Every key under a folder, including its own marker.
    async fn list_subtree(&self, folder: &Resolved) -> OpsResult<Vec<StorageObject>> {
        let prefix = folder.path.as_prefix();
        let objects = cancellable(&self.cancel, self.store.list_objects(&prefix)).await?;
        if objects.is_empty() {
            return Err(OpsError::NotFound {
                key: folder.key.clone(),
            });
        }
        Ok(objects)
    }

    /// Copy every object from `old_prefix` to `new_prefix`.
    ///
    /// Stops at the first failure; requests still in flight are dropped and
    /// copies that already landed are removed again. The destination was
    /// free before the batch started, so only keys this batch wrote go.
    async fn copy_all(
        &self,
        objects: &[StorageObject],
        old_prefix: &str,
        new_prefix: &str,
        progress: &mut OperationProgress,
    ) -> OpsResult<()> {
        let pairs: Vec<(&StorageObject, String)> = objects
            .iter()
            .filter_map(|o| {
                o.key
                    .strip_prefix(old_prefix)
                    .map(|rest| (o, format!("{new_prefix}{rest}")))
            })
            .collect();

        let mut copies = stream::iter(pairs)
            .map(|(obj, dst)| async move {
                match cancellable(&self.cancel, self.store.copy_object(&obj.key, &dst)).await {
                    Ok(()) => Ok((obj, dst)),
                    Err(e) => Err((obj.key.clone(), e)),
                }
            })
            .buffer_unordered(self.config.max_concurrent_copies);

        let mut landed = Vec::new();
        while let Some(result) = copies.next().await {
            match result {
                Ok((obj, dst)) => {
                    landed.push(dst);
                    progress.advance(&obj.key, obj.size);
                    self.report(progress);
                }
                Err((key, e)) => {
                    drop(copies);
                    warn!(target: "move_engine", %key, error = %e, "copy failed, aborting batch");
                    self.discard(landed).await;
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Best-effort removal of partial copies. Runs even after cancellation.
    async fn discard(&self, keys: Vec<String>) {
        let store = &self.store;
        stream::iter(keys)
            .for_each_concurrent(self.config.max_concurrent_deletes, |key| async move {
                if let Err(e) = store.delete_object(&key).await {
                    warn!(target: "move_engine", %key, error = %e, "partial copy left behind");
                }
            })
            .await;
    }

    /// Delete every object, files first and then folder markers deepest
    /// first. Returns the keys left behind.
    ///
    /// A marker is kept while anything beneath it could not be deleted.
    async fn delete_all(&self, objects: &[StorageObject]) -> Vec<String> {
        let (mut markers, files): (Vec<&StorageObject>, Vec<&StorageObject>) =
            objects.iter().partition(|o| o.is_folder);

        let mut failed: Vec<String> = stream::iter(files)
            .map(|obj| async move {
                match cancellable(&self.cancel, self.store.delete_object(&obj.key)).await {
                    Ok(()) => None,
                    Err(e) => {
                        warn!(target: "move_engine", key = %obj.key, error = %e, "delete failed");
                        Some(obj.key.clone())
                    }
                }
            })
            .buffer_unordered(self.config.max_concurrent_deletes)
            .filter_map(|r| async move { r })
            .collect()
            .await;

        markers.sort_by_key(|o| std::cmp::Reverse(o.key.matches('/').count()));
        for marker in markers {
            if failed.iter().any(|k| k.starts_with(&marker.key)) {
                failed.push(marker.key.clone());
                continue;
            }
            if let Err(e) = cancellable(&self.cancel, self.store.delete_object(&marker.key)).await {
                warn!(target: "move_engine", key = %marker.key, error = %e, "delete failed");
                failed.push(marker.key.clone());
            }
        }
        failed.sort();
        failed
    }

    /// Rename an object or folder in place.
    pub async fn rename(&self, key: &str, new_name: &str) -> OpsResult<OperationComplete> {
        let from = Resolved::from_key(key)?;
        let renamed = from.path.with_name(new_name)?;
        self.move_key(&from.key, &renamed.to_key(from.is_folder))
            .await
    }

    /// Move an object or folder into `destination`, keeping its name.
    pub async fn move_into(&self, key: &str, destination: &VfsPath) -> OpsResult<OperationComplete> {
        let from = Resolved::from_key(key)?;
        let target = destination.join(from.path.name())?;
        self.move_key(&from.key, &target.to_key(from.is_folder))
            .await
    }

    /// Copy `src_key` to `dst_key` without touching the source.
    ///
    /// Folders are copied recursively. A failure stops the batch and
    /// removes the copies it already made.
    pub async fn copy(&self, src_key: &str, dst_key: &str) -> OpsResult<OperationComplete> {
        let from = Resolved::from_key(src_key)?;
        let to = Resolved::from_key(dst_key)?;
        Self::validate_transfer(&from, &to)?;
        self.ensure_free(&to.parent, to.path.name()).await?;
        info!(target: "move_engine", from = %from.key, to = %to.key, "copying");

        let patch = self.cache.begin_patch(vec![PatchOp::insert(
            to.parent.clone(),
            StorageObject::new(to.key.clone(), 0, Utc::now()),
        )]);

        let result = if from.is_folder {
            match self.list_subtree(&from).await {
                Ok(objects) => {
                    let total = objects.iter().map(|o| o.size).sum();
                    let mut progress =
                        OperationProgress::start(OperationType::Copy, objects.len(), total);
                    self.copy_all(
                        &objects,
                        &from.path.as_prefix(),
                        &to.path.as_prefix(),
                        &mut progress,
                    )
                    .await
                    .map(|()| (objects.len(), progress.bytes_done))
                }
                Err(e) => Err(e),
            }
        } else {
            cancellable(&self.cancel, self.store.copy_object(&from.key, &to.key))
                .await
                .map(|()| (1, 0))
                .map_err(OpsError::from)
        };

        self.cache.settle(
            patch,
            if result.is_ok() {
                PatchOutcome::Confirmed
            } else {
                PatchOutcome::RolledBack
            },
        );
        self.cache.invalidate(&to.parent);
        if to.is_folder {
            self.cache.invalidate_subtree(&to.path);
        }

        let (succeeded, bytes) = result?;
        Ok(OperationComplete::done(OperationType::Copy, succeeded, bytes))
    }

    /// Delete an object, or a folder and everything beneath it.
    ///
    /// A folder delete that leaves keys behind fails with `PartialDelete`
    /// naming them. The cache is invalidated either way.
    pub async fn remove(&self, key: &str) -> OpsResult<OperationComplete> {
        let target = Resolved::from_key(key)?;
        if target.path.is_root() {
            return Err(OpsError::invalid_move(&target.key, "", "the root cannot be deleted"));
        }
        info!(target: "move_engine", key = %target.key, "deleting");

        let patch = self
            .cache
            .begin_patch(vec![PatchOp::remove(target.parent.clone(), target.key.clone())]);

        let result = if target.is_folder {
            match self.list_subtree(&target).await {
                Ok(objects) => {
                    let failed = self.delete_all(&objects).await;
                    if failed.is_empty() {
                        Ok(objects.len())
                    } else {
                        Err(OpsError::PartialDelete {
                            failed,
                            total: objects.len(),
                        })
                    }
                }
                Err(e) => Err(e),
            }
        } else {
            cancellable(&self.cancel, self.store.delete_object(&target.key))
                .await
                .map(|()| 1)
                .map_err(OpsError::from)
        };

        self.cache.settle(
            patch,
            if result.is_ok() {
                PatchOutcome::Confirmed
            } else {
                PatchOutcome::RolledBack
            },
        );
        self.cache.invalidate(&target.parent);
        if target.is_folder {
            if result.is_ok() {
                self.cache.evict_subtree(&target.path);
            } else {
                self.cache.invalidate_subtree(&target.path);
            }
        }

        let deleted = result?;
        let mut progress = OperationProgress::start(OperationType::Delete, deleted, 0);
        progress.keys_done = deleted;
        progress.current_key = Some(target.key);
        self.report(&progress);

        Ok(OperationComplete::done(OperationType::Delete, deleted, 0))
    }

    /// Delete several keys, collecting per-key failures instead of stopping.
    pub async fn remove_many(&self, keys: &[String]) -> OperationComplete {
        let mut complete = OperationComplete::empty(OperationType::Delete);
        for key in keys {
            match self.remove(key).await {
                Ok(done) => complete.succeeded += done.succeeded,
                Err(OpsError::PartialDelete { failed, total }) => {
                    complete.succeeded += total - failed.len();
                    for key in failed {
                        complete.push_failure(key, "could not be deleted");
                    }
                }
                Err(e) => {
                    complete.push_failure(key.clone(), e.to_string());
                }
            }
        }
        complete
    }

    /// Create an empty folder at `path`.
    pub async fn create_folder(&self, path: &VfsPath) -> OpsResult<OperationComplete> {
        let Some(parent) = path.parent() else {
            return Err(OpsError::invalid_move("", "", "the root already exists"));
        };
        self.ensure_free(&parent, path.name()).await?;

        let object = StorageObject::folder(path, Utc::now());
        let patch = self
            .cache
            .begin_patch(vec![PatchOp::insert(parent.clone(), object.clone())]);
        let result = cancellable(&self.cancel, self.store.put_object(&object.key, Vec::new())).await;
        self.cache.settle(
            patch,
            if result.is_ok() {
                PatchOutcome::Confirmed
            } else {
                PatchOutcome::RolledBack
            },
        );
        self.cache.invalidate(&parent);
        result?;

        info!(target: "move_engine", key = %object.key, "folder created");
        Ok(OperationComplete::done(OperationType::CreateFolder, 1, 0))
    }
}

/// Whether a store error is a cancellation.
pub(crate) fn is_cancelled(err: &OpsError) -> bool {
    matches!(err, OpsError::Store(StoreError::Cancelled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prefixfs_core::{MemoryStore, StoreCall, StoreOp};

    fn engine(store: &Arc<MemoryStore>) -> MoveEngine {
        let cache = Arc::new(TreeCache::new(store.clone()));
        MoveEngine::new(cache, VfsConfig::default())
    }

    #[test]
    fn test_validate_transfer() {
        let folder = Resolved::from_key("photos/").unwrap();
        let nested = Resolved::from_key("photos/2024/photos/").unwrap();
        let file = Resolved::from_key("photos.txt").unwrap();
        let sibling = Resolved::from_key("photos-old/").unwrap();

        assert!(MoveEngine::validate_transfer(&folder, &nested).is_err());
        assert!(MoveEngine::validate_transfer(&folder, &folder).is_err());
        assert!(MoveEngine::validate_transfer(&folder, &file).is_err());
        assert!(MoveEngine::validate_transfer(&folder, &sibling).is_ok());
    }

    #[tokio::test]
    async fn test_rename_keeps_parent() {
        let store = Arc::new(MemoryStore::with_objects([("docs/a.txt", b"a".to_vec())]));
        let engine = engine(&store);

        let done = engine.rename("docs/a.txt", "b.txt").await.unwrap();
        assert_eq!(done.operation_type, OperationType::Rename);
        assert!(store.contains("docs/b.txt"));
        assert!(!store.contains("docs/a.txt"));
    }

    #[tokio::test]
    async fn test_markers_deleted_after_contents() {
        let store = Arc::new(MemoryStore::with_objects([
            ("a/", vec![]),
            ("a/b/", vec![]),
            ("a/b/c.txt", vec![1]),
        ]));
        let engine = engine(&store);
        engine.remove("a/").await.unwrap();

        let deletes: Vec<StoreCall> = store.calls_of(StoreOp::Delete);
        assert_eq!(
            deletes,
            vec![
                StoreCall::Delete { key: "a/b/c.txt".into() },
                StoreCall::Delete { key: "a/b/".into() },
                StoreCall::Delete { key: "a/".into() },
            ]
        );
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_engine_makes_no_changes() {
        let store = Arc::new(MemoryStore::with_objects([("a.txt", vec![1])]));
        let token = CancellationToken::new();
        let engine = engine(&store).with_cancellation(token.clone());
        token.cancel();

        let err = engine.move_key("a.txt", "b.txt").await.unwrap_err();
        assert!(is_cancelled(&err));
        assert!(store.contains("a.txt"));
        assert!(!store.contains("b.txt"));
    }
}
