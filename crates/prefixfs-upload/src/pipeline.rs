//! The upload scheduler and chunk sender.
//!
//! Two limits apply: at most `max_concurrent_uploads` files hold an upload
//! slot (the rest wait in FIFO order), and each file has at most
//! `max_concurrent_chunks` chunk requests in flight. Chunks are staged with
//! the store's part-addressed writes so an interrupted upload continues
//! from its cursor instead of from zero.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use prefixfs_core::{BoxFuture, ObjectStore, StoreError, StoreResult, VfsConfig, VfsPath, cancellable};
use prefixfs_tree::TreeCache;
use tokio::sync::{Notify, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpoint::UploadCheckpoint;
use crate::error::{UploadError, UploadResult};
use crate::source::UploadSource;
use crate::task::{TaskId, UploadProgress, UploadStatus, UploadTask, chunk_count, percent};

/// Capacity of the progress broadcast channel.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Cancel,
    Suspend,
}

struct TaskEntry {
    task: UploadTask,
    source: Arc<dyn UploadSource>,
    queued: bool,
    run: Option<CancellationToken>,
    stop: Option<StopReason>,
}

impl TaskEntry {
    /// Neither waiting for a slot nor uploading.
    fn is_settled(&self) -> bool {
        !self.queued && self.task.status != UploadStatus::Uploading
    }
}

#[derive(Default)]
struct Schedule {
    queue: VecDeque<TaskId>,
    active: usize,
}

struct Inner {
    store: Arc<dyn ObjectStore>,
    cache: Arc<TreeCache>,
    config: VfsConfig,
    tasks: DashMap<TaskId, TaskEntry>,
    schedule: Mutex<Schedule>,
    next_id: AtomicU64,
    progress: broadcast::Sender<UploadProgress>,
    changed: Notify,
}

/// Queues files and uploads them in chunks.
///
/// Cloning yields another handle to the same pipeline. Methods that start
/// work spawn Tokio tasks and must be called inside a runtime.
#[derive(Clone)]
pub struct UploadPipeline {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for UploadPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadPipeline")
            .field("tasks", &self.inner.tasks.len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl UploadPipeline {
    /// Create a pipeline writing through the cache's store.
    pub fn new(cache: Arc<TreeCache>, config: VfsConfig) -> Self {
        let (progress, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store: Arc::clone(cache.store()),
                cache,
                config,
                tasks: DashMap::new(),
                schedule: Mutex::new(Schedule::default()),
                next_id: AtomicU64::new(1),
                progress,
                changed: Notify::new(),
            }),
        }
    }

    /// Receive a progress update after every committed chunk.
    pub fn subscribe(&self) -> broadcast::Receiver<UploadProgress> {
        self.inner.progress.subscribe()
    }

    /// Queue `source` for upload into `destination`.
    pub fn enqueue(&self, source: Arc<dyn UploadSource>, destination: &VfsPath) -> UploadResult<UploadTask> {
        let key = destination.join(source.name())?.to_key(false);
        let chunk_size = self.inner.config.chunk_size;
        let task = self.inner.insert(source, destination.clone(), key, chunk_size, None)?;
        info!(
            target: "upload",
            id = task.id,
            key = %task.key,
            bytes = task.total_bytes,
            chunks = task.chunk_count(),
            "queued"
        );
        self.inner.pump();
        Ok(task)
    }

    /// Re-queue an upload from a checkpoint taken by an earlier pipeline.
    ///
    /// Fails with `ResumeUnsupported` when the source no longer matches the
    /// checkpoint or the committed chunks were cut with another chunk size.
    pub fn restore(
        &self,
        checkpoint: UploadCheckpoint,
        source: Arc<dyn UploadSource>,
    ) -> UploadResult<UploadTask> {
        if source.len() != checkpoint.total_bytes {
            return Err(UploadError::resume_unsupported(
                &checkpoint.key,
                format!(
                    "file is {} bytes, checkpoint recorded {}",
                    source.len(),
                    checkpoint.total_bytes
                ),
            ));
        }
        let chunk_size = self.inner.config.chunk_size;
        if checkpoint.chunk_cursor.is_some() && checkpoint.chunk_size != chunk_size {
            return Err(UploadError::resume_unsupported(
                &checkpoint.key,
                format!(
                    "chunks were staged at {} bytes, pipeline uses {chunk_size}",
                    checkpoint.chunk_size
                ),
            ));
        }
        let task = self.inner.insert(
            source,
            checkpoint.destination,
            checkpoint.key,
            chunk_size,
            checkpoint.chunk_cursor,
        )?;
        info!(target: "upload", id = task.id, key = %task.key, cursor = ?task.chunk_cursor, "restored");
        self.inner.pump();
        Ok(task)
    }

    /// Snapshot of one task.
    pub fn task(&self, id: TaskId) -> Option<UploadTask> {
        self.inner.tasks.get(&id).map(|e| e.task.clone())
    }

    /// Snapshot of every task, oldest first.
    pub fn tasks(&self) -> Vec<UploadTask> {
        let mut tasks: Vec<UploadTask> = self.inner.tasks.iter().map(|e| e.task.clone()).collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    /// Checkpoint a task so it can be restored later.
    pub fn checkpoint(&self, id: TaskId) -> UploadResult<UploadCheckpoint> {
        self.inner
            .tasks
            .get(&id)
            .map(|e| UploadCheckpoint::from_task(&e.task))
            .ok_or(UploadError::UnknownTask { id })
    }

    /// Cancel a task. Chunks the store already accepted stay staged.
    pub fn cancel(&self, id: TaskId) -> UploadResult<()> {
        self.inner.stop(id, StopReason::Cancel)
    }

    /// Stop a task, keeping its cursor. [`resume`](Self::resume) continues it.
    pub fn suspend(&self, id: TaskId) -> UploadResult<()> {
        self.inner.stop(id, StopReason::Suspend)
    }

    /// Re-queue a suspended or failed task from its cursor.
    pub fn resume(&self, id: TaskId) -> UploadResult<()> {
        {
            let mut schedule = self.inner.lock_schedule();
            let mut entry = self
                .inner
                .tasks
                .get_mut(&id)
                .ok_or(UploadError::UnknownTask { id })?;
            if !entry.is_settled() || entry.task.status == UploadStatus::Completed {
                return Err(UploadError::InvalidState {
                    id,
                    status: entry.task.status.to_string(),
                });
            }
            entry.task.status = UploadStatus::Pending;
            entry.task.error = None;
            entry.queued = true;
            schedule.queue.push_back(id);
            debug!(target: "upload", id, cursor = ?entry.task.chunk_cursor, "resumed");
        }
        self.inner.pump();
        Ok(())
    }

    /// Discard a stopped task's staged chunks and upload it again from the
    /// first byte.
    pub async fn restart(&self, id: TaskId) -> UploadResult<()> {
        let key = {
            let entry = self
                .inner
                .tasks
                .get(&id)
                .ok_or(UploadError::UnknownTask { id })?;
            if !entry.is_settled() {
                return Err(UploadError::InvalidState {
                    id,
                    status: entry.task.status.to_string(),
                });
            }
            entry.task.key.clone()
        };
        if self.inner.store.supports_staged_writes() {
            self.inner.store.abort_parts(&key).await?;
        }
        if let Some(mut entry) = self.inner.tasks.get_mut(&id) {
            entry.task.chunk_cursor = None;
            entry.task.progress = 0.0;
            entry.task.chunk_size = self.inner.config.chunk_size;
        }
        info!(target: "upload", id, %key, "restarting from zero");
        self.resume(id)
    }

    /// Wait until a task stops moving: completed, failed or suspended.
    pub async fn wait(&self, id: TaskId) -> UploadResult<UploadTask> {
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            match self.inner.tasks.get(&id) {
                None => return Err(UploadError::UnknownTask { id }),
                Some(entry) if entry.is_settled() => return Ok(entry.task.clone()),
                Some(_) => {}
            }
            notified.await;
        }
    }

    /// Wait until no task is queued or uploading.
    pub async fn wait_all(&self) -> Vec<UploadTask> {
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.tasks.iter().all(|e| e.is_settled()) {
                return self.tasks();
            }
            notified.await;
        }
    }

    /// Forget completed tasks. Returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        let before = self.inner.tasks.len();
        self.inner
            .tasks
            .retain(|_, e| e.task.status != UploadStatus::Completed);
        before - self.inner.tasks.len()
    }
}

impl Inner {
    fn lock_schedule(&self) -> MutexGuard<'_, Schedule> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(
        &self,
        source: Arc<dyn UploadSource>,
        destination: VfsPath,
        key: String,
        chunk_size: u64,
        chunk_cursor: Option<u32>,
    ) -> UploadResult<UploadTask> {
        let total_bytes = source.len();
        let chunks =
            chunk_count(total_bytes, chunk_size).ok_or_else(|| UploadError::TooManyChunks {
                name: source.name().to_string(),
                bytes: total_bytes,
                chunk_size,
            })?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut task = UploadTask {
            id,
            name: source.name().to_string(),
            destination,
            key,
            total_bytes,
            chunk_size,
            chunks,
            status: UploadStatus::Pending,
            progress: 0.0,
            chunk_cursor,
            error: None,
        };
        if chunk_cursor.is_some() {
            task.progress = percent(task.committed_bytes(), total_bytes);
        }

        let mut schedule = self.lock_schedule();
        self.tasks.insert(
            id,
            TaskEntry {
                task: task.clone(),
                source,
                queued: true,
                run: None,
                stop: None,
            },
        );
        schedule.queue.push_back(id);
        Ok(task)
    }

    /// Hand free upload slots to queued tasks, oldest first.
    fn pump(self: &Arc<Self>) {
        let mut started = Vec::new();
        {
            let mut schedule = self.lock_schedule();
            while schedule.active < self.config.max_concurrent_uploads {
                let Some(id) = schedule.queue.pop_front() else {
                    break;
                };
                let Some(mut entry) = self.tasks.get_mut(&id) else {
                    continue;
                };
                entry.queued = false;
                if entry.task.status != UploadStatus::Pending {
                    continue;
                }
                let token = CancellationToken::new();
                entry.task.status = UploadStatus::Uploading;
                entry.run = Some(token.clone());
                entry.stop = None;
                schedule.active += 1;
                started.push((id, token));
            }
        }
        for (id, token) in started {
            debug!(target: "upload", id, "slot granted");
            tokio::spawn(Arc::clone(self).run_task(id, token));
        }
        self.changed.notify_waiters();
    }

    fn stop(&self, id: TaskId, reason: StopReason) -> UploadResult<()> {
        {
            let mut schedule = self.lock_schedule();
            let mut entry = self.tasks.get_mut(&id).ok_or(UploadError::UnknownTask { id })?;
            match entry.task.status {
                UploadStatus::Uploading => {
                    entry.stop = Some(reason);
                    if let Some(token) = &entry.run {
                        token.cancel();
                    }
                }
                UploadStatus::Pending => {
                    schedule.queue.retain(|queued| *queued != id);
                    entry.queued = false;
                    if reason == StopReason::Cancel {
                        entry.task.status = UploadStatus::Failed;
                        entry.task.error = Some(UploadError::Cancelled);
                    }
                }
                status => {
                    return Err(UploadError::InvalidState {
                        id,
                        status: status.to_string(),
                    });
                }
            }
            info!(target: "upload", id, ?reason, "stop requested");
        }
        self.changed.notify_waiters();
        Ok(())
    }

    async fn run_task(self: Arc<Self>, id: TaskId, token: CancellationToken) {
        let result = self.upload(id, &token).await;

        if result.is_ok()
            && let Some(destination) = self.tasks.get(&id).map(|e| e.task.destination.clone())
        {
            self.cache.invalidate(&destination);
        }

        {
            let mut schedule = self.lock_schedule();
            schedule.active = schedule.active.saturating_sub(1);
            if let Some(mut entry) = self.tasks.get_mut(&id) {
                entry.run = None;
                let stop = entry.stop.take();
                match result {
                    Ok(()) => {
                        entry.task.status = UploadStatus::Completed;
                        entry.task.progress = 100.0;
                        info!(target: "upload", id, key = %entry.task.key, "completed");
                    }
                    Err(UploadError::Cancelled) if stop == Some(StopReason::Suspend) => {
                        entry.task.status = UploadStatus::Pending;
                        info!(target: "upload", id, cursor = ?entry.task.chunk_cursor, "suspended");
                    }
                    Err(error) => {
                        warn!(target: "upload", id, key = %entry.task.key, %error, "failed");
                        entry.task.status = UploadStatus::Failed;
                        entry.task.error = Some(error);
                    }
                }
            }
        }
        self.pump();
    }

    async fn upload(&self, id: TaskId, token: &CancellationToken) -> UploadResult<()> {
        let (task, source) = {
            let entry = self.tasks.get(&id).ok_or(UploadError::UnknownTask { id })?;
            (entry.task.clone(), Arc::clone(&entry.source))
        };
        let count = task.chunk_count();

        if !self.store.supports_staged_writes() {
            if task.chunk_cursor.is_some() {
                return Err(UploadError::resume_unsupported(
                    &task.key,
                    "the store cannot stage partial writes",
                ));
            }
            let len = usize::try_from(task.total_bytes).unwrap_or(usize::MAX);
            let data = read_chunk(source.as_ref(), 0, len, token).await?;
            let key = task.key.as_str();
            self.with_retry(key, token, move || self.store.put_object(key, data.clone()))
                .await?;
            self.record(id, Some(count - 1), task.total_bytes);
            return Ok(());
        }

        if let Some(cursor) = task.chunk_cursor {
            let committed = cancellable(token, self.store.committed_parts(&task.key))
                .await
                .map_err(stopped)?;
            if !(0..=cursor).all(|i| committed.binary_search(&i).is_ok()) {
                return Err(UploadError::resume_unsupported(
                    &task.key,
                    format!("staged chunks up to {cursor} are no longer in the store"),
                ));
            }
        }

        let start = task.next_chunk();
        debug!(target: "upload", id, start, count, "sending chunks");
        let mut cursor = task.chunk_cursor;
        let mut sent = task.committed_bytes();
        let mut done = BTreeSet::new();
        let pending: Vec<_> = (start..count)
            .map(|index| self.send_chunk(&task, source.as_ref(), index, token))
            .collect();
        let mut chunks = stream::iter(pending).buffer_unordered(self.config.max_concurrent_chunks);

        while let Some(result) = chunks.next().await {
            let (index, len) = result?;
            sent += len;
            done.insert(index);
            loop {
                let next = cursor.map_or(0, |c| c + 1);
                if !done.remove(&next) {
                    break;
                }
                cursor = Some(next);
            }
            self.record(id, cursor, sent);
        }
        drop(chunks);

        cancellable(token, self.store.complete_parts(&task.key, count))
            .await
            .map_err(stopped)?;
        Ok(())
    }

    async fn send_chunk(
        &self,
        task: &UploadTask,
        source: &dyn UploadSource,
        index: u32,
        token: &CancellationToken,
    ) -> UploadResult<(u32, u64)> {
        let offset = index as u64 * task.chunk_size;
        let len = task.chunk_size.min(task.total_bytes.saturating_sub(offset));
        let data = read_chunk(source, offset, usize::try_from(len).unwrap_or(usize::MAX), token).await?;
        self.with_retry(&task.key, token, move || {
            self.store.put_part(&task.key, index, data.clone())
        })
        .await?;
        debug!(target: "upload", key = %task.key, index, len, "chunk committed");
        Ok((index, len))
    }

    /// Run one write, retrying transient failures with exponential backoff
    /// up to `max_chunk_attempts` attempts.
    async fn with_retry<'a, F>(&self, key: &str, token: &CancellationToken, mut request: F) -> UploadResult<()>
    where
        F: FnMut() -> BoxFuture<'a, StoreResult<()>>,
    {
        let mut attempt = 0;
        loop {
            if token.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            match cancellable(token, request()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt + 1 < self.config.max_chunk_attempts => {
                    let delay = self.config.retry_delay(attempt);
                    debug!(target: "upload", %key, attempt, ?delay, error = %e, "retrying");
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(UploadError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(stopped(e)),
            }
        }
    }

    fn record(&self, id: TaskId, cursor: Option<u32>, sent: u64) {
        let update = match self.tasks.get_mut(&id) {
            Some(mut entry) => {
                entry.task.chunk_cursor = cursor;
                let update = UploadProgress::new(id, sent, entry.task.total_bytes);
                entry.task.progress = update.progress_percent;
                update
            }
            None => return,
        };
        // No subscribers is fine.
        let _ = self.progress.send(update);
    }
}

async fn read_chunk(
    source: &dyn UploadSource,
    offset: u64,
    len: usize,
    token: &CancellationToken,
) -> UploadResult<Vec<u8>> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(UploadError::Cancelled),
        data = source.read_chunk(offset, len) => data,
    }
}

/// Map a store cancellation to the task-level cancellation.
fn stopped(err: StoreError) -> UploadError {
    match err {
        StoreError::Cancelled => UploadError::Cancelled,
        other => UploadError::Store(other),
    }
}
