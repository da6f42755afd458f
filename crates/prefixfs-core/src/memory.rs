//! In-memory object store.
//!
//! A complete [`ObjectStore`] kept in a sorted map. It records every call
//! it receives and can be told to fail specific requests, which makes it
//! the workhorse of the engine tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::node::StorageObject;
use crate::store::{BoxFuture, ObjectStore};

/// Kind of store request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    List,
    Get,
    Put,
    Delete,
    Copy,
    PutPart,
    CommittedParts,
    CompleteParts,
    AbortParts,
}

/// A recorded store request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    List { prefix: String },
    Get { key: String },
    Put { key: String },
    Delete { key: String },
    Copy { src: String, dst: String },
    PutPart { key: String, index: u32 },
    CommittedParts { key: String },
    CompleteParts { key: String, part_count: u32 },
    AbortParts { key: String },
}

impl StoreCall {
    /// The kind of request.
    pub fn op(&self) -> StoreOp {
        match self {
            Self::List { .. } => StoreOp::List,
            Self::Get { .. } => StoreOp::Get,
            Self::Put { .. } => StoreOp::Put,
            Self::Delete { .. } => StoreOp::Delete,
            Self::Copy { .. } => StoreOp::Copy,
            Self::PutPart { .. } => StoreOp::PutPart,
            Self::CommittedParts { .. } => StoreOp::CommittedParts,
            Self::CompleteParts { .. } => StoreOp::CompleteParts,
            Self::AbortParts { .. } => StoreOp::AbortParts,
        }
    }

    /// Whether the request names `key` (either side of a copy).
    fn touches(&self, key: &str) -> bool {
        match self {
            Self::List { prefix } => prefix == key,
            Self::Copy { src, dst } => src == key || dst == key,
            Self::Get { key: k }
            | Self::Put { key: k }
            | Self::Delete { key: k }
            | Self::PutPart { key: k, .. }
            | Self::CommittedParts { key: k }
            | Self::CompleteParts { key: k, .. }
            | Self::AbortParts { key: k } => k == key,
        }
    }

    /// Whether the request mutates the store.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Self::List { .. } | Self::Get { .. } | Self::CommittedParts { .. }
        )
    }
}

#[derive(Debug, Clone)]
struct Fault {
    op: StoreOp,
    key: Option<String>,
    remaining: Option<usize>,
}

#[derive(Debug, Clone)]
struct MemoryObject {
    data: Vec<u8>,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, MemoryObject>,
    staged: HashMap<String, BTreeMap<u32, Vec<u8>>>,
    calls: Vec<StoreCall>,
    faults: Vec<Fault>,
    in_flight: HashMap<StoreOp, usize>,
    max_in_flight: HashMap<StoreOp, usize>,
}

/// Sorted-map object store with a call log and fault injection.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    staged_writes: bool,
    latency: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter when a request finishes or is dropped.
struct InFlight<'a> {
    store: &'a MemoryStore,
    op: StoreOp,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut inner = self.store.lock();
        if let Some(count) = inner.in_flight.get_mut(&self.op) {
            *count = count.saturating_sub(1);
        }
    }
}

impl MemoryStore {
    /// Create an empty store with staged writes enabled.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            staged_writes: true,
            latency: Duration::ZERO,
        }
    }

    /// Create a store pre-populated with objects.
    pub fn with_objects<K, I>(objects: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Vec<u8>)>,
    {
        let store = Self::new();
        for (key, data) in objects {
            store.insert(key, data);
        }
        store
    }

    /// Disable staged writes, like a store without multipart support.
    pub fn without_staged_writes(mut self) -> Self {
        self.staged_writes = false;
        self
    }

    /// Delay every request by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert an object directly, bypassing the call log.
    pub fn insert(&self, key: impl Into<String>, data: Vec<u8>) {
        self.lock().objects.insert(
            key.into(),
            MemoryObject {
                data,
                last_modified: Utc::now(),
            },
        );
    }

    /// Whether a key exists.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().objects.contains_key(key)
    }

    /// Contents of a key.
    pub fn data(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(key).map(|o| o.data.clone())
    }

    /// Every key in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    /// Indices staged for a key.
    pub fn staged_parts(&self, key: &str) -> Vec<u32> {
        self.lock()
            .staged
            .get(key)
            .map(|parts| parts.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Every request received so far.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    /// Requests of one kind.
    pub fn calls_of(&self, op: StoreOp) -> Vec<StoreCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op() == op)
            .cloned()
            .collect()
    }

    /// Forget the call log.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Highest number of concurrent requests of one kind.
    pub fn max_in_flight(&self, op: StoreOp) -> usize {
        self.lock().max_in_flight.get(&op).copied().unwrap_or(0)
    }

    /// Fail every `op` request that names `key`.
    pub fn fail_on(&self, op: StoreOp, key: impl Into<String>) {
        self.lock().faults.push(Fault {
            op,
            key: Some(key.into()),
            remaining: None,
        });
    }

    /// Fail the next `times` requests of kind `op`.
    pub fn fail_times(&self, op: StoreOp, times: usize) {
        self.lock().faults.push(Fault {
            op,
            key: None,
            remaining: Some(times),
        });
    }

    /// Remove every injected fault.
    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    fn begin(&self, call: StoreCall) -> StoreResult<InFlight<'_>> {
        let op = call.op();
        let mut inner = self.lock();
        inner.calls.push(call.clone());

        let hit = inner.faults.iter().position(|fault| {
            fault.op == op
                && fault.remaining != Some(0)
                && fault.key.as_deref().is_none_or(|k| call.touches(k))
        });
        if let Some(idx) = hit {
            if let Some(remaining) = inner.faults[idx].remaining.as_mut() {
                *remaining -= 1;
                if *remaining == 0 {
                    inner.faults.remove(idx);
                }
            }
            debug!(target: "memory_store", ?call, "injecting failure");
            return Err(StoreError::network(
                primary_key(&call),
                "injected failure",
            ));
        }

        let count = inner.in_flight.entry(op).or_insert(0);
        *count += 1;
        let now = *count;
        let max = inner.max_in_flight.entry(op).or_insert(0);
        *max = (*max).max(now);
        Ok(InFlight { store: self, op })
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

fn primary_key(call: &StoreCall) -> String {
    match call {
        StoreCall::List { prefix } => prefix.clone(),
        StoreCall::Copy { src, .. } => src.clone(),
        StoreCall::Get { key }
        | StoreCall::Put { key }
        | StoreCall::Delete { key }
        | StoreCall::PutPart { key, .. }
        | StoreCall::CommittedParts { key }
        | StoreCall::CompleteParts { key, .. }
        | StoreCall::AbortParts { key } => key.clone(),
    }
}

impl ObjectStore for MemoryStore {
    fn list_objects<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, StoreResult<Vec<StorageObject>>> {
        Box::pin(async move {
            let _guard = self.begin(StoreCall::List {
                prefix: prefix.to_string(),
            })?;
            self.delay().await;
            let inner = self.lock();
            Ok(inner
                .objects
                .range(prefix.to_string()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .map(|(key, obj)| StorageObject::new(key.clone(), obj.data.len() as u64, obj.last_modified))
                .collect())
        })
    }

    fn get_object<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StoreResult<Vec<u8>>> {
        Box::pin(async move {
            let _guard = self.begin(StoreCall::Get { key: key.to_string() })?;
            self.delay().await;
            let inner = self.lock();
            inner
                .objects
                .get(key)
                .map(|o| o.data.clone())
                .ok_or_else(|| StoreError::NotFound { key: key.to_string() })
        })
    }

    fn put_object<'a>(&'a self, key: &'a str, data: Vec<u8>) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let _guard = self.begin(StoreCall::Put { key: key.to_string() })?;
            self.delay().await;
            self.insert(key, data);
            Ok(())
        })
    }

    fn delete_object<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let _guard = self.begin(StoreCall::Delete { key: key.to_string() })?;
            self.delay().await;
            self.lock().objects.remove(key);
            Ok(())
        })
    }

    fn copy_object<'a>(&'a self, src_key: &'a str, dst_key: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let _guard = self.begin(StoreCall::Copy {
                src: src_key.to_string(),
                dst: dst_key.to_string(),
            })?;
            self.delay().await;
            let mut inner = self.lock();
            let object = inner
                .objects
                .get(src_key)
                .cloned()
                .ok_or_else(|| StoreError::NotFound { key: src_key.to_string() })?;
            inner.objects.insert(
                dst_key.to_string(),
                MemoryObject {
                    data: object.data,
                    last_modified: Utc::now(),
                },
            );
            Ok(())
        })
    }

    fn supports_staged_writes(&self) -> bool {
        self.staged_writes
    }

    fn put_part<'a>(&'a self, key: &'a str, index: u32, data: Vec<u8>) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            if !self.staged_writes {
                return Err(StoreError::Unsupported {
                    operation: "staged writes",
                });
            }
            let _guard = self.begin(StoreCall::PutPart {
                key: key.to_string(),
                index,
            })?;
            self.delay().await;
            self.lock()
                .staged
                .entry(key.to_string())
                .or_default()
                .insert(index, data);
            Ok(())
        })
    }

    fn committed_parts<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StoreResult<Vec<u32>>> {
        Box::pin(async move {
            if !self.staged_writes {
                return Err(StoreError::Unsupported {
                    operation: "staged writes",
                });
            }
            let _guard = self.begin(StoreCall::CommittedParts { key: key.to_string() })?;
            self.delay().await;
            Ok(self.staged_parts(key))
        })
    }

    fn complete_parts<'a>(&'a self, key: &'a str, part_count: u32) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            if !self.staged_writes {
                return Err(StoreError::Unsupported {
                    operation: "staged writes",
                });
            }
            let _guard = self.begin(StoreCall::CompleteParts {
                key: key.to_string(),
                part_count,
            })?;
            self.delay().await;
            let mut inner = self.lock();
            let parts = inner.staged.remove(key).unwrap_or_default();
            let mut data = Vec::new();
            for index in 0..part_count {
                match parts.get(&index) {
                    Some(part) => data.extend_from_slice(part),
                    None => {
                        inner.staged.insert(key.to_string(), parts);
                        return Err(StoreError::NotFound {
                            key: format!("{key}#part{index}"),
                        });
                    }
                }
            }
            inner.objects.insert(
                key.to_string(),
                MemoryObject {
                    data,
                    last_modified: Utc::now(),
                },
            );
            Ok(())
        })
    }

    fn abort_parts<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            if !self.staged_writes {
                return Err(StoreError::Unsupported {
                    operation: "staged writes",
                });
            }
            let _guard = self.begin(StoreCall::AbortParts { key: key.to_string() })?;
            self.lock().staged.remove(key);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_is_recursive_and_sorted() {
        let store = MemoryStore::with_objects([
            ("docs/", vec![]),
            ("docs/b.txt", b"bb".to_vec()),
            ("docs/a/deep.txt", b"d".to_vec()),
            ("docsx/c.txt", b"c".to_vec()),
        ]);
        let listed = store.list_objects("docs/").await.unwrap();
        let keys: Vec<_> = listed.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["docs/", "docs/a/deep.txt", "docs/b.txt"]);
        assert_eq!(listed[2].size, 2);
    }

    #[tokio::test]
    async fn test_copy_missing_source() {
        let store = MemoryStore::new();
        let err = store.copy_object("nope", "dst").await.unwrap_err();
        assert_eq!(err, StoreError::NotFound { key: "nope".into() });
    }

    #[tokio::test]
    async fn test_fault_injection_by_key() {
        let store = MemoryStore::with_objects([("a", vec![1]), ("b", vec![2])]);
        store.fail_on(StoreOp::Delete, "a");
        assert!(store.delete_object("a").await.is_err());
        assert!(store.delete_object("b").await.is_ok());
        assert!(store.contains("a"));
        assert_eq!(store.calls_of(StoreOp::Delete).len(), 2);
    }

    #[tokio::test]
    async fn test_fail_times_exhausts() {
        let store = MemoryStore::new();
        store.fail_times(StoreOp::Put, 2);
        assert!(store.put_object("k", vec![]).await.is_err());
        assert!(store.put_object("k", vec![]).await.is_err());
        assert!(store.put_object("k", vec![]).await.is_ok());
    }

    #[tokio::test]
    async fn test_staged_parts_assemble() {
        let store = MemoryStore::new();
        store.put_part("big", 1, b"world".to_vec()).await.unwrap();
        store.put_part("big", 0, b"hello ".to_vec()).await.unwrap();
        assert_eq!(store.committed_parts("big").await.unwrap(), vec![0, 1]);
        store.complete_parts("big", 2).await.unwrap();
        assert_eq!(store.data("big").unwrap(), b"hello world");
        assert!(store.staged_parts("big").is_empty());
    }

    #[tokio::test]
    async fn test_complete_with_missing_part_keeps_staging() {
        let store = MemoryStore::new();
        store.put_part("big", 0, b"a".to_vec()).await.unwrap();
        assert!(store.complete_parts("big", 2).await.is_err());
        assert_eq!(store.staged_parts("big"), vec![0]);
        assert!(!store.contains("big"));
    }

    #[tokio::test]
    async fn test_without_staged_writes() {
        let store = MemoryStore::new().without_staged_writes();
        assert!(!store.supports_staged_writes());
        assert!(matches!(
            store.put_part("k", 0, vec![]).await,
            Err(StoreError::Unsupported { .. })
        ));
    }
}
