//! The object-store capability surface consumed by the engines.
//!
//! Implementations wrap whatever transport reaches the real store. The
//! engines only ever talk to a store through [`ObjectStore`], which keeps
//! them testable against [`MemoryStore`](crate::MemoryStore).

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::error::{StoreError, StoreResult};
use crate::node::StorageObject;

/// Boxed future returned by store methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Flat, prefix-addressed object store.
pub trait ObjectStore: Send + Sync {
    /// Every key starting with `prefix`, at any depth.
    fn list_objects<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, StoreResult<Vec<StorageObject>>>;

    /// Read an object's bytes.
    fn get_object<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StoreResult<Vec<u8>>>;

    /// Write an object in one request.
    fn put_object<'a>(&'a self, key: &'a str, data: Vec<u8>) -> BoxFuture<'a, StoreResult<()>>;

    /// Delete an object. Deleting a missing key succeeds.
    fn delete_object<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StoreResult<()>>;

    /// Server-side copy.
    fn copy_object<'a>(&'a self, src_key: &'a str, dst_key: &'a str)
    -> BoxFuture<'a, StoreResult<()>>;

    /// Whether staged (part-addressed) writes are available.
    ///
    /// Stores that return `true` must implement every `*_parts` method.
    fn supports_staged_writes(&self) -> bool {
        false
    }

    /// Stage one part of `key`. Re-staging an index replaces it.
    fn put_part<'a>(
        &'a self,
        _key: &'a str,
        _index: u32,
        _data: Vec<u8>,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async {
            Err(StoreError::Unsupported {
                operation: "staged writes",
            })
        })
    }

    /// Indices already staged for `key`, ascending.
    fn committed_parts<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, StoreResult<Vec<u32>>> {
        Box::pin(async {
            Err(StoreError::Unsupported {
                operation: "staged writes",
            })
        })
    }

    /// Assemble parts `0..part_count` into the final object.
    fn complete_parts<'a>(&'a self, _key: &'a str, _part_count: u32) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async {
            Err(StoreError::Unsupported {
                operation: "staged writes",
            })
        })
    }

    /// Discard every staged part of `key`.
    fn abort_parts<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async {
            Err(StoreError::Unsupported {
                operation: "staged writes",
            })
        })
    }
}

/// Run a store call, aborting it when `cancel` fires.
///
/// Dropping the in-flight future aborts the request. Effects the store
/// already committed are not rolled back.
pub async fn cancellable<T, F>(cancel: &CancellationToken, request: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StoreError::Cancelled),
        result = request => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[tokio::test]
    async fn test_cancellable_passes_result_through() {
        let store = MemoryStore::new();
        store.insert("a.txt", b"hi".to_vec());
        let token = CancellationToken::new();
        let data = cancellable(&token, store.get_object("a.txt")).await.unwrap();
        assert_eq!(data, b"hi");
    }

    #[tokio::test]
    async fn test_cancellable_aborts() {
        let store = MemoryStore::new();
        store.insert("a.txt", b"hi".to_vec());
        let token = CancellationToken::new();
        token.cancel();
        let result = cancellable(&token, store.get_object("a.txt")).await;
        assert_eq!(result, Err(StoreError::Cancelled));
    }

    #[tokio::test]
    async fn test_default_staged_methods_unsupported() {
        struct Bare;
        impl ObjectStore for Bare {
            fn list_objects<'a>(&'a self, _: &'a str) -> BoxFuture<'a, StoreResult<Vec<StorageObject>>> {
                Box::pin(async { Ok(Vec::new()) })
            }
            fn get_object<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StoreResult<Vec<u8>>> {
                Box::pin(async move { Err(StoreError::NotFound { key: key.into() }) })
            }
            fn put_object<'a>(&'a self, _: &'a str, _: Vec<u8>) -> BoxFuture<'a, StoreResult<()>> {
                Box::pin(async { Ok(()) })
            }
            fn delete_object<'a>(&'a self, _: &'a str) -> BoxFuture<'a, StoreResult<()>> {
                Box::pin(async { Ok(()) })
            }
            fn copy_object<'a>(&'a self, _: &'a str, _: &'a str) -> BoxFuture<'a, StoreResult<()>> {
                Box::pin(async { Ok(()) })
            }
        }

        let store = Bare;
        assert!(!store.supports_staged_writes());
        assert!(matches!(
            store.put_part("k", 0, vec![]).await,
            Err(StoreError::Unsupported { .. })
        ));
    }
}
