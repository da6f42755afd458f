//! Core types and traits for prefixfs.
//!
//! This crate provides the pieces every engine shares: the path/key codec,
//! the object and tree node model, the [`ObjectStore`] capability surface
//! with an in-memory implementation, configuration, and error types.

mod config;
mod error;
mod memory;
mod node;
pub mod path;
mod store;

pub use config::{DEFAULT_CHUNK_SIZE, VfsConfig, VfsConfigBuilder};
pub use error::{ConfigError, PathError, StoreError, StoreResult};
pub use memory::{MemoryStore, StoreCall, StoreOp};
pub use node::{StorageObject, TreeNode};
pub use path::{VfsPath, name_of, parent_of, to_key};
pub use store::{BoxFuture, ObjectStore, cancellable};
