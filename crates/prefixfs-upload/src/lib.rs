//! Chunked upload pipeline for prefixfs.
//!
//! Files are queued with [`UploadPipeline::enqueue`] and uploaded in
//! fixed-size chunks through the store's staged-write capability:
//!
//! - **Bounded concurrency**: a limited number of files upload at once, the
//!   rest wait in FIFO order; each file limits its own chunk requests.
//! - **Retry**: transient chunk failures are retried with exponential
//!   backoff up to a fixed attempt cap.
//! - **Resume**: a suspended task continues after its highest contiguously
//!   committed chunk, and [`UploadCheckpoint`] carries that cursor across
//!   restarts.
//! - **Cancellation**: cooperative, and in-flight chunk requests are aborted.

mod checkpoint;
mod error;
mod pipeline;
mod source;
mod task;

pub use checkpoint::UploadCheckpoint;
pub use error::{UploadError, UploadResult};
pub use pipeline::{PROGRESS_CHANNEL_CAPACITY, UploadPipeline};
pub use source::{LocalFile, MemoryFile, UploadSource};
pub use task::{TaskId, UploadProgress, UploadStatus, UploadTask, chunk_count};
