//! Mutating engines for prefixfs.
//!
//! This crate turns single-key store requests into folder-level operations
//! (move, rename, copy, delete, create) with progress reporting via
//! channels, and layers the clipboard and drag-and-drop state machines on
//! top of them. Every engine invalidates the tree cache entries it touched
//! before returning.

mod clipboard;
mod conflict;
mod drag;
mod engine;
mod error;
mod gesture;
mod progress;

pub use clipboard::{
    Clipboard, ClipboardItem, ClipboardMode, ClipboardState, PasteFailure, PasteReport,
};
pub use conflict::{Conflict, ConflictPolicy};
pub use drag::{
    DragError, DragItem, DragPhase, DragSession, DragSessionManager, DragSnapshot, DropOutcome,
    is_valid_drop_target,
};
pub use engine::MoveEngine;
pub use error::{OpsError, OpsResult};
pub use gesture::{DropTargetRegistry, GestureEvent, Point, Rect};
pub use progress::{OperationComplete, OperationError, OperationProgress, OperationType};

/// Default channel buffer size for operation progress updates.
pub const OPERATION_CHANNEL_SIZE: usize = 100;
