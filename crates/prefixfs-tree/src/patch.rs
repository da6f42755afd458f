//! Optimistic edits layered over cached listings.
//!
//! A mutating engine opens a patch before its first store call so views
//! reflect the intended result immediately, then settles the patch when
//! the store answers.

use prefixfs_core::{StorageObject, VfsPath};
use serde::{Deserialize, Serialize};

/// Identifier of an in-flight patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatchId(pub u64);

/// One edit to a folder listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOp {
    /// Show `object` inside `parent`.
    Insert {
        parent: VfsPath,
        object: StorageObject,
    },
    /// Hide `key` from `parent`.
    Remove { parent: VfsPath, key: String },
}

impl PatchOp {
    /// Insert an object into its parent listing.
    pub fn insert(parent: VfsPath, object: StorageObject) -> Self {
        Self::Insert { parent, object }
    }

    /// Remove a key from its parent listing.
    pub fn remove(parent: VfsPath, key: impl Into<String>) -> Self {
        Self::Remove {
            parent,
            key: key.into(),
        }
    }

    /// The folder this edit applies to.
    pub fn parent(&self) -> &VfsPath {
        match self {
            Self::Insert { parent, .. } | Self::Remove { parent, .. } => parent,
        }
    }

    /// Apply the edit to a listing, keeping it sorted by key.
    pub(crate) fn apply(&self, listing: &mut Vec<StorageObject>) {
        match self {
            Self::Insert { object, .. } => {
                match listing.binary_search_by(|o| o.key.as_str().cmp(&object.key)) {
                    Ok(idx) => listing[idx] = object.clone(),
                    Err(idx) => listing.insert(idx, object.clone()),
                }
            }
            Self::Remove { key, .. } => listing.retain(|o| &o.key != key),
        }
    }
}

/// How a patch was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The store accepted the change; fold the edits into the cache.
    Confirmed,
    /// The store rejected the change; drop the edits.
    RolledBack,
}

#[derive(Debug, Clone)]
pub(crate) struct PendingPatch {
    pub id: PatchId,
    pub ops: Vec<PatchOp>,
}
