//! Paste conflict detection types.

use prefixfs_core::VfsPath;
use prefixfs_tree::key_is_under;
use serde::{Deserialize, Serialize};

use crate::clipboard::ClipboardItem;

/// A name collision between a clipboard item and an object already in the
/// paste destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// The clipboard item being pasted.
    pub item: ClipboardItem,
    /// Key of the object already occupying the name.
    pub existing_key: String,
}

impl Conflict {
    /// Create a new conflict.
    pub fn new(item: ClipboardItem, existing_key: impl Into<String>) -> Self {
        Self {
            item,
            existing_key: existing_key.into(),
        }
    }

    /// Whether the colliding object is the clipboard item itself or a
    /// folder holding it. Replacing it would delete the item.
    pub fn contains_item(&self) -> bool {
        self.existing_key == self.item.key
            || VfsPath::from_key(&self.existing_key)
                .is_ok_and(|(existing, _)| key_is_under(&self.item.key, &existing))
    }
}

/// How paste handles name collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// Leave colliding items where they are.
    #[default]
    Skip,
    /// Delete the colliding object, then paste over it.
    ReplaceAll,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skip => write!(f, "Skip"),
            Self::ReplaceAll => write!(f, "Replace all"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict(item: &str, existing: &str) -> Conflict {
        Conflict::new(ClipboardItem::from_key(item).unwrap(), existing)
    }

    #[test]
    fn test_contains_item() {
        assert!(conflict("docs/a.txt", "docs/a.txt").contains_item());
        assert!(conflict("a/a/", "a/").contains_item());
        assert!(conflict("x/x", "x/").contains_item());
        assert!(!conflict("docs/a.txt", "archive/a.txt").contains_item());
        assert!(!conflict("ab/a/", "a/").contains_item());
    }
}
