//! Object and tree node types.

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::path::{SEPARATOR, VfsPath, name_of};

/// One entry returned by a prefix listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageObject {
    /// Full storage key. Folder keys end with `/`.
    pub key: String,
    /// Size in bytes (0 for folder keys).
    pub size: u64,
    /// Last modification time reported by the store.
    pub last_modified: DateTime<Utc>,
    /// Whether the key names a folder.
    pub is_folder: bool,
}

impl StorageObject {
    /// Create an object; `is_folder` is derived from the key.
    pub fn new(key: impl Into<String>, size: u64, last_modified: DateTime<Utc>) -> Self {
        let key = key.into();
        let is_folder = key.ends_with(SEPARATOR);
        Self {
            key,
            size,
            last_modified,
            is_folder,
        }
    }

    /// Create a zero-byte folder object for a path.
    pub fn folder(path: &VfsPath, last_modified: DateTime<Utc>) -> Self {
        Self::new(path.to_key(true), 0, last_modified)
    }

    /// Last segment of the key.
    pub fn name(&self) -> &str {
        name_of(&self.key)
    }

    /// Key without its trailing slash.
    pub fn path_str(&self) -> &str {
        self.key.strip_suffix(SEPARATOR).unwrap_or(&self.key)
    }
}

/// A node of the navigable tree derived from prefix listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    /// Display name (last path segment).
    pub name: CompactString,
    /// Path without a trailing slash.
    pub path: VfsPath,
    /// Whether this node is a folder.
    pub is_folder: bool,
    /// Size in bytes (0 for folders).
    pub size: u64,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
    /// Children, or `None` while the folder's listing is not loaded.
    pub children: Option<Vec<TreeNode>>,
    /// Whether the folder is expanded in the view.
    pub is_expanded: bool,
}

impl TreeNode {
    /// Create an unloaded node.
    pub fn new(path: VfsPath, is_folder: bool, size: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            name: CompactString::from(path.name()),
            path,
            is_folder,
            size,
            last_modified,
            children: None,
            is_expanded: false,
        }
    }

    /// Whether the children listing has been loaded.
    pub fn is_loaded(&self) -> bool {
        self.children.is_some()
    }

    /// Number of loaded children.
    pub fn child_count(&self) -> usize {
        self.children.as_ref().map_or(0, Vec::len)
    }

    /// File extension, used by the type sort.
    pub fn extension(&self) -> &str {
        if self.is_folder {
            return "";
        }
        match self.name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext,
            _ => "",
        }
    }

    /// Find a loaded descendant by path.
    pub fn find(&self, path: &VfsPath) -> Option<&TreeNode> {
        if &self.path == path {
            return Some(self);
        }
        if !path.is_within(&self.path) {
            return None;
        }
        self.children
            .as_ref()?
            .iter()
            .find_map(|child| child.find(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_object_folder_flag() {
        let now = Utc::now();
        assert!(StorageObject::new("docs/", 0, now).is_folder);
        assert!(!StorageObject::new("docs/a.txt", 3, now).is_folder);
        assert_eq!(StorageObject::new("docs/sub/", 0, now).name(), "sub");
        assert_eq!(StorageObject::new("docs/sub/", 0, now).path_str(), "docs/sub");
    }

    #[test]
    fn test_tree_node_extension() {
        let now = Utc::now();
        let file = TreeNode::new(VfsPath::parse("a/report.pdf").unwrap(), false, 10, now);
        assert_eq!(file.extension(), "pdf");
        let dotfile = TreeNode::new(VfsPath::parse(".env").unwrap(), false, 1, now);
        assert_eq!(dotfile.extension(), "");
        assert!(!file.is_loaded());
    }

    #[test]
    fn test_tree_node_find() {
        let now = Utc::now();
        let mut root = TreeNode::new(VfsPath::root(), true, 0, now);
        let mut docs = TreeNode::new(VfsPath::parse("docs").unwrap(), true, 0, now);
        docs.children = Some(vec![TreeNode::new(
            VfsPath::parse("docs/a.txt").unwrap(),
            false,
            1,
            now,
        )]);
        root.children = Some(vec![docs]);

        let target = VfsPath::parse("docs/a.txt").unwrap();
        assert_eq!(root.find(&target).unwrap().name, "a.txt");
        assert!(root.find(&VfsPath::parse("missing").unwrap()).is_none());
    }
}
