//! Sort and search views over the cache.
//!
//! Views are pure: the only state they carry is the sort order.

use std::cmp::Ordering;

use prefixfs_core::{TreeNode, VfsPath};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, FromRepr, IntoEnumIterator};

use crate::cache::TreeCache;

/// Attribute to sort listings by.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter, FromRepr, Serialize, Deserialize,
)]
pub enum SortKey {
    #[default]
    Name,
    Size,
    #[strum(to_string = "Date")]
    Modified,
    Type,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    /// Flip the direction.
    pub fn reverse(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }
}

/// Sort key plus direction. Folders always come first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SortOrder {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl SortOrder {
    /// Create a sort order.
    pub fn new(key: SortKey, direction: SortDirection) -> Self {
        Self { key, direction }
    }

    /// Cycle to the next sort key, keeping the direction.
    pub fn next(self) -> Self {
        let next = (self.key as usize + 1) % SortKey::iter().count();
        Self {
            key: SortKey::from_repr(next).unwrap_or_default(),
            ..self
        }
    }

    /// Reverse the direction.
    pub fn reverse(self) -> Self {
        Self {
            direction: self.direction.reverse(),
            ..self
        }
    }

    /// Short label for status lines.
    pub fn short_label(&self) -> String {
        let arrow = match self.direction {
            SortDirection::Ascending => '↑',
            SortDirection::Descending => '↓',
        };
        format!("{}{arrow}", self.key)
    }

    /// Compare two nodes under this order.
    pub fn compare(&self, a: &TreeNode, b: &TreeNode) -> Ordering {
        // Folders first regardless of direction.
        match (a.is_folder, b.is_folder) {
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }
        let by_key = match self.key {
            SortKey::Name => compare_names(&a.name, &b.name),
            SortKey::Size => a.size.cmp(&b.size),
            SortKey::Modified => a.last_modified.cmp(&b.last_modified),
            SortKey::Type => a
                .extension()
                .to_lowercase()
                .cmp(&b.extension().to_lowercase()),
        };
        let ordered = match self.direction {
            SortDirection::Ascending => by_key,
            SortDirection::Descending => by_key.reverse(),
        };
        ordered.then_with(|| compare_names(&a.name, &b.name))
    }

    /// Sort nodes in place.
    pub fn sort(&self, nodes: &mut [TreeNode]) {
        nodes.sort_by(|a, b| self.compare(a, b));
    }
}

fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Whether a name matches a search query (case-insensitive substring).
pub fn matches_query(name: &str, query: &str) -> bool {
    let query = query.trim();
    query.is_empty() || name.to_lowercase().contains(&query.to_lowercase())
}

/// Keep nodes whose name matches `query`.
pub fn filter_nodes(nodes: Vec<TreeNode>, query: &str) -> Vec<TreeNode> {
    nodes
        .into_iter()
        .filter(|n| matches_query(&n.name, query))
        .collect()
}

/// Sorted, filtered read access to cached listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeView {
    pub order: SortOrder,
}

impl TreeView {
    /// Create a view with a sort order.
    pub fn new(order: SortOrder) -> Self {
        Self { order }
    }

    /// Cached children of `path`, filtered and sorted.
    pub fn children(&self, cache: &TreeCache, path: &VfsPath, query: Option<&str>) -> Vec<TreeNode> {
        let mut nodes = cache.child_nodes(path);
        if let Some(query) = query {
            nodes = filter_nodes(nodes, query);
        }
        self.order.sort(&mut nodes);
        for node in &mut nodes {
            if let Some(children) = node.children.as_mut() {
                self.order.sort(children);
            }
        }
        nodes
    }

    /// Search every cached listing beneath `root`.
    ///
    /// Only what is already cached is searched; no listing is fetched.
    pub fn search(&self, cache: &TreeCache, root: &VfsPath, query: &str) -> Vec<TreeNode> {
        let mut hits: Vec<TreeNode> = cache
            .cached_paths()
            .into_iter()
            .filter(|path| path.is_within(root))
            .flat_map(|path| cache.child_nodes(&path))
            .filter(|node| matches_query(&node.name, query))
            .map(|mut node| {
                node.children = None;
                node
            })
            .collect();
        hits.dedup_by(|a, b| a.path == b.path);
        self.order.sort(&mut hits);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn node(path: &str, is_folder: bool, size: u64, age_secs: i64) -> TreeNode {
        TreeNode::new(
            VfsPath::parse(path).unwrap(),
            is_folder,
            size,
            Utc::now() - Duration::seconds(age_secs),
        )
    }

    fn names(nodes: &[TreeNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.name.as_str()).collect()
    }

    #[test]
    fn test_folders_first_both_directions() {
        let mut nodes = vec![
            node("b.txt", false, 5, 0),
            node("zdir", true, 0, 0),
            node("a.txt", false, 1, 0),
            node("adir", true, 0, 0),
        ];
        let asc = SortOrder::new(SortKey::Name, SortDirection::Ascending);
        asc.sort(&mut nodes);
        assert_eq!(names(&nodes), vec!["adir", "zdir", "a.txt", "b.txt"]);

        asc.reverse().sort(&mut nodes);
        assert_eq!(names(&nodes), vec!["zdir", "adir", "b.txt", "a.txt"]);
    }

    #[test]
    fn test_sort_by_size_and_date() {
        let mut nodes = vec![
            node("big", false, 100, 30),
            node("small", false, 1, 10),
            node("mid", false, 50, 20),
        ];
        SortOrder::new(SortKey::Size, SortDirection::Descending).sort(&mut nodes);
        assert_eq!(names(&nodes), vec!["big", "mid", "small"]);

        SortOrder::new(SortKey::Modified, SortDirection::Ascending).sort(&mut nodes);
        assert_eq!(names(&nodes), vec!["big", "mid", "small"]);
    }

    #[test]
    fn test_sort_by_type() {
        let mut nodes = vec![
            node("b.txt", false, 0, 0),
            node("a.pdf", false, 0, 0),
            node("c.doc", false, 0, 0),
        ];
        SortOrder::new(SortKey::Type, SortDirection::Ascending).sort(&mut nodes);
        assert_eq!(names(&nodes), vec!["c.doc", "a.pdf", "b.txt"]);
    }

    #[test]
    fn test_sort_order_cycle() {
        let order = SortOrder::default();
        assert_eq!(order.next().key, SortKey::Size);
        assert_eq!(order.next().next().next().next().key, SortKey::Name);
        assert_eq!(order.short_label(), "Name↑");
    }

    #[test]
    fn test_matches_query() {
        assert!(matches_query("Report.PDF", "report"));
        assert!(matches_query("anything", ""));
        assert!(!matches_query("notes.txt", "pdf"));
    }
}
