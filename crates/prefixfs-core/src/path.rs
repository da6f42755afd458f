//! Mapping between display paths and storage keys.
//!
//! Paths are `/`-separated, relative, and carry no trailing slash. The empty
//! path is the bucket root. A trailing `/` is only added when a folder path
//! is turned into a storage key with [`to_key`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PathError;

/// Separator between path segments.
pub const SEPARATOR: char = '/';

/// A validated, normalized path inside the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VfsPath(String);

impl VfsPath {
    /// The root path.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Parse and validate a path.
    pub fn parse(path: impl Into<String>) -> Result<Self, PathError> {
        let path = path.into();
        validate_path(&path)?;
        Ok(Self(path))
    }

    /// Build a path from a storage key, returning whether the key names a folder.
    pub fn from_key(key: &str) -> Result<(Self, bool), PathError> {
        let is_folder = key.ends_with(SEPARATOR);
        let path = key.strip_suffix(SEPARATOR).unwrap_or(key);
        Ok((Self::parse(path)?, is_folder))
    }

    /// Borrow the path as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Storage key for this path.
    pub fn to_key(&self, is_folder: bool) -> String {
        to_key(&self.0, is_folder)
    }

    /// The prefix used to list this folder's contents.
    pub fn as_prefix(&self) -> String {
        to_key(&self.0, true)
    }

    /// Parent path (`None` for the root).
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            Some(Self(parent_of(&self.0).to_string()))
        }
    }

    /// Last segment of the path (empty for the root).
    pub fn name(&self) -> &str {
        name_of(&self.0)
    }

    /// Append a single name.
    pub fn join(&self, name: &str) -> Result<Self, PathError> {
        validate_name(name)?;
        if self.is_root() {
            Ok(Self(name.to_string()))
        } else {
            Ok(Self(format!("{}{SEPARATOR}{name}", self.0)))
        }
    }

    /// Replace the last segment.
    pub fn with_name(&self, name: &str) -> Result<Self, PathError> {
        match self.parent() {
            Some(parent) => parent.join(name),
            None => Err(PathError::InvalidName {
                name: name.to_string(),
            }),
        }
    }

    /// Whether `self` equals `other` or lies beneath it.
    pub fn is_within(&self, other: &VfsPath) -> bool {
        is_same_or_descendant(&self.0, &other.0)
    }

    /// Number of segments (0 for the root).
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.split(SEPARATOR).count()
        }
    }

    /// Every ancestor from the root down to the direct parent.
    pub fn ancestors(&self) -> Vec<VfsPath> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(path) = current {
            current = path.parent();
            out.push(path);
        }
        out.reverse();
        out
    }
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl AsRef<str> for VfsPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for VfsPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for VfsPath {
    type Error = PathError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<VfsPath> for String {
    fn from(value: VfsPath) -> Self {
        value.0
    }
}

/// Validate a display path.
///
/// The empty string (root) is valid.
pub fn validate_path(path: &str) -> Result<(), PathError> {
    if path.is_empty() {
        return Ok(());
    }
    if let Some(ch) = path.chars().find(|c| c.is_control()) {
        return Err(PathError::ControlCharacter {
            path: path.to_string(),
            ch,
        });
    }
    if path.starts_with(SEPARATOR) {
        return Err(PathError::LeadingSlash {
            path: path.to_string(),
        });
    }
    if path.ends_with(SEPARATOR) {
        return Err(PathError::TrailingSlash {
            path: path.to_string(),
        });
    }
    for segment in path.split(SEPARATOR) {
        if segment.is_empty() {
            return Err(PathError::EmptySegment {
                path: path.to_string(),
            });
        }
        if segment == "." || segment == ".." {
            return Err(PathError::ReservedSegment {
                path: path.to_string(),
                segment: segment.to_string(),
            });
        }
    }
    Ok(())
}

/// Validate a single name (one path segment).
pub fn validate_name(name: &str) -> Result<(), PathError> {
    if name.is_empty() || name.contains(SEPARATOR) {
        return Err(PathError::InvalidName {
            name: name.to_string(),
        });
    }
    validate_path(name)
}

/// Storage key for a path: a trailing `/` is appended iff it is a folder.
///
/// The root folder maps to the empty prefix.
pub fn to_key(path: &str, is_folder: bool) -> String {
    if is_folder && !path.is_empty() {
        format!("{path}{SEPARATOR}")
    } else {
        path.to_string()
    }
}

/// Parent of a path or key; `""` for top-level entries.
pub fn parent_of(path: &str) -> &str {
    let trimmed = path.strip_suffix(SEPARATOR).unwrap_or(path);
    match trimmed.rfind(SEPARATOR) {
        Some(idx) => &trimmed[..idx],
        None => "",
    }
}

/// Last non-empty segment of a path or key.
pub fn name_of(path: &str) -> &str {
    path.split(SEPARATOR)
        .filter(|s| !s.is_empty())
        .next_back()
        .unwrap_or("")
}

/// Whether `path` equals `ancestor` or is nested beneath it.
///
/// Compares whole segments, so `photos2` is not inside `photos`.
pub fn is_same_or_descendant(path: &str, ancestor: &str) -> bool {
    if ancestor.is_empty() {
        return true;
    }
    path == ancestor
        || (path.starts_with(ancestor) && path[ancestor.len()..].starts_with(SEPARATOR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_key() {
        assert_eq!(to_key("docs", true), "docs/");
        assert_eq!(to_key("docs/report.pdf", false), "docs/report.pdf");
        assert_eq!(to_key("", true), "");
    }

    #[test]
    fn test_parent_of() {
        assert_eq!(parent_of("docs/report.pdf"), "docs");
        assert_eq!(parent_of("docs/sub/"), "docs");
        assert_eq!(parent_of("docs"), "");
        assert_eq!(parent_of(""), "");
    }

    #[test]
    fn test_name_of() {
        assert_eq!(name_of("docs/report.pdf"), "report.pdf");
        assert_eq!(name_of("docs/sub/"), "sub");
        assert_eq!(name_of(""), "");
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("").is_ok());
        assert!(validate_path("a/b/c.txt").is_ok());
        assert!(matches!(
            validate_path("/a"),
            Err(PathError::LeadingSlash { .. })
        ));
        assert!(matches!(
            validate_path("a//b"),
            Err(PathError::EmptySegment { .. })
        ));
        assert!(matches!(
            validate_path("a/b/"),
            Err(PathError::TrailingSlash { .. })
        ));
        assert!(matches!(
            validate_path("a/\tb"),
            Err(PathError::ControlCharacter { .. })
        ));
        assert!(matches!(
            validate_path("a/../b"),
            Err(PathError::ReservedSegment { .. })
        ));
    }

    #[test]
    fn test_is_same_or_descendant() {
        assert!(is_same_or_descendant("photos", "photos"));
        assert!(is_same_or_descendant("photos/2024", "photos"));
        assert!(!is_same_or_descendant("photos2", "photos"));
        assert!(!is_same_or_descendant("docs", "photos"));
        assert!(is_same_or_descendant("anything", ""));
    }

    #[test]
    fn test_vfs_path_navigation() {
        let path = VfsPath::parse("a/b/c").unwrap();
        assert_eq!(path.name(), "c");
        assert_eq!(path.parent().unwrap().as_str(), "a/b");
        assert_eq!(path.depth(), 3);
        assert_eq!(
            path.ancestors()
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>(),
            vec!["", "a", "a/b"]
        );
        assert_eq!(path.with_name("d").unwrap().as_str(), "a/b/d");
        assert!(VfsPath::root().parent().is_none());
    }

    #[test]
    fn test_from_key() {
        let (path, is_folder) = VfsPath::from_key("docs/sub/").unwrap();
        assert_eq!(path.as_str(), "docs/sub");
        assert!(is_folder);

        let (path, is_folder) = VfsPath::from_key("docs/a.txt").unwrap();
        assert_eq!(path.as_str(), "docs/a.txt");
        assert!(!is_folder);

        assert!(VfsPath::from_key("docs//").is_err());
    }

    #[test]
    fn test_join_rejects_separator() {
        let root = VfsPath::root();
        assert_eq!(root.join("a").unwrap().as_str(), "a");
        assert!(root.join("a/b").is_err());
        assert!(root.join("").is_err());
    }
}
