use std::fmt;

use crate::error::{DfsError, Result};

/// Normalized absolute path in the namespace: an ordered sequence of name
/// segments. The root is the empty-segment path. Redundant separators are
/// collapsed during parsing; `.` and `..` are rejected rather than resolved.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DfsPath {
    segments: Vec<String>,
}

impl DfsPath {
    pub fn root() -> Self {
        Self { segments: Vec::new() }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        if !raw.starts_with('/') {
            return Err(DfsError::InvalidPath(format!("not absolute: {raw}")));
        }
        let mut segments = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" => continue,
                "." | ".." => {
                    return Err(DfsError::InvalidPath(format!(
                        "relative segment in {raw}"
                    )))
                }
                name => segments.push(name.to_string()),
            }
        }
        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Final segment; `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<DfsPath> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn join(&self, name: &str) -> DfsPath {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }

    /// True when `self` is `ancestor` or lies underneath it. Used to reject
    /// renames of a directory into its own subtree.
    pub fn starts_with(&self, ancestor: &DfsPath) -> bool {
        self.segments.len() >= ancestor.segments.len()
            && self.segments[..ancestor.segments.len()] == ancestor.segments[..]
    }
}

impl fmt::Display for DfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_separators() {
        let path = DfsPath::parse("//a///b/c/").unwrap();
        assert_eq!(path.segments(), ["a", "b", "c"]);
        assert_eq!(path.to_string(), "/a/b/c");
    }

    #[test]
    fn root_is_the_empty_segment_path() {
        let root = DfsPath::parse("/").unwrap();
        assert!(root.is_root());
        assert_eq!(root, DfsPath::root());
        assert_eq!(root.to_string(), "/");
        assert!(root.parent().is_none());
        assert!(root.name().is_none());
    }

    #[test]
    fn rejects_relative_and_dotted_paths() {
        assert!(matches!(
            DfsPath::parse("a/b"),
            Err(DfsError::InvalidPath(_))
        ));
        assert!(matches!(
            DfsPath::parse("/a/../b"),
            Err(DfsError::InvalidPath(_))
        ));
        assert!(matches!(
            DfsPath::parse("/a/./b"),
            Err(DfsError::InvalidPath(_))
        ));
    }

    #[test]
    fn parent_and_join_are_inverses() {
        let path = DfsPath::parse("/a/b/c").unwrap();
        let parent = path.parent().unwrap();
        assert_eq!(parent.to_string(), "/a/b");
        assert_eq!(parent.join("c"), path);
    }

    #[test]
    fn starts_with_detects_subtrees() {
        let dir = DfsPath::parse("/a/b").unwrap();
        let inside = DfsPath::parse("/a/b/c").unwrap();
        let sibling = DfsPath::parse("/a/bc").unwrap();
        assert!(inside.starts_with(&dir));
        assert!(dir.starts_with(&dir));
        assert!(!sibling.starts_with(&dir));
        assert!(inside.starts_with(&DfsPath::root()));
    }
}
