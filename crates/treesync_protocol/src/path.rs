//! Normalized tree paths.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Segment that matches any immediate child.
pub const WILDCARD: &str = "*";

/// A normalized path into the data tree.
///
/// Leading and trailing slashes are ignored: `users`, `/users` and `/users/`
/// all parse to the same path, displayed as `/users`. The root is `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TreePath {
    segments: Vec<String>,
}

impl TreePath {
    /// Returns the root path.
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parses a raw path.
    pub fn parse(raw: &str) -> ProtocolResult<Self> {
        let trimmed = raw.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let mut segments = Vec::new();
        for segment in trimmed.split('/') {
            if segment.is_empty() {
                return Err(ProtocolError::invalid_path(raw, "empty segment"));
            }
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    /// Returns the path segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns the number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true for the root path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns a new path with `segment` appended.
    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self { segments }
    }

    /// Returns the parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Returns the last segment.
    pub fn key(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Returns true if any segment is a wildcard.
    pub fn has_wildcard(&self) -> bool {
        self.segments.iter().any(|s| s == WILDCARD)
    }

    /// Returns true if only the last segment is a wildcard (or none is).
    pub fn wildcard_is_trailing(&self) -> bool {
        match self.segments.split_last() {
            Some((_, init)) => init.iter().all(|s| s != WILDCARD),
            None => true,
        }
    }

    /// Returns true if this (possibly wildcard) path addresses `concrete`.
    pub fn matches(&self, concrete: &TreePath) -> bool {
        self.len() == concrete.len() && self.prefix_matches(concrete)
    }

    /// Returns true if `concrete` is a direct child of a node addressed by this path.
    pub fn matches_child(&self, concrete: &TreePath) -> bool {
        concrete.len() == self.len() + 1 && self.prefix_matches(concrete)
    }

    fn prefix_matches(&self, concrete: &TreePath) -> bool {
        self.segments
            .iter()
            .zip(concrete.segments.iter())
            .all(|(pattern, segment)| pattern == WILDCARD || pattern == segment)
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for TreePath {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TreePath {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TreePath> for String {
    fn from(path: TreePath) -> Self {
        path.to_string()
    }
}
