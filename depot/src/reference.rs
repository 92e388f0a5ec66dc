//! Image reference parsing.
//!
//! Handles the `name[:tag]` form accepted on the command line:
//! - `ubuntu` → name `ubuntu`, tag `latest`
//! - `ubuntu:22.04` → name `ubuntu`, tag `22.04`
//! - `org/app:v1` → name `org/app`, tag `v1`

use std::fmt;

/// Tag used when a reference names none.
pub const DEFAULT_TAG: &str = "latest";

/// A parsed `name:tag` image reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[non_exhaustive]
pub struct Reference {
    /// Repository name (e.g., `ubuntu`, `org/app`).
    pub name: String,
    /// Tag within the repository (e.g., `latest`, `3.18`).
    pub tag: String,
}

impl Reference {
    /// Builds a reference from already separated parts, validating both.
    pub fn new(name: &str, tag: &str) -> crate::Result<Self> {
        if !is_valid_name(name) {
            return Err(crate::Error::InvalidName(name.to_owned()));
        }
        if !is_valid_tag(tag) {
            return Err(crate::Error::InvalidTag(tag.to_owned()));
        }
        Ok(Self {
            name: name.to_owned(),
            tag: tag.to_owned(),
        })
    }

    /// Parses a `name[:tag]` string; the tag defaults to `latest`.
    pub fn parse(input: &str) -> crate::Result<Self> {
        let trimmed = input.trim();
        match trimmed.rsplit_once(':') {
            Some((name, tag)) => Self::new(name, tag),
            None => Self::new(trimmed, DEFAULT_TAG),
        }
    }
}

/// Returns `true` if `name` is non-empty and only uses `[A-Za-z0-9-/]`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'/')
}

/// Returns `true` if `tag` matches `[A-Za-z0-9_][A-Za-z0-9_.-]*`.
///
/// Such a tag is always a single path component and never a hidden file.
pub fn is_valid_tag(tag: &str) -> bool {
    let mut bytes = tag.bytes();
    bytes
        .next()
        .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        && bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}
