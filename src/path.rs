//! Hierarchical resource paths.
//! A `Uri` is an absolute, slash-separated path ("/" is the root). Uris are
//! validated and NFC-normalized on construction so that equality and ordering
//! are stable regardless of how the caller composed the string. Plain string
//! ordering on the normalized form is "URI order": every ancestor sorts before
//! all of its descendants, which the index synchronizer relies on.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

pub const ROOT: &str = "/";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UriError {
    #[error("uri cannot be empty")]
    Empty,
    #[error("uri must start with '/'")]
    NotAbsolute,
    #[error("trailing '/' is only allowed on the root uri")]
    TrailingSlash,
    #[error("empty segment ('//') in uri")]
    EmptySegment,
    #[error("segments '.' and '..' are not allowed")]
    DotSegment,
    #[error("NUL characters are not allowed in uris")]
    NulByte,
    #[error("invalid segment {0:?}")]
    BadSegment(String),
}

/// Absolute slash path identifying a resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uri(String);

impl Uri {
    /// The repository root, "/".
    pub fn root() -> Self { Uri(ROOT.to_string()) }

    /// Parse and normalize an absolute path. Rules (same as the rest of the
    /// store): UTF-8, '/'-separated, no NUL, no empty segments, no '.'/'..',
    /// no trailing slash except the root itself.
    pub fn parse(input: &str) -> Result<Self, UriError> {
        if input.is_empty() {
            return Err(UriError::Empty);
        }
        if input == ROOT {
            return Ok(Uri::root());
        }
        if !input.starts_with('/') {
            return Err(UriError::NotAbsolute);
        }
        if input.ends_with('/') {
            return Err(UriError::TrailingSlash);
        }
        if input.contains('\u{0000}') {
            return Err(UriError::NulByte);
        }
        if input.contains("//") {
            return Err(UriError::EmptySegment);
        }
        for seg in input[1..].split('/') {
            if seg.is_empty() {
                return Err(UriError::EmptySegment);
            }
            if seg == "." || seg == ".." {
                return Err(UriError::DotSegment);
            }
        }
        Ok(Uri(input.nfc().collect::<String>()))
    }

    pub fn as_str(&self) -> &str { &self.0 }

    pub fn is_root(&self) -> bool { self.0 == ROOT }

    /// Number of segments; the root has depth 0, "/a/b" has depth 2.
    pub fn depth(&self) -> usize {
        if self.is_root() { 0 } else { self.0.matches('/').count() }
    }

    /// Last path segment. The root reports itself ("/").
    pub fn name(&self) -> &str {
        if self.is_root() {
            ROOT
        } else {
            &self.0[self.0.rfind('/').map(|i| i + 1).unwrap_or(0)..]
        }
    }

    /// Parent uri, or None for the root.
    pub fn parent(&self) -> Option<Uri> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Uri::root()),
            Some(i) => Some(Uri(self.0[..i].to_string())),
            None => None,
        }
    }

    /// Append one child segment. The segment is validated and normalized.
    pub fn extend(&self, segment: &str) -> Result<Uri, UriError> {
        if segment.is_empty() {
            return Err(UriError::EmptySegment);
        }
        if segment.contains('/') || segment.contains('\u{0000}') {
            return Err(UriError::BadSegment(segment.to_string()));
        }
        if segment == "." || segment == ".." {
            return Err(UriError::DotSegment);
        }
        let seg: String = segment.nfc().collect();
        if self.is_root() {
            Ok(Uri(format!("/{seg}")))
        } else {
            Ok(Uri(format!("{}/{seg}", self.0)))
        }
    }

    /// Ancestors most-specific-first: parent, grandparent, ..., root.
    /// Empty for the root itself. This is the walk order the nearest-ACL
    /// resolution uses.
    pub fn ancestors(&self) -> Vec<Uri> {
        let mut out = Vec::new();
        let mut cur = self.parent();
        while let Some(p) = cur {
            cur = p.parent();
            out.push(p);
        }
        out
    }

    /// Strict ancestor test: true when `other` lies below `self` (never equal).
    pub fn is_ancestor_of(&self, other: &Uri) -> bool {
        if self == other {
            return false;
        }
        if self.is_root() {
            return true;
        }
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    /// Subtree membership: self or any descendant.
    pub fn contains(&self, other: &Uri) -> bool {
        self == other || self.is_ancestor_of(other)
    }

    /// Path segments in order; empty for the root.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        let rest = if self.is_root() { "" } else { &self.0[1..] };
        rest.split('/').filter(|s| !s.is_empty())
    }

    /// Rebase this uri from `from` onto `to`, preserving the relative tail.
    /// Used by copy/move to compute destination uris for a whole subtree.
    /// Returns None when `self` is not inside `from`'s subtree.
    pub fn rebased(&self, from: &Uri, to: &Uri) -> Option<Uri> {
        if self == from {
            return Some(to.clone());
        }
        if !from.is_ancestor_of(self) {
            return None;
        }
        let tail = if from.is_root() { &self.0[..] } else { &self.0[from.0.len()..] };
        if to.is_root() {
            Some(Uri(tail.to_string()))
        } else {
            Some(Uri(format!("{}{}", to.0, tail)))
        }
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl AsRef<str> for Uri {
    fn as_ref(&self) -> &str { &self.0 }
}

impl FromStr for Uri {
    type Err = UriError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Uri::parse(s) }
}

impl Serialize for Uri {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Uri {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Uri::parse(&s).map_err(serde::de::Error::custom)
    }
}
