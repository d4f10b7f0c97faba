//! Field paths and field-id derivation.
//!
//! A [`FieldPath`] is the ordered list of object keys and array indexes
//! leading from the settings root to one field. Its [`FieldId`] is the
//! segments joined with `_` behind a literal `root` segment; that string is
//! the only key used by override maps and change tracking, so it must stay
//! stable across re-renders and re-fetches of the same logical field.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Literal first segment of every field id.
pub const ROOT_SEGMENT: &str = "root";

/// Separator placed between segments of a field id.
pub const FIELD_ID_SEPARATOR: char = '_';

// ---------------------------------------------------------------------------
// PathSegment
// ---------------------------------------------------------------------------

/// One step of a [`FieldPath`]: an object key or an array index.
///
/// Deserializes from a JSON number (index) or string (key), which is the
/// shape override maps use for their `path` arrays.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl PathSegment {
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Self::Key(key) => Some(key),
            Self::Index(_) => None,
        }
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(index) => Some(*index),
            Self::Key(_) => None,
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{index}"),
            Self::Key(key) => f.write_str(key),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

// ---------------------------------------------------------------------------
// FieldPath
// ---------------------------------------------------------------------------

/// Ordered path from the settings root to a field. The root itself is the
/// empty path; the `root` literal only appears in the derived [`FieldId`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.0.last()
    }

    /// Return a new path with `segment` appended. `self` is left untouched.
    pub fn append(&self, segment: impl Into<PathSegment>) -> Self {
        let mut segments = Vec::with_capacity(self.0.len() + 1);
        segments.extend_from_slice(&self.0);
        segments.push(segment.into());
        Self(segments)
    }

    /// The path one level up, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// The first `len` segments of this path.
    pub fn prefix(&self, len: usize) -> Self {
        Self(self.0[..len.min(self.0.len())].to_vec())
    }

    pub fn starts_with(&self, other: &FieldPath) -> bool {
        self.0.starts_with(&other.0)
    }

    /// Position of the first array-index segment, if any.
    pub fn first_index_position(&self) -> Option<usize> {
        self.0
            .iter()
            .position(|segment| matches!(segment, PathSegment::Index(_)))
    }

    /// Derive the canonical field id for this path.
    pub fn field_id(&self) -> FieldId {
        FieldId::for_path(self)
    }

    /// Parse a dot-separated path such as `roots.0.name`. All-digit
    /// segments become array indexes; empty input is the root.
    pub fn parse_dotted(input: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::root();
        }
        let segments = trimmed
            .split('.')
            .filter(|s| !s.is_empty())
            .map(|s| match s.parse::<usize>() {
                Ok(index) if s.bytes().all(|b| b.is_ascii_digit()) => PathSegment::Index(index),
                _ => PathSegment::Key(s.to_string()),
            })
            .collect();
        Self(segments)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl From<Vec<PathSegment>> for FieldPath {
    fn from(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }
}

impl FromIterator<PathSegment> for FieldPath {
    fn from_iter<I: IntoIterator<Item = PathSegment>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// FieldId
// ---------------------------------------------------------------------------

/// Canonical string key of one field position, e.g. `root_roots_0_name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(String);

impl FieldId {
    pub fn for_path(path: &FieldPath) -> Self {
        let mut id = String::from(ROOT_SEGMENT);
        for segment in path.segments() {
            id.push(FIELD_ID_SEPARATOR);
            match segment {
                PathSegment::Key(key) => id.push_str(key),
                PathSegment::Index(index) => id.push_str(&index.to_string()),
            }
        }
        Self(id)
    }

    /// Wrap an id received from an external source (e.g. an override map key).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for FieldId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&FieldPath> for FieldId {
    fn from(path: &FieldPath) -> Self {
        Self::for_path(path)
    }
}

impl PartialEq<str> for FieldId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for FieldId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn path(segments: &[PathSegment]) -> FieldPath {
        FieldPath::new(segments.to_vec())
    }

    // -- field ids --

    #[test]
    fn root_path_has_root_id() {
        assert_eq!(FieldPath::root().field_id(), "root");
    }

    #[test]
    fn nested_path_joins_with_underscore() {
        let p = path(&["roots".into(), 0.into(), "name".into()]);
        assert_eq!(p.field_id(), "root_roots_0_name");
    }

    #[test]
    fn field_id_is_deterministic() {
        let a = path(&["a".into(), 3.into()]);
        let b = path(&["a".into(), 3.into()]);
        assert_eq!(a.field_id(), b.field_id());
    }

    #[test]
    fn distinct_positions_have_distinct_ids() {
        let ids: Vec<FieldId> = (0..12)
            .map(|i| FieldPath::root().append("items").append(i).field_id())
            .collect();
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    // -- append / parent --

    #[test]
    fn append_does_not_mutate_original() {
        let base = FieldPath::root().append("a");
        let child = base.append("b");
        assert_eq!(base.len(), 1);
        assert_eq!(child.len(), 2);
        assert!(child.starts_with(&base));
    }

    #[test]
    fn parent_of_root_is_none() {
        assert!(FieldPath::root().parent().is_none());
        let p = FieldPath::root().append("a").append(1);
        assert_eq!(p.parent(), Some(FieldPath::root().append("a")));
    }

    #[test]
    fn first_index_position_finds_array_step() {
        let p = path(&["a".into(), "b".into(), 2.into(), "c".into()]);
        assert_eq!(p.first_index_position(), Some(2));
        assert_eq!(FieldPath::root().append("a").first_index_position(), None);
    }

    // -- parsing --

    #[test]
    fn parse_dotted_recognizes_indexes() {
        let p = FieldPath::parse_dotted("roots.0.name");
        assert_eq!(p, path(&["roots".into(), 0.into(), "name".into()]));
        assert_eq!(p.to_string(), "roots.0.name");
    }

    #[test]
    fn parse_dotted_empty_is_root() {
        assert!(FieldPath::parse_dotted("").is_root());
        assert!(FieldPath::parse_dotted("  ").is_root());
    }

    #[test]
    fn parse_dotted_keeps_signed_numbers_as_keys() {
        let p = FieldPath::parse_dotted("a.-1");
        assert_eq!(p.last(), Some(&PathSegment::Key("-1".to_string())));
    }

    #[test]
    fn segments_deserialize_from_override_paths() {
        let p: FieldPath = serde_json::from_value(serde_json::json!(["roots", 1, "path"])).unwrap();
        assert_eq!(p, path(&["roots".into(), 1.into(), "path".into()]));
    }
}
