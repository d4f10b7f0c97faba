//! Generic setting values with copy-on-write containers.
//!
//! Settings documents have no compile-time shape, so they are held as a
//! tagged [`SettingValue`]. Arrays and objects sit behind [`Arc`]: cloning a
//! value is O(1), and a write clones only the containers on the edited path
//! (via [`Arc::make_mut`]) while untouched siblings stay shared with every
//! earlier snapshot.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::path::{FieldPath, PathSegment};

/// Ordered object map used for setting objects.
pub type SettingMap = IndexMap<String, SettingValue>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum SettingValue {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Arc<Vec<SettingValue>>),
    Object(Arc<SettingMap>),
}

impl SettingValue {
    pub fn empty_object() -> Self {
        Self::Object(Arc::new(SettingMap::new()))
    }

    pub fn empty_array() -> Self {
        Self::Array(Arc::new(Vec::new()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[SettingValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&SettingMap> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Short type name for logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

    /// Child value for one segment, if this value is a matching container.
    pub fn child(&self, segment: &PathSegment) -> Option<&SettingValue> {
        match (self, segment) {
            (Self::Object(map), PathSegment::Key(key)) => map.get(key),
            (Self::Array(items), PathSegment::Index(index)) => items.get(*index),
            _ => None,
        }
    }

    /// Value at `path`, or `None` when any step is missing.
    pub fn lookup(&self, path: &FieldPath) -> Option<&SettingValue> {
        path.segments()
            .iter()
            .try_fold(self, |current, segment| current.child(segment))
    }

    /// Write `value` at `path`, creating missing intermediate containers.
    ///
    /// Missing or mistyped intermediates become an object when the next
    /// segment is a key and an array when it is an index. An index past the
    /// end of an array is clamped to an append. Returns the path actually
    /// written, which differs from `path` only when an index was clamped.
    pub fn set_at(&mut self, path: &FieldPath, value: SettingValue) -> FieldPath {
        let mut written = Vec::with_capacity(path.len());
        set_recursive(self, path.segments(), value, &mut written);
        FieldPath::new(written)
    }

    /// Remove the value at `path`. Object entries are removed; array
    /// elements are removed and later elements shift down. Returns the
    /// removed value, or `None` when nothing was there.
    pub fn remove_at(&mut self, path: &FieldPath) -> Option<SettingValue> {
        let (last, parents) = path.segments().split_last()?;
        let container = container_mut(self, parents)?;
        match (container, last) {
            (Self::Object(map), PathSegment::Key(key)) => Arc::make_mut(map).shift_remove(key),
            (Self::Array(items), PathSegment::Index(index)) if *index < items.len() => {
                Some(Arc::make_mut(items).remove(*index))
            }
            _ => None,
        }
    }

    /// Make sure an array exists at `path` and return the path that holds
    /// it. Past-end indexes on the way resolve to appends, so the result
    /// can differ from `path`.
    pub fn ensure_array(&mut self, path: &FieldPath) -> FieldPath {
        match self.lookup(path) {
            Some(Self::Array(_)) => path.clone(),
            _ => self.set_at(path, Self::empty_array()),
        }
    }

    /// Mutable access to the array at `path`, converting a missing or
    /// non-array value into an empty array first.
    pub fn array_at_mut(&mut self, path: &FieldPath) -> &mut Vec<SettingValue> {
        if !matches!(self.lookup(path), Some(Self::Array(_))) {
            self.set_at(path, Self::empty_array());
        }
        let target = walk_mut(self, path.segments());
        if !matches!(target, Self::Array(_)) {
            *target = Self::empty_array();
        }
        match target {
            Self::Array(items) => Arc::make_mut(items),
            _ => unreachable!("target was just replaced with an array"),
        }
    }

    /// True when both values are containers backed by the same allocation.
    pub fn shares_storage_with(&self, other: &SettingValue) -> bool {
        match (self, other) {
            (Self::Array(a), Self::Array(b)) => Arc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Every path below this value that holds a non-container value, in
    /// document order. Empty containers count as leaves.
    pub fn leaf_paths(&self, base: &FieldPath) -> Vec<FieldPath> {
        let mut out = Vec::new();
        collect_leaves(self, base, &mut out);
        out
    }
}

// ---- private helpers ----

fn set_recursive(
    target: &mut SettingValue,
    segments: &[PathSegment],
    value: SettingValue,
    written: &mut Vec<PathSegment>,
) {
    let Some((first, rest)) = segments.split_first() else {
        *target = value;
        return;
    };

    match first {
        PathSegment::Key(key) => {
            if !matches!(target, SettingValue::Object(_)) {
                *target = SettingValue::empty_object();
            }
            written.push(first.clone());
            if let SettingValue::Object(map) = target {
                let slot = Arc::make_mut(map)
                    .entry(key.clone())
                    .or_insert(SettingValue::Null);
                set_recursive(slot, rest, value, written);
            }
        }
        PathSegment::Index(index) => {
            if !matches!(target, SettingValue::Array(_)) {
                *target = SettingValue::empty_array();
            }
            if let SettingValue::Array(items) = target {
                let items = Arc::make_mut(items);
                let index = if *index >= items.len() {
                    if *index > items.len() {
                        tracing::debug!(
                            requested = *index,
                            len = items.len(),
                            "Array index past end, appending instead",
                        );
                    }
                    items.push(SettingValue::Null);
                    items.len() - 1
                } else {
                    *index
                };
                written.push(PathSegment::Index(index));
                set_recursive(&mut items[index], rest, value, written);
            }
        }
    }
}

/// Walk to an existing container, cloning shared containers on the way.
fn container_mut<'a>(
    value: &'a mut SettingValue,
    segments: &[PathSegment],
) -> Option<&'a mut SettingValue> {
    let Some((first, rest)) = segments.split_first() else {
        return Some(value);
    };
    let next = match (value, first) {
        (SettingValue::Object(map), PathSegment::Key(key)) => Arc::make_mut(map).get_mut(key)?,
        (SettingValue::Array(items), PathSegment::Index(index)) => {
            Arc::make_mut(items).get_mut(*index)?
        }
        _ => return None,
    };
    container_mut(next, rest)
}

/// Like [`container_mut`] but only called on paths known to exist.
fn walk_mut<'a>(value: &'a mut SettingValue, segments: &[PathSegment]) -> &'a mut SettingValue {
    let mut current = value;
    for segment in segments {
        current = match (current, segment) {
            (SettingValue::Object(map), PathSegment::Key(key)) => Arc::make_mut(map)
                .entry(key.clone())
                .or_insert(SettingValue::Null),
            (SettingValue::Array(items), PathSegment::Index(index)) => {
                let items = Arc::make_mut(items);
                let last = items.len().saturating_sub(1);
                if items.is_empty() {
                    items.push(SettingValue::Null);
                }
                &mut items[(*index).min(last)]
            }
            (other, _) => other,
        };
    }
    current
}

fn collect_leaves(value: &SettingValue, path: &FieldPath, out: &mut Vec<FieldPath>) {
    match value {
        SettingValue::Object(map) if !map.is_empty() => {
            for (key, child) in map.iter() {
                collect_leaves(child, &path.append(key.as_str()), out);
            }
        }
        SettingValue::Array(items) if !items.is_empty() => {
            for (index, child) in items.iter().enumerate() {
                collect_leaves(child, &path.append(index), out);
            }
        }
        _ => out.push(path.clone()),
    }
}

// ---------------------------------------------------------------------------
// serde_json conversions
// ---------------------------------------------------------------------------

impl From<serde_json::Value> for SettingValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(Arc::new(items.into_iter().map(Self::from).collect()))
            }
            serde_json::Value::Object(map) => Self::Object(Arc::new(
                map.into_iter().map(|(k, v)| (k, Self::from(v))).collect(),
            )),
        }
    }
}

impl From<&SettingValue> for serde_json::Value {
    fn from(value: &SettingValue) -> Self {
        match value {
            SettingValue::Null => serde_json::Value::Null,
            SettingValue::Bool(b) => serde_json::Value::Bool(*b),
            SettingValue::Number(n) => serde_json::Value::Number(n.clone()),
            SettingValue::String(s) => serde_json::Value::String(s.clone()),
            SettingValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            SettingValue::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<SettingValue> for serde_json::Value {
    fn from(value: SettingValue) -> Self {
        serde_json::Value::from(&value)
    }
}

impl From<&str> for SettingValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for SettingValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for SettingValue {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<i32> for SettingValue {
    fn from(n: i32) -> Self {
        Self::Number(n.into())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
