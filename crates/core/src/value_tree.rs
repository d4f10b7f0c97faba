//! Editable settings tree: schema + original data + live edits.
//!
//! The tree keeps the last-persisted document (`original`) next to the
//! session's working copy (`live`). Writes go through the schema for
//! normalization and land on `live` copy-on-write, so a snapshot taken
//! before an edit keeps observing the old values.
//!
//! Field ids embed array positions. After any structural array edit every
//! field at or after the touched index has a new identity; callers must
//! re-derive change classification for the whole array (see
//! [`ValueTree::fields_under`]).

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::path::{FieldId, FieldPath, PathSegment};
use crate::schema::{Schema, SchemaKind, SchemaNode};
use crate::value::SettingValue;

// ---------------------------------------------------------------------------
// SettingsPatch
// ---------------------------------------------------------------------------

/// Minimal document handed to persistence.
///
/// `document` mirrors the settings tree but only contains the subtrees
/// needed to express the changed fields. A field cleared back to "no
/// explicit value" appears as an explicit `null` (and in `cleared_fields`)
/// rather than being omitted. Arrays are sent whole because positional
/// edits cannot be expressed key-by-key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsPatch {
    pub document: serde_json::Value,
    pub changed_fields: Vec<FieldId>,
    pub cleared_fields: Vec<FieldId>,
}

impl SettingsPatch {
    pub fn empty() -> Self {
        Self {
            document: serde_json::Value::Object(Default::default()),
            changed_fields: Vec::new(),
            cleared_fields: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed_fields.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ValueTree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ValueTree {
    schema: Arc<Schema>,
    original: SettingValue,
    live: SettingValue,
}

impl ValueTree {
    /// Build a tree whose live copy starts equal to `original`. A `null`
    /// original (nothing stored yet) becomes an empty object.
    pub fn new(schema: Arc<Schema>, original: SettingValue) -> Self {
        let original = match original {
            SettingValue::Null => SettingValue::empty_object(),
            SettingValue::Object(_) => original,
            other => {
                tracing::warn!(kind = other.kind(), "Settings document is not an object");
                other
            }
        };
        Self {
            schema,
            live: original.clone(),
            original,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn original(&self) -> &SettingValue {
        &self.original
    }

    pub fn live(&self) -> &SettingValue {
        &self.live
    }

    /// O(1) snapshot of the live document.
    pub fn snapshot(&self) -> SettingValue {
        self.live.clone()
    }

    pub fn live_at(&self, path: &FieldPath) -> Option<&SettingValue> {
        self.live.lookup(path)
    }

    pub fn original_at(&self, path: &FieldPath) -> Option<&SettingValue> {
        self.original.lookup(path)
    }

    /// Live value at `path`, falling back to the schema default for the
    /// node, then `null` for paths the schema does not know.
    pub fn get(&self, path: &FieldPath) -> SettingValue {
        if let Some(value) = self.live.lookup(path) {
            return value.clone();
        }
        match self.schema.node_at(path) {
            Some(node) => node.effective_default(),
            None => {
                tracing::debug!(path = %path, "No schema node for path, returning null");
                SettingValue::Null
            }
        }
    }

    /// True when the live value at `path` differs from the original.
    ///
    /// A field with no stored original compares against its schema default,
    /// so writing back the displayed default is not a change. Inside arrays
    /// presence always counts, since element existence is positional.
    pub fn is_changed(&self, path: &FieldPath) -> bool {
        match (self.live.lookup(path), self.original.lookup(path)) {
            (Some(live), None) if path.first_index_position().is_none() => self
                .schema
                .node_at(path)
                .map_or(true, |node| *live != node.effective_default()),
            (live, original) => live != original,
        }
    }

    /// Replace the value at `path` after schema normalization. Missing
    /// intermediate containers are created. Returns the path written.
    pub fn set(&mut self, path: &FieldPath, value: SettingValue) -> FieldPath {
        let value = self.normalize(path, value);
        self.live.set_at(path, value)
    }

    /// Remove the explicit value at `path`. An array element is nulled
    /// rather than removed so that sibling positions do not shift.
    pub fn clear(&mut self, path: &FieldPath) -> Option<SettingValue> {
        match path.last() {
            Some(PathSegment::Index(_)) => {
                let previous = self.live.lookup(path).cloned();
                if previous.is_some() {
                    self.live.set_at(path, SettingValue::Null);
                }
                previous
            }
            Some(PathSegment::Key(_)) => self.live.remove_at(path),
            None => {
                let previous = std::mem::replace(&mut self.live, SettingValue::empty_object());
                Some(previous)
            }
        }
    }

    // -- structural array edits ---------------------------------------------

    /// Insert `item` into the array at `path`, creating the array when
    /// missing. The index is clamped to the array length. Returns the path
    /// of the array actually written and the index used.
    pub fn array_insert(
        &mut self,
        path: &FieldPath,
        index: usize,
        item: SettingValue,
    ) -> (FieldPath, usize) {
        let array_path = self.live.ensure_array(path);
        if array_path != *path {
            tracing::warn!(
                requested = %path,
                resolved = %array_path,
                "Array path resolved to a different position",
            );
        }
        let len = self.array_len(&array_path);
        let index = clamp_index(&array_path, index, len, len, "insert");
        let item = self.normalize(&array_path.append(index), item);
        self.live.array_at_mut(&array_path).insert(index, item);
        (array_path, index)
    }

    /// Remove the element at `index`, clamped to the last element. Returns
    /// `None` only when the array is empty or absent.
    pub fn array_remove(&mut self, path: &FieldPath, index: usize) -> Option<SettingValue> {
        let len = self.array_len(path);
        if len == 0 {
            tracing::warn!(path = %path, index, "Remove from empty array ignored");
            return None;
        }
        let index = clamp_index(path, index, len, len - 1, "remove");
        Some(self.live.array_at_mut(path).remove(index))
    }

    /// Move the element at `from` so that it ends up at `to`. Both indexes
    /// are clamped. Returns whether anything moved.
    pub fn array_move(&mut self, path: &FieldPath, from: usize, to: usize) -> bool {
        let len = self.array_len(path);
        if len == 0 {
            tracing::warn!(path = %path, from, to, "Move within empty array ignored");
            return false;
        }
        let from = clamp_index(path, from, len, len - 1, "move");
        let to = clamp_index(path, to, len, len - 1, "move");
        if from == to {
            return false;
        }
        let items = self.live.array_at_mut(path);
        let item = items.remove(from);
        items.insert(to, item);
        true
    }

    fn array_len(&self, path: &FieldPath) -> usize {
        self.live
            .lookup(path)
            .and_then(SettingValue::as_array)
            .map(<[SettingValue]>::len)
            .unwrap_or(0)
    }

    // -- field enumeration ----------------------------------------------------

    /// Every field position at or below `base` in either the live or the
    /// original document, in document order without duplicates.
    ///
    /// Fields are schema leaves (including multi-select lists) plus any
    /// scalar data the schema does not describe.
    pub fn fields_under(&self, base: &FieldPath) -> Vec<FieldPath> {
        let node = self.schema.node_at(base);
        let mut out = Vec::new();
        collect_fields(node, self.live.lookup(base), base, &mut out);
        collect_fields(node, self.original.lookup(base), base, &mut out);

        let mut seen = HashSet::with_capacity(out.len());
        out.retain(|path| seen.insert(path.clone()));
        out
    }

    /// Fields at or below `base` whose live value differs from the original.
    pub fn changed_fields_under(&self, base: &FieldPath) -> Vec<FieldPath> {
        self.fields_under(base)
            .into_iter()
            .filter(|path| self.is_changed(path))
            .collect()
    }

    // -- patches --------------------------------------------------------------

    /// Patch covering every field that differs from the original.
    pub fn to_patch(&self) -> SettingsPatch {
        let changed = self.changed_fields_under(&FieldPath::root());
        self.patch_for(changed.iter())
    }

    /// Patch covering exactly `paths`.
    pub fn patch_for<'a>(&self, paths: impl IntoIterator<Item = &'a FieldPath>) -> SettingsPatch {
        let mut document = SettingValue::empty_object();
        let mut changed_fields = Vec::new();
        let mut cleared_fields = Vec::new();

        for path in paths {
            changed_fields.push(path.field_id());

            // Array contents are positional; send the outermost array whole.
            let unit = match path.first_index_position() {
                Some(position) => path.prefix(position),
                None => path.clone(),
            };

            if self.live.lookup(path).is_none() {
                cleared_fields.push(path.field_id());
            }
            let value = match self.live.lookup(&unit) {
                Some(value) => self.normalize(&unit, value.clone()),
                None => SettingValue::Null,
            };

            if unit.is_root() {
                document = value;
            } else {
                document.set_at(&unit, value);
            }
        }

        SettingsPatch {
            document: serde_json::Value::from(document),
            changed_fields,
            cleared_fields,
        }
    }

    /// Adopt the live document as the new original, after a save.
    pub fn accept_live(&mut self) {
        self.original = self.live.clone();
    }

    // -- normalization ----------------------------------------------------------

    fn normalize(&self, path: &FieldPath, value: SettingValue) -> SettingValue {
        match self.schema.node_at(path) {
            Some(node) => normalize_value(node, value, path),
            None => value,
        }
    }
}

fn clamp_index(path: &FieldPath, index: usize, len: usize, max: usize, op: &str) -> usize {
    if index > max {
        tracing::warn!(
            path = %path,
            index,
            len,
            operation = op,
            "Array index out of bounds, clamping",
        );
        max
    } else {
        index
    }
}

/// Apply schema constraints the editor enforces on input: integers are
/// clamped to their effective bounds, multi-select values are filtered to
/// declared options. Containers are normalized recursively.
fn normalize_value(node: &SchemaNode, value: SettingValue, path: &FieldPath) -> SettingValue {
    match (&node.kind, value) {
        (SchemaKind::Integer, SettingValue::Number(number)) => match number.as_i64() {
            Some(raw) => {
                let clamped = node.clamp_integer(raw);
                if clamped != raw {
                    tracing::debug!(path = %path, raw, clamped, "Integer clamped to bounds");
                }
                SettingValue::from(clamped)
            }
            None => SettingValue::Number(number),
        },
        (SchemaKind::Enum { multiple: true, .. }, SettingValue::Array(items)) => {
            if items.iter().all(|item| node.allows_option(item)) {
                SettingValue::Array(items)
            } else {
                let kept: Vec<SettingValue> = items
                    .iter()
                    .filter(|item| node.allows_option(item))
                    .cloned()
                    .collect();
                tracing::debug!(
                    path = %path,
                    dropped = items.len() - kept.len(),
                    "Dropped multi-select values outside declared options",
                );
                SettingValue::Array(Arc::new(kept))
            }
        }
        (SchemaKind::Enum { multiple: false, .. }, value) => {
            if !value.is_null() && !node.allows_option(&value) {
                tracing::debug!(path = %path, "Enum value is not one of the declared options");
            }
            value
        }
        (SchemaKind::Object { properties }, SettingValue::Object(map)) => {
            let normalized = map
                .iter()
                .map(|(key, child)| {
                    let child = match properties.get(key) {
                        Some(child_node) => normalize_value(
                            child_node,
                            child.clone(),
                            &path.append(key.as_str()),
                        ),
                        None => child.clone(),
                    };
                    (key.clone(), child)
                })
                .collect();
            SettingValue::Object(Arc::new(normalized))
        }
        (SchemaKind::Array { items: item_node }, SettingValue::Array(list)) => {
            let normalized = list
                .iter()
                .enumerate()
                .map(|(index, child)| normalize_value(item_node, child.clone(), &path.append(index)))
                .collect();
            SettingValue::Array(Arc::new(normalized))
        }
        (_, value) => value,
    }
}

/// Schema-guided field walk. Objects contribute their declared properties
/// (present or not) plus undeclared data keys; arrays contribute one
/// subtree per element.
fn collect_fields(
    node: Option<&SchemaNode>,
    value: Option<&SettingValue>,
    path: &FieldPath,
    out: &mut Vec<FieldPath>,
) {
    match node.map(|n| &n.kind) {
        Some(SchemaKind::Object { properties }) => {
            for (key, child_node) in properties {
                let child_value = value.and_then(|v| v.as_object()).and_then(|m| m.get(key));
                collect_fields(Some(child_node), child_value, &path.append(key.as_str()), out);
            }
            if let Some(map) = value.and_then(SettingValue::as_object) {
                for (key, child_value) in map.iter() {
                    if !properties.contains_key(key) {
                        collect_fields(None, Some(child_value), &path.append(key.as_str()), out);
                    }
                }
            }
        }
        Some(SchemaKind::Array { items }) => {
            if let Some(list) = value.and_then(SettingValue::as_array) {
                for (index, child_value) in list.iter().enumerate() {
                    collect_fields(Some(items), Some(child_value), &path.append(index), out);
                }
            }
        }
        Some(_) => out.push(path.clone()),
        None => match value {
            Some(v @ (SettingValue::Object(_) | SettingValue::Array(_))) => {
                out.extend(v.leaf_paths(path));
            }
            _ => out.push(path.clone()),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::from_value(&json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "threads": {"type": "integer", "exclusiveMinimum": 0, "exclusiveMaximum": 17},
                    "enabled": {"type": "boolean", "default": true},
                    "tags": {"type": "array", "items": {"enum": ["a", "b", "c"]}},
                    "roots": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {"name": {"type": "string"}, "path": {"type": "string"}}
                        }
                    },
                    "paths": {"type": "array", "items": {"type": "string"}},
                    "nested": {
                        "type": "object",
                        "properties": {"inner": {"type": "object", "properties": {"x": {"type": "integer"}}}}
                    }
                }
            }))
            .unwrap(),
        )
    }

    fn tree(original: serde_json::Value) -> ValueTree {
        ValueTree::new(schema(), SettingValue::from(original))
    }

    fn p(dotted: &str) -> FieldPath {
        FieldPath::parse_dotted(dotted)
    }

    fn live_json(tree: &ValueTree) -> serde_json::Value {
        serde_json::Value::from(tree.live())
    }

    // -- get --

    #[test]
    fn get_returns_live_then_schema_default() {
        let t = tree(json!({"name": "studio"}));
        assert_eq!(t.get(&p("name")), SettingValue::from("studio"));
        assert_eq!(t.get(&p("enabled")), SettingValue::from(true));
        assert_eq!(t.get(&p("paths")), SettingValue::empty_array());
        assert!(t.get(&p("unknown.deep")).is_null());
    }

    #[test]
    fn null_original_becomes_empty_object() {
        let t = ValueTree::new(schema(), SettingValue::Null);
        assert_eq!(live_json(&t), json!({}));
    }

    // -- set --

    #[test]
    fn set_preserves_previous_snapshot() {
        let mut t = tree(json!({"name": "a", "roots": [{"name": "work"}]}));
        let before = t.snapshot();
        t.set(&p("name"), "b".into());
        assert_eq!(before.lookup(&p("name")), Some(&SettingValue::from("a")));
        assert_eq!(t.get(&p("name")), SettingValue::from("b"));
        assert!(before
            .lookup(&p("roots"))
            .unwrap()
            .shares_storage_with(t.live_at(&p("roots")).unwrap()));
    }

    #[test]
    fn set_creates_optional_nested_objects() {
        let mut t = tree(json!({}));
        t.set(&p("nested.inner.x"), 3.into());
        assert_eq!(live_json(&t), json!({"nested": {"inner": {"x": 3}}}));
    }

    #[test]
    fn set_clamps_integers_to_effective_bounds() {
        let mut t = tree(json!({}));
        t.set(&p("threads"), 0.into());
        assert_eq!(t.get(&p("threads")), SettingValue::from(1));
        t.set(&p("threads"), 99.into());
        assert_eq!(t.get(&p("threads")), SettingValue::from(16));
    }

    #[test]
    fn set_filters_multiselect_to_options() {
        let mut t = tree(json!({}));
        t.set(&p("tags"), SettingValue::from(json!(["a", "zzz", "c"])));
        assert_eq!(t.get(&p("tags")), SettingValue::from(json!(["a", "c"])));
    }

    #[test]
    fn clear_removes_keys_and_nulls_elements() {
        let mut t = tree(json!({"name": "a", "paths": ["x", "y"]}));
        assert_eq!(t.clear(&p("name")), Some("a".into()));
        assert!(t.live_at(&p("name")).is_none());
        t.clear(&p("paths.0"));
        assert_eq!(live_json(&t)["paths"], json!([null, "y"]));
    }

    // -- arrays --

    #[test]
    fn array_insert_clamps_index() {
        let mut t = tree(json!({"paths": ["a"]}));
        assert_eq!(t.array_insert(&p("paths"), 10, "b".into()), (p("paths"), 1));
        assert_eq!(t.array_insert(&p("paths"), 0, "z".into()), (p("paths"), 0));
        assert_eq!(live_json(&t)["paths"], json!(["z", "a", "b"]));
    }

    #[test]
    fn array_insert_creates_missing_array() {
        let mut t = tree(json!({}));
        t.array_insert(&p("roots"), 0, SettingValue::from(json!({"name": "work"})));
        assert_eq!(live_json(&t), json!({"roots": [{"name": "work"}]}));
    }

    #[test]
    fn array_insert_reports_resolved_array_path() {
        let mut t = tree(json!({"roots": [{"aliases": []}]}));
        let (array_path, index) = t.array_insert(&p("roots.9.aliases"), 0, "x".into());
        assert_eq!(array_path, p("roots.1.aliases"));
        assert_eq!(index, 0);
        assert_eq!(live_json(&t)["roots"][1], json!({"aliases": ["x"]}));
        assert_eq!(t.changed_fields_under(&array_path), vec![p("roots.1.aliases.0")]);
    }

    #[test]
    fn array_remove_clamps_and_handles_empty() {
        let mut t = tree(json!({"paths": ["a", "b"]}));
        assert_eq!(t.array_remove(&p("paths"), 7), Some("b".into()));
        assert_eq!(t.array_remove(&p("paths"), 0), Some("a".into()));
        assert_eq!(t.array_remove(&p("paths"), 0), None);
    }

    #[test]
    fn array_move_reorders() {
        let mut t = tree(json!({"paths": ["a", "b", "c"]}));
        assert!(t.array_move(&p("paths"), 2, 0));
        assert_eq!(live_json(&t)["paths"], json!(["c", "a", "b"]));
        assert!(!t.array_move(&p("paths"), 1, 1));
        assert!(t.array_move(&p("paths"), 0, 50));
        assert_eq!(live_json(&t)["paths"], json!(["a", "b", "c"]));
    }

    // -- field enumeration --

    #[test]
    fn fields_under_covers_both_documents() {
        let mut t = tree(json!({"paths": ["a", "b", "c"]}));
        t.array_remove(&p("paths"), 2);
        t.array_remove(&p("paths"), 1);
        let fields: Vec<String> = t.fields_under(&p("paths")).iter().map(|f| f.to_string()).collect();
        assert_eq!(fields, vec!["paths.0", "paths.1", "paths.2"]);
    }

    #[test]
    fn fields_under_treats_multiselect_as_one_field() {
        let t = tree(json!({"tags": ["a", "b"]}));
        assert_eq!(t.fields_under(&p("tags")), vec![p("tags")]);
    }

    #[test]
    fn fields_include_undeclared_data() {
        let t = tree(json!({"legacy": {"flag": true}}));
        assert!(t.fields_under(&FieldPath::root()).contains(&p("legacy.flag")));
    }

    #[test]
    fn changed_fields_follow_positions_after_move() {
        let mut t = tree(json!({"paths": ["a", "b", "c"]}));
        t.array_move(&p("paths"), 2, 0);
        assert_eq!(
            t.changed_fields_under(&p("paths")),
            vec![p("paths.0"), p("paths.1"), p("paths.2")]
        );
    }

    // -- patches --

    #[test]
    fn patch_contains_only_changed_leaves() {
        let mut t = tree(json!({"name": "a", "enabled": true, "nested": {"inner": {"x": 1}}}));
        t.set(&p("nested.inner.x"), 2.into());
        let patch = t.to_patch();
        assert_eq!(patch.document, json!({"nested": {"inner": {"x": 2}}}));
        assert_eq!(patch.changed_fields, vec![FieldId::from_raw("root_nested_inner_x")]);
        assert!(patch.cleared_fields.is_empty());
    }

    #[test]
    fn patch_marks_cleared_fields_with_null() {
        let mut t = tree(json!({"name": "a"}));
        t.clear(&p("name"));
        let patch = t.to_patch();
        assert_eq!(patch.document, json!({"name": null}));
        assert_eq!(patch.cleared_fields, vec![FieldId::from_raw("root_name")]);
    }

    #[test]
    fn patch_sends_arrays_whole() {
        let mut t = tree(json!({"roots": [{"name": "work", "path": "/a"}, {"name": "show", "path": "/b"}]}));
        t.set(&p("roots.1.path"), "/c".into());
        let patch = t.to_patch();
        assert_eq!(
            patch.document,
            json!({"roots": [{"name": "work", "path": "/a"}, {"name": "show", "path": "/c"}]})
        );
        assert_eq!(patch.changed_fields, vec![FieldId::from_raw("root_roots_1_path")]);
    }

    #[test]
    fn patch_normalizes_integer_bounds() {
        let mut t = tree(json!({"roots": []}));
        // Bypass set() normalization by writing the raw document directly.
        t.live.set_at(&p("threads"), 40.into());
        assert_eq!(t.to_patch().document, json!({"threads": 16}));
    }

    #[test]
    fn untouched_tree_has_empty_patch() {
        let t = tree(json!({"name": "a"}));
        assert!(t.to_patch().is_empty());
        assert_eq!(t.to_patch().document, json!({}));
    }

    #[test]
    fn patch_lists_key_cleared_inside_array_element() {
        let mut t = tree(json!({"roots": [{"name": "work", "path": "/a"}]}));
        t.clear(&p("roots.0.path"));
        let patch = t.to_patch();
        assert_eq!(patch.document, json!({"roots": [{"name": "work"}]}));
        assert_eq!(patch.cleared_fields, vec![FieldId::from_raw("root_roots_0_path")]);
    }

    // -- change detection --

    #[test]
    fn writing_default_on_absent_field_is_not_a_change() {
        let mut t = tree(json!({}));
        let (name, enabled) = (t.get(&p("name")), t.get(&p("enabled")));
        t.set(&p("name"), name);
        t.set(&p("enabled"), enabled);
        assert!(!t.is_changed(&p("name")));
        assert!(!t.is_changed(&p("enabled")));
        assert!(t.to_patch().is_empty());

        t.set(&p("enabled"), false.into());
        assert!(t.is_changed(&p("enabled")));
    }

    #[test]
    fn array_elements_compare_by_presence() {
        let mut t = tree(json!({"paths": []}));
        t.array_insert(&p("paths"), 0, "".into());
        assert!(t.is_changed(&p("paths.0")));
    }

    #[test]
    fn accept_live_resets_diff() {
        let mut t = tree(json!({"name": "a"}));
        t.set(&p("name"), "b".into());
        t.accept_live();
        assert!(!t.is_changed(&p("name")));
        assert_eq!(t.original_at(&p("name")), Some(&SettingValue::from("b")));
    }
}
