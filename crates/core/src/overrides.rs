//! Override lookup keyed by field id.
//!
//! The settings source returns, per level, a map from field id to the value
//! the field would take if reset to the level above. Presence of an entry is
//! the override signal; the entry's value is the ancestor default and is
//! never compared against the live value to decide override status.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::CoreError;
use crate::level::SettingsLevel;
use crate::path::{FieldId, FieldPath, PathSegment, FIELD_ID_SEPARATOR, ROOT_SEGMENT};
use crate::value::SettingValue;

#[derive(Debug, Clone, PartialEq)]
pub struct OverrideEntry {
    pub field_id: FieldId,
    /// Value inherited from the ancestor level.
    pub value: SettingValue,
    pub path: FieldPath,
    /// Level that supplied `value`; `None` means the addon's own defaults.
    pub level: Option<SettingsLevel>,
}

/// Wire shape of one override map entry.
#[derive(Debug, Deserialize)]
struct RawOverride {
    #[serde(default)]
    path: Option<FieldPath>,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    level: Option<String>,
}

/// O(1) lookup of override entries. Rebuilt wholesale on every load.
#[derive(Debug, Clone, Default)]
pub struct OverrideIndex {
    entries: HashMap<FieldId, OverrideEntry>,
}

impl OverrideIndex {
    /// Index a raw override map document.
    ///
    /// `null` is treated as an empty map. Entries that cannot be parsed are
    /// skipped with a warning; an entry whose path does not derive its key
    /// is kept under the key it was sent with.
    pub fn build(raw: &Value) -> Result<Self, CoreError> {
        let map = match raw {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            other => {
                return Err(CoreError::Overrides(format!(
                    "Override map must be an object, got {}",
                    json_kind(other)
                )))
            }
        };

        let mut entries = HashMap::with_capacity(map.len());
        for (key, raw_entry) in map {
            let parsed = match RawOverride::deserialize(raw_entry) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(field_id = %key, error = %e, "Skipping malformed override entry");
                    continue;
                }
            };

            let field_id = FieldId::from_raw(key.as_str());
            let path = match parsed.path {
                Some(path) => {
                    if path.field_id() != field_id {
                        tracing::warn!(
                            field_id = %field_id,
                            derived = %path.field_id(),
                            "Override key does not match its path",
                        );
                    }
                    path
                }
                None => path_from_field_id(&field_id),
            };

            entries.insert(
                field_id.clone(),
                OverrideEntry {
                    field_id,
                    value: SettingValue::from(parsed.value),
                    path,
                    level: parsed.level.as_deref().and_then(parse_level),
                },
            );
        }

        tracing::debug!(count = entries.len(), "Override index built");
        Ok(Self { entries })
    }

    pub fn from_entries(entries: impl IntoIterator<Item = OverrideEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|e| (e.field_id.clone(), e))
                .collect(),
        }
    }

    pub fn lookup(&self, field_id: &str) -> Option<&OverrideEntry> {
        self.entries.get(field_id)
    }

    /// True iff an entry exists, regardless of its value.
    pub fn has_override(&self, field_id: &str) -> bool {
        self.entries.contains_key(field_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn field_ids(&self) -> impl Iterator<Item = &FieldId> {
        self.entries.keys()
    }
}

fn parse_level(raw: &str) -> Option<SettingsLevel> {
    match raw {
        "default" => None,
        other => match other.parse() {
            Ok(level) => Some(level),
            Err(_) => {
                tracing::warn!(level = other, "Unknown override level, treating as addon default");
                None
            }
        },
    }
}

/// Best-effort path for entries sent without one. Digit-only segments are
/// read as indexes; keys containing `_` cannot be recovered exactly.
fn path_from_field_id(field_id: &FieldId) -> FieldPath {
    let raw = field_id.as_str();
    let rest = raw
        .strip_prefix(ROOT_SEGMENT)
        .map(|r| r.trim_start_matches(FIELD_ID_SEPARATOR))
        .unwrap_or(raw);
    if rest.is_empty() {
        return FieldPath::root();
    }
    rest.split(FIELD_ID_SEPARATOR)
        .map(|segment| match segment.parse::<usize>() {
            Ok(index) => PathSegment::Index(index),
            Err(_) => PathSegment::Key(segment.to_string()),
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn builds_entries_keyed_by_field_id() {
        let index = OverrideIndex::build(&json!({
            "root_name": {"path": ["name"], "value": "studio-name", "level": "studio"},
            "root_roots_1_path": {"path": ["roots", 1, "path"], "value": "/mnt", "level": "project"},
        }))
        .unwrap();

        assert_eq!(index.len(), 2);
        let entry = index.lookup("root_name").unwrap();
        assert_eq!(entry.value, SettingValue::from("studio-name"));
        assert_eq!(entry.path, FieldPath::parse_dotted("name"));
        assert_eq!(entry.level, Some(SettingsLevel::Studio));
        assert_eq!(
            index.lookup("root_roots_1_path").unwrap().level,
            Some(SettingsLevel::Project)
        );
    }

    #[test]
    fn presence_alone_marks_override() {
        // The entry value equals what the field holds; it still counts.
        let index = OverrideIndex::build(&json!({
            "root_name": {"path": ["name"], "value": null}
        }))
        .unwrap();
        assert!(index.has_override("root_name"));
        assert!(!index.has_override("root_other"));
    }

    #[test]
    fn default_level_maps_to_none() {
        let index = OverrideIndex::build(&json!({
            "root_a": {"path": ["a"], "value": 1, "level": "default"},
            "root_b": {"path": ["b"], "value": 1, "level": "galaxy"},
        }))
        .unwrap();
        assert_eq!(index.lookup("root_a").unwrap().level, None);
        assert_eq!(index.lookup("root_b").unwrap().level, None);
    }

    #[test]
    fn null_document_is_empty() {
        assert!(OverrideIndex::build(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn non_object_document_is_rejected() {
        assert_matches!(
            OverrideIndex::build(&json!(["root_a"])),
            Err(CoreError::Overrides(msg)) if msg.contains("array")
        );
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let index = OverrideIndex::build(&json!({
            "root_ok": {"path": ["ok"], "value": true},
            "root_bad": "not an entry",
        }))
        .unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.has_override("root_ok"));
    }

    #[test]
    fn mismatched_path_keeps_sent_key() {
        let index = OverrideIndex::build(&json!({
            "root_x": {"path": ["y"], "value": 1}
        }))
        .unwrap();
        assert!(index.has_override("root_x"));
        assert!(!index.has_override("root_y"));
    }

    #[test]
    fn missing_path_is_recovered_from_id() {
        let index = OverrideIndex::build(&json!({
            "root_roots_2_name": {"value": "x"}
        }))
        .unwrap();
        assert_eq!(
            index.lookup("root_roots_2_name").unwrap().path,
            FieldPath::parse_dotted("roots.2.name")
        );
    }
}
