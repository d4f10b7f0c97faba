//! Per-field diff between the original and live settings documents.
//!
//! Used for change reports shown before saving; persistence only ever sees
//! the patch.

use serde::{Deserialize, Serialize};

use crate::path::{FieldId, FieldPath};
use crate::value::SettingValue;

/// The status of a field in a diff comparison.
///
/// - `Added`     -- explicit value only in the live document.
/// - `Removed`   -- explicit value only in the original document.
/// - `Changed`   -- present in both with different values.
/// - `Unchanged` -- present in both with identical values, or in neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffStatus {
    Added,
    Removed,
    Changed,
    Unchanged,
}

impl DiffStatus {
    /// String representation for display and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Changed => "changed",
            Self::Unchanged => "unchanged",
        }
    }

    pub fn between(original: Option<&SettingValue>, live: Option<&SettingValue>) -> Self {
        match (original, live) {
            (None, Some(_)) => Self::Added,
            (Some(_), None) => Self::Removed,
            (Some(a), Some(b)) if a != b => Self::Changed,
            _ => Self::Unchanged,
        }
    }
}

impl std::fmt::Display for DiffStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a change report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field_id: FieldId,
    pub path: FieldPath,
    pub status: DiffStatus,
    pub original_value: Option<serde_json::Value>,
    pub live_value: Option<serde_json::Value>,
}

impl FieldDiff {
    pub fn compute(
        path: &FieldPath,
        original: Option<&SettingValue>,
        live: Option<&SettingValue>,
    ) -> Self {
        Self {
            field_id: path.field_id(),
            path: path.clone(),
            status: DiffStatus::between(original, live),
            original_value: original.map(serde_json::Value::from),
            live_value: live.map(serde_json::Value::from),
        }
    }
}
