//! Fields edited but not yet saved in the current session.
//!
//! Membership is keyed by [`FieldId`]; each entry also remembers the
//! [`FieldPath`] it was derived from so the patch builder never has to
//! reverse a field id. Every mutation synchronously notifies subscribers
//! with a snapshot of the current keys, in insertion order.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::path::{FieldId, FieldPath};

/// Callback invoked with the changed keys after every mutation.
pub type ChangeListener = Arc<dyn Fn(&[FieldId]) + Send + Sync>;

#[derive(Default)]
pub struct ChangeSet {
    entries: IndexMap<FieldId, FieldPath>,
    listeners: Vec<ChangeListener>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener called after every mutation.
    pub fn subscribe(&mut self, listener: impl Fn(&[FieldId]) + Send + Sync + 'static) {
        self.listeners.push(Arc::new(listener));
    }

    /// Record whether the field at `path` differs from its original value.
    ///
    /// Inserts when `changed` and absent, removes when `!changed` and
    /// present, otherwise does nothing. Returns whether the set mutated.
    pub fn mark(&mut self, path: &FieldPath, changed: bool) -> bool {
        let mutated = self.apply(path, changed);
        if mutated {
            self.notify();
        }
        mutated
    }

    /// Apply several marks, notifying at most once.
    pub fn mark_many<'a>(&mut self, marks: impl IntoIterator<Item = (&'a FieldPath, bool)>) -> bool {
        let mut mutated = false;
        for (path, changed) in marks {
            mutated |= self.apply(path, changed);
        }
        if mutated {
            self.notify();
        }
        mutated
    }

    /// Replace every entry at or below `prefix` with `changed`, keeping the
    /// position of entries that survive. Used after array mutations shift
    /// positional field ids.
    pub fn replace_under(&mut self, prefix: &FieldPath, changed: &[FieldPath]) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|_, path| !path.starts_with(prefix) || changed.contains(path));
        let mut mutated = self.entries.len() != before;
        for path in changed {
            mutated |= self.apply(path, true);
        }
        if mutated {
            self.notify();
        }
        mutated
    }

    pub fn is_changed(&self, field_id: &str) -> bool {
        self.entries.contains_key(field_id)
    }

    pub fn to_list(&self) -> Vec<FieldId> {
        self.entries.keys().cloned().collect()
    }

    pub fn paths(&self) -> impl Iterator<Item = &FieldPath> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry, notifying only if the set was non-empty.
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.notify();
        }
    }

    fn apply(&mut self, path: &FieldPath, changed: bool) -> bool {
        let field_id = path.field_id();
        if changed {
            if self.entries.contains_key(&field_id) {
                false
            } else {
                self.entries.insert(field_id, path.clone());
                true
            }
        } else {
            self.entries.shift_remove(&field_id).is_some()
        }
    }

    fn notify(&self) {
        if self.listeners.is_empty() {
            return;
        }
        let keys = self.to_list();
        for listener in &self.listeners {
            listener(&keys);
        }
    }
}

impl fmt::Debug for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSet")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
