//! Session notifications for the presentation layer.
//!
//! A [`SettingsSession`](crate::session::SettingsSession) reports every edit,
//! change-set mutation, and focus change to one [`SessionObserver`] handle.
//! [`SessionEventBus`] is an observer that fans those notifications out over
//! a `tokio::sync::broadcast` channel for hosts with several listeners.

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::path::{FieldId, FieldPath};
use crate::source::AddonRef;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// FocusContext
// ---------------------------------------------------------------------------

/// Where the operator currently is, for the navigation trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FocusContext {
    pub addon: AddonRef,
    /// `name@version`.
    pub addon_string: String,
    pub path: FieldPath,
    pub site_id: Option<String>,
    pub field_id: FieldId,
    /// Resolved at focus time so the trail can show override provenance.
    pub has_override: bool,
}

// ---------------------------------------------------------------------------
// SessionObserver
// ---------------------------------------------------------------------------

/// Receiver of session notifications. All methods default to no-ops and
/// are called synchronously from the mutating call.
pub trait SessionObserver: Send + Sync {
    /// Full live document after every value or structural edit.
    fn on_change(&self, _document: &serde_json::Value) {}

    /// Snapshot of the changed keys after every change-set mutation.
    fn on_set_changed_keys(&self, _keys: &[FieldId]) {}

    /// Focus context after every focus change.
    fn on_set_breadcrumbs(&self, _focus: &FocusContext) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

// ---------------------------------------------------------------------------
// SessionEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEventKind {
    Changed { document: serde_json::Value },
    ChangedKeys { keys: Vec<FieldId> },
    Breadcrumbs { focus: FocusContext },
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    #[serde(flatten)]
    pub kind: SessionEventKind,
    pub timestamp: Timestamp,
}

impl SessionEvent {
    pub fn new(kind: SessionEventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionEventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// Fan-out observer backed by a [`broadcast::Sender`].
pub struct SessionEventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEventBus {
    /// Slow receivers past `capacity` observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, kind: SessionEventKind) {
        // Only fails when nobody is subscribed.
        let _ = self.sender.send(SessionEvent::new(kind));
    }
}

impl Default for SessionEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SessionObserver for SessionEventBus {
    fn on_change(&self, document: &serde_json::Value) {
        self.publish(SessionEventKind::Changed {
            document: document.clone(),
        });
    }

    fn on_set_changed_keys(&self, keys: &[FieldId]) {
        self.publish(SessionEventKind::ChangedKeys {
            keys: keys.to_vec(),
        });
    }

    fn on_set_breadcrumbs(&self, focus: &FocusContext) {
        self.publish(SessionEventKind::Breadcrumbs {
            focus: focus.clone(),
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
