//! Shared fixtures for session integration tests.
//!
//! [`MemorySource`] serves fixed schema / settings / override documents and
//! records every submitted patch, so scenarios can run without a settings
//! server.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use addon_settings_core::events::{FocusContext, SessionObserver};
use addon_settings_core::source::{SettingsDocument, SourceError};
use addon_settings_core::{
    AddonRef, FieldId, LevelScope, LoadRequest, SettingsPatch, SettingsSession, SettingsSink,
    SettingsSource,
};

/// In-memory settings source and sink.
#[derive(Default)]
pub struct MemorySource {
    pub schema: Value,
    pub settings: Value,
    pub overrides: Value,
    /// Document whose fetch fails, if any.
    pub fail_fetch: Option<SettingsDocument>,
    /// Reject every submission with this status.
    pub reject_with: Option<u16>,
    pub fetched: Mutex<Vec<(SettingsDocument, LevelScope)>>,
    pub submitted: Mutex<Vec<SettingsPatch>>,
}

impl MemorySource {
    pub fn new(schema: Value, settings: Value, overrides: Value) -> Self {
        Self {
            schema,
            settings,
            overrides,
            ..Self::default()
        }
    }

    pub fn failing(mut self, document: SettingsDocument) -> Self {
        self.fail_fetch = Some(document);
        self
    }

    pub fn rejecting(mut self, status: u16) -> Self {
        self.reject_with = Some(status);
        self
    }

    pub fn fetched_documents(&self) -> Vec<SettingsDocument> {
        self.fetched.lock().unwrap().iter().map(|(d, _)| *d).collect()
    }

    pub fn submissions(&self) -> Vec<SettingsPatch> {
        self.submitted.lock().unwrap().clone()
    }

    fn serve(&self, document: SettingsDocument, scope: &LevelScope) -> Result<Value, SourceError> {
        self.fetched.lock().unwrap().push((document, scope.clone()));
        if self.fail_fetch == Some(document) {
            return Err(SourceError::Transport(format!("{document} unavailable")));
        }
        Ok(match document {
            SettingsDocument::Schema => self.schema.clone(),
            SettingsDocument::Settings => self.settings.clone(),
            SettingsDocument::Overrides => self.overrides.clone(),
        })
    }
}

#[async_trait]
impl SettingsSource for MemorySource {
    async fn fetch_schema(&self, _addon: &AddonRef, scope: &LevelScope) -> Result<Value, SourceError> {
        self.serve(SettingsDocument::Schema, scope)
    }

    async fn fetch_settings(&self, _addon: &AddonRef, scope: &LevelScope) -> Result<Value, SourceError> {
        self.serve(SettingsDocument::Settings, scope)
    }

    async fn fetch_overrides(&self, _addon: &AddonRef, scope: &LevelScope) -> Result<Value, SourceError> {
        self.serve(SettingsDocument::Overrides, scope)
    }
}

#[async_trait]
impl SettingsSink for MemorySource {
    async fn submit(
        &self,
        _addon: &AddonRef,
        _scope: &LevelScope,
        patch: &SettingsPatch,
    ) -> Result<(), SourceError> {
        if let Some(status) = self.reject_with {
            return Err(SourceError::Rejected {
                status,
                message: "refused".into(),
            });
        }
        self.submitted.lock().unwrap().push(patch.clone());
        Ok(())
    }
}

/// Observer that records every notification.
#[derive(Default)]
pub struct RecordingObserver {
    pub changes: Mutex<Vec<Value>>,
    pub changed_keys: Mutex<Vec<Vec<FieldId>>>,
    pub breadcrumbs: Mutex<Vec<FocusContext>>,
}

impl RecordingObserver {
    pub fn last_changed_keys(&self) -> Option<Vec<FieldId>> {
        self.changed_keys.lock().unwrap().last().cloned()
    }

    pub fn change_count(&self) -> usize {
        self.changes.lock().unwrap().len()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_change(&self, document: &Value) {
        self.changes.lock().unwrap().push(document.clone());
    }

    fn on_set_changed_keys(&self, keys: &[FieldId]) {
        self.changed_keys.lock().unwrap().push(keys.to_vec());
    }

    fn on_set_breadcrumbs(&self, focus: &FocusContext) {
        self.breadcrumbs.lock().unwrap().push(focus.clone());
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn addon() -> AddonRef {
    AddonRef::new("core", "1.2.0")
}

pub fn request() -> LoadRequest {
    LoadRequest::new(addon())
}

/// Schema covering scalars, a bounded integer, a multiselect and an
/// array of objects.
pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": {"type": "string", "default": "studio"},
            "enabled": {"type": "boolean"},
            "retries": {
                "type": "integer",
                "exclusiveMinimum": 4,
                "exclusiveMaximum": 10
            },
            "platforms": {
                "type": "array",
                "uniqueItems": true,
                "items": {"enum": ["windows", "linux", "darwin"]}
            },
            "roots": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "path": {"type": "string"}
                    }
                }
            }
        }
    })
}

pub fn settings() -> Value {
    json!({
        "name": "a",
        "retries": 6,
        "roots": [
            {"name": "work", "path": "/work"},
            {"name": "cache", "path": "/cache"},
            {"name": "show", "path": "/show"}
        ]
    })
}

pub fn overrides() -> Value {
    json!({
        "root_name": {"path": ["name"], "value": "a", "level": "studio"},
        "root_enabled": {"path": ["enabled"], "value": true, "level": "default"}
    })
}

pub fn memory_source() -> MemorySource {
    MemorySource::new(schema(), settings(), overrides())
}

/// Session loaded from [`memory_source`] with a recording observer.
pub async fn ready_session() -> (SettingsSession, Arc<RecordingObserver>, MemorySource) {
    let observer = Arc::new(RecordingObserver::default());
    let source = memory_source();
    let mut session = SettingsSession::new(observer.clone());
    session
        .load(&source, request())
        .await
        .expect("fixture documents should load");
    (session, observer, source)
}
