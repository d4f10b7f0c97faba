//! The settings session: one addon at one level, from load to save.
//!
//! A session owns one [`OverrideIndex`], one [`ChangeSet`] and one
//! [`ValueTree`]. Presentation code talks to it through an explicit handle
//! (`get` / `set_value` / `classify` / `has_override` / `set_focus`) and is
//! notified through a [`SessionObserver`].
//!
//! State machine:
//!
//! ```text
//! Uninitialized → Loading → Ready ⇄ (editing) → Reloading → Ready | Error
//! ```
//!
//! Editing is `Ready` with a non-empty change set. Loads are split into
//! [`begin_load`](SettingsSession::begin_load), [`fetch_documents`] and
//! [`complete_load`](SettingsSession::complete_load); every `begin_load`
//! bumps a generation counter and a completion carrying an older
//! generation is discarded.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::change_set::ChangeSet;
use crate::diff::FieldDiff;
use crate::error::CoreError;
use crate::events::{FocusContext, NoopObserver, SessionObserver};
use crate::level::{LevelScope, SettingsLevel};
use crate::overrides::OverrideIndex;
use crate::path::{FieldId, FieldPath};
use crate::schema::Schema;
use crate::source::{AddonRef, SettingsDocument, SettingsSink, SettingsSource, SourceError};
use crate::types::{SessionId, Timestamp};
use crate::value::SettingValue;
use crate::value_tree::{SettingsPatch, ValueTree};

// ---------------------------------------------------------------------------
// State and classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Loading,
    Ready,
    Reloading,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Reloading => "reloading",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display classification of one field. `Changed` wins over `Overridden`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Default,
    Overridden,
    Changed,
}

impl FieldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Overridden => "overridden",
            Self::Changed => "changed",
        }
    }
}

impl fmt::Display for FieldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Both facts behind a [`FieldStatus`], queryable independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldState {
    pub changed: bool,
    pub overridden: bool,
}

impl FieldState {
    pub fn status(&self) -> FieldStatus {
        if self.changed {
            FieldStatus::Changed
        } else if self.overridden {
            FieldStatus::Overridden
        } else {
            FieldStatus::Default
        }
    }
}

// ---------------------------------------------------------------------------
// Load requests
// ---------------------------------------------------------------------------

/// What to open: an addon, optionally scoped to a project and site.
///
/// `local_data` replaces the settings fetch, for settings embedded in a
/// larger edit flow (e.g. a project form that already holds the data).
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub addon: AddonRef,
    pub project_name: Option<String>,
    pub site_id: Option<String>,
    pub local_data: Option<Value>,
}

impl LoadRequest {
    pub fn new(addon: AddonRef) -> Self {
        Self {
            addon,
            project_name: None,
            site_id: None,
            local_data: None,
        }
    }

    pub fn with_project(mut self, project_name: impl Into<String>) -> Self {
        self.project_name = Some(project_name.into());
        self
    }

    pub fn with_site(mut self, site_id: impl Into<String>) -> Self {
        self.site_id = Some(site_id.into());
        self
    }

    pub fn with_local_data(mut self, data: Value) -> Self {
        self.local_data = Some(data);
        self
    }

    pub fn scope(&self) -> LevelScope {
        LevelScope::resolve(self.project_name.as_deref(), self.site_id.as_deref())
    }
}

/// Token for one load generation.
#[derive(Debug, Clone)]
pub struct LoadTicket {
    generation: u64,
    pub addon: AddonRef,
    pub scope: LevelScope,
    local_data: Option<Value>,
}

impl LoadTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// The three raw documents of one load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDocuments {
    pub schema: Value,
    pub settings: Value,
    pub overrides: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Ready,
    /// A newer load started after this one; the result was dropped.
    Stale,
}

/// Fetch schema, settings and overrides concurrently.
///
/// Settings are taken from the ticket's local data when present. The first
/// failure wins and is reported as [`CoreError::Load`] naming the document.
pub async fn fetch_documents<S>(source: &S, ticket: &LoadTicket) -> Result<LoadedDocuments, CoreError>
where
    S: SettingsSource + ?Sized,
{
    let addon = &ticket.addon;
    let scope = &ticket.scope;

    let schema = async {
        source
            .fetch_schema(addon, scope)
            .await
            .map_err(|e| load_error(SettingsDocument::Schema, addon, e))
    };
    let settings = async {
        match &ticket.local_data {
            Some(local) => Ok(local.clone()),
            None => source
                .fetch_settings(addon, scope)
                .await
                .map_err(|e| load_error(SettingsDocument::Settings, addon, e)),
        }
    };
    let overrides = async {
        source
            .fetch_overrides(addon, scope)
            .await
            .map_err(|e| load_error(SettingsDocument::Overrides, addon, e))
    };

    let (schema, settings, overrides) = tokio::try_join!(schema, settings, overrides)?;
    Ok(LoadedDocuments {
        schema,
        settings,
        overrides,
    })
}

fn load_error(document: SettingsDocument, addon: &AddonRef, err: SourceError) -> CoreError {
    CoreError::Load {
        document,
        addon: addon.display_name(),
        message: err.to_string(),
    }
}

/// Only a client-error answer means the server refused the patch; anything
/// else is a failed attempt the caller may simply retry.
fn save_error(err: SourceError) -> CoreError {
    match err {
        SourceError::Rejected { status, .. } if (400..500).contains(&status) => {
            CoreError::SaveRejected(err.to_string())
        }
        other => CoreError::SaveFailed(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// SettingsSession
// ---------------------------------------------------------------------------

pub struct SettingsSession {
    id: SessionId,
    state: SessionState,
    generation: u64,
    request: Option<LoadRequest>,
    scope: Option<LevelScope>,
    overrides: OverrideIndex,
    changes: ChangeSet,
    tree: Option<ValueTree>,
    breadcrumb: Option<FieldPath>,
    observer: Arc<dyn SessionObserver>,
    last_error: Option<String>,
    loaded_at: Option<Timestamp>,
}

impl SettingsSession {
    pub fn new(observer: Arc<dyn SessionObserver>) -> Self {
        let changes = change_set_for(&observer);
        Self {
            id: Uuid::now_v7(),
            state: SessionState::Uninitialized,
            generation: 0,
            request: None,
            scope: None,
            overrides: OverrideIndex::default(),
            changes,
            tree: None,
            breadcrumb: None,
            observer,
            last_error: None,
            loaded_at: None,
        }
    }

    // -- accessors -------------------------------------------------------------

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Ready with unsaved edits.
    pub fn is_editing(&self) -> bool {
        self.is_ready() && !self.changes.is_empty()
    }

    pub fn addon(&self) -> Option<&AddonRef> {
        self.request.as_ref().map(|r| &r.addon)
    }

    pub fn scope(&self) -> Option<&LevelScope> {
        self.scope.as_ref()
    }

    pub fn level(&self) -> Option<SettingsLevel> {
        self.scope.as_ref().map(|s| s.level)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn loaded_at(&self) -> Option<Timestamp> {
        self.loaded_at
    }

    pub fn breadcrumb(&self) -> Option<&FieldPath> {
        self.breadcrumb.as_ref()
    }

    pub fn changed_keys(&self) -> Vec<FieldId> {
        self.changes.to_list()
    }

    pub fn overrides(&self) -> &OverrideIndex {
        &self.overrides
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.tree.as_ref().map(ValueTree::schema)
    }

    /// Current live document, once loaded.
    pub fn live_document(&self) -> Option<Value> {
        self.tree.as_ref().map(|t| Value::from(t.live()))
    }

    // -- loading ---------------------------------------------------------------

    /// Start a new load generation.
    ///
    /// Discards the change set, breadcrumb, override index and value tree
    /// of any previous generation immediately; nothing of the old state is
    /// visible while the new documents are in flight.
    pub fn begin_load(&mut self, request: LoadRequest) -> LoadTicket {
        self.generation += 1;
        self.state = if self.loaded_at.is_some() || self.state == SessionState::Error {
            SessionState::Reloading
        } else {
            SessionState::Loading
        };

        self.tree = None;
        self.overrides = OverrideIndex::default();
        self.breadcrumb = None;
        self.changes.clear();
        self.last_error = None;

        let scope = request.scope();
        tracing::info!(
            session_id = %self.id,
            generation = self.generation,
            addon = %request.addon,
            level = %scope.level,
            state = %self.state,
            "Loading addon settings",
        );

        let ticket = LoadTicket {
            generation: self.generation,
            addon: request.addon.clone(),
            scope: scope.clone(),
            local_data: request.local_data.clone(),
        };
        self.scope = Some(scope);
        self.request = Some(request);
        ticket
    }

    /// Apply the result of a load started with [`begin_load`](Self::begin_load).
    ///
    /// Results from an older generation are dropped and reported as
    /// [`LoadOutcome::Stale`]. Any failure leaves the session in `Error`
    /// with no partially loaded state.
    pub fn complete_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<LoadedDocuments, CoreError>,
    ) -> Result<LoadOutcome, CoreError> {
        if ticket.generation != self.generation {
            tracing::debug!(
                session_id = %self.id,
                stale_generation = ticket.generation,
                current_generation = self.generation,
                "Discarding stale settings load",
            );
            return Ok(LoadOutcome::Stale);
        }

        match result.and_then(|documents| assemble(&ticket, documents)) {
            Ok((tree, overrides)) => {
                tracing::info!(
                    session_id = %self.id,
                    generation = self.generation,
                    addon = %ticket.addon,
                    overrides = overrides.len(),
                    "Addon settings ready",
                );
                self.tree = Some(tree);
                self.overrides = overrides;
                self.state = SessionState::Ready;
                self.loaded_at = Some(Utc::now());
                self.emit_change();
                Ok(LoadOutcome::Ready)
            }
            Err(err) => {
                tracing::warn!(
                    session_id = %self.id,
                    generation = self.generation,
                    addon = %ticket.addon,
                    error = %err,
                    "Addon settings failed to load",
                );
                self.state = SessionState::Error;
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Begin, fetch and complete a load in one call.
    pub async fn load<S>(&mut self, source: &S, request: LoadRequest) -> Result<(), CoreError>
    where
        S: SettingsSource + ?Sized,
    {
        let ticket = self.begin_load(request);
        let result = fetch_documents(source, &ticket).await;
        self.complete_load(ticket, result).map(|_| ())
    }

    /// Load the last request again, e.g. on an external refresh signal.
    pub async fn reload<S>(&mut self, source: &S) -> Result<(), CoreError>
    where
        S: SettingsSource + ?Sized,
    {
        let request = self
            .request
            .clone()
            .ok_or(CoreError::NotReady(SessionState::Uninitialized))?;
        self.load(source, request).await
    }

    // -- queries ---------------------------------------------------------------

    pub fn field_state(&self, field_id: &str) -> FieldState {
        FieldState {
            changed: self.changes.is_changed(field_id),
            overridden: self.overrides.has_override(field_id),
        }
    }

    pub fn classify(&self, field_id: &str) -> FieldStatus {
        self.field_state(field_id).status()
    }

    pub fn has_override(&self, field_id: &str) -> bool {
        self.overrides.has_override(field_id)
    }

    pub fn is_changed(&self, field_id: &str) -> bool {
        self.changes.is_changed(field_id)
    }

    /// Live value at `path`, or the schema default when absent.
    pub fn get(&self, path: &FieldPath) -> Result<SettingValue, CoreError> {
        Ok(self.ready_tree()?.get(path))
    }

    // -- edits -----------------------------------------------------------------

    /// Write a value and re-evaluate change tracking for the written path.
    pub fn set_value(&mut self, path: &FieldPath, value: SettingValue) -> Result<(), CoreError> {
        let written = self.ready_tree_mut()?.set(path, value);
        tracing::trace!(session_id = %self.id, field_id = %written.field_id(), "Field set");
        self.resync(&written);
        self.emit_change();
        Ok(())
    }

    /// Remove the explicit value at `path`.
    pub fn clear_value(&mut self, path: &FieldPath) -> Result<(), CoreError> {
        self.ready_tree_mut()?.clear(path);
        self.resync(path);
        self.emit_change();
        Ok(())
    }

    pub fn array_insert(
        &mut self,
        path: &FieldPath,
        index: usize,
        item: SettingValue,
    ) -> Result<(FieldPath, usize), CoreError> {
        let (array_path, index) = self.ready_tree_mut()?.array_insert(path, index, item);
        self.resync(&array_path);
        self.emit_change();
        Ok((array_path, index))
    }

    pub fn array_remove(
        &mut self,
        path: &FieldPath,
        index: usize,
    ) -> Result<Option<SettingValue>, CoreError> {
        let removed = self.ready_tree_mut()?.array_remove(path, index);
        self.resync(path);
        self.emit_change();
        Ok(removed)
    }

    pub fn array_move(&mut self, path: &FieldPath, from: usize, to: usize) -> Result<bool, CoreError> {
        let moved = self.ready_tree_mut()?.array_move(path, from, to);
        if moved {
            self.resync(path);
            self.emit_change();
        }
        Ok(moved)
    }

    /// Record the focused field and publish its navigation context.
    pub fn set_focus(&mut self, path: &FieldPath) -> Result<FocusContext, CoreError> {
        self.ready_tree()?;
        let addon = self
            .addon()
            .cloned()
            .ok_or(CoreError::NotReady(self.state))?;

        let field_id = path.field_id();
        let focus = FocusContext {
            addon_string: addon.display_name(),
            addon,
            path: path.clone(),
            site_id: self.scope.as_ref().and_then(|s| s.site_id.clone()),
            has_override: self.overrides.has_override(field_id.as_str()),
            field_id,
        };
        self.breadcrumb = Some(path.clone());
        self.observer.on_set_breadcrumbs(&focus);
        Ok(focus)
    }

    // -- saving ----------------------------------------------------------------

    /// Patch for exactly the fields in the change set.
    pub fn save(&self) -> Result<SettingsPatch, CoreError> {
        let tree = self.ready_tree()?;
        let patch = tree.patch_for(self.changes.paths());

        let diffed = tree.changed_fields_under(&FieldPath::root());
        if diffed.len() != self.changes.len() {
            tracing::debug!(
                session_id = %self.id,
                tracked = self.changes.len(),
                diffed = diffed.len(),
                "Change set and tree diff disagree; sending tracked fields only",
            );
        }
        Ok(patch)
    }

    /// Submit [`save`](Self::save) through `sink`.
    ///
    /// A refusal leaves the change set and live values untouched. On
    /// success the live document becomes the new original. Empty patches
    /// are not submitted.
    pub async fn commit<K>(&mut self, sink: &K) -> Result<SettingsPatch, CoreError>
    where
        K: SettingsSink + ?Sized,
    {
        let patch = self.save()?;
        if patch.is_empty() {
            tracing::debug!(session_id = %self.id, "Nothing to save");
            return Ok(patch);
        }

        let (addon, scope) = match (self.addon(), self.scope()) {
            (Some(addon), Some(scope)) => (addon.clone(), scope.clone()),
            _ => return Err(CoreError::NotReady(self.state)),
        };

        if let Err(err) = sink.submit(&addon, &scope, &patch).await {
            tracing::warn!(
                session_id = %self.id,
                addon = %addon,
                level = %scope.level,
                error = %err,
                "Settings save failed",
            );
            return Err(save_error(err));
        }

        if let Some(tree) = self.tree.as_mut() {
            tree.accept_live();
        }
        self.changes.clear();
        tracing::info!(
            session_id = %self.id,
            addon = %addon,
            level = %scope.level,
            fields = patch.changed_fields.len(),
            "Settings saved",
        );
        Ok(patch)
    }

    /// Per-field diff of every tracked change, in change-set order.
    pub fn change_report(&self) -> Result<Vec<FieldDiff>, CoreError> {
        let tree = self.ready_tree()?;
        Ok(self
            .changes
            .paths()
            .map(|path| FieldDiff::compute(path, tree.original_at(path), tree.live_at(path)))
            .collect())
    }

    // ---- private helpers ----

    fn ready_tree(&self) -> Result<&ValueTree, CoreError> {
        match (&self.tree, self.state) {
            (Some(tree), SessionState::Ready) => Ok(tree),
            _ => Err(CoreError::NotReady(self.state)),
        }
    }

    fn ready_tree_mut(&mut self) -> Result<&mut ValueTree, CoreError> {
        match (&mut self.tree, self.state) {
            (Some(tree), SessionState::Ready) => Ok(tree),
            _ => Err(CoreError::NotReady(self.state)),
        }
    }

    /// Re-derive change membership for every field at or below `base`.
    fn resync(&mut self, base: &FieldPath) {
        let Some(tree) = &self.tree else {
            return;
        };
        let changed = tree.changed_fields_under(base);
        self.changes.replace_under(base, &changed);
    }

    fn emit_change(&self) {
        if let Some(tree) = &self.tree {
            self.observer.on_change(&Value::from(tree.live()));
        }
    }
}

impl Default for SettingsSession {
    fn default() -> Self {
        Self::new(Arc::new(NoopObserver))
    }
}

impl fmt::Debug for SettingsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("scope", &self.scope)
            .field("changes", &self.changes)
            .finish_non_exhaustive()
    }
}

fn change_set_for(observer: &Arc<dyn SessionObserver>) -> ChangeSet {
    let mut changes = ChangeSet::new();
    let observer = Arc::clone(observer);
    changes.subscribe(move |keys| observer.on_set_changed_keys(keys));
    changes
}

fn assemble(
    ticket: &LoadTicket,
    documents: LoadedDocuments,
) -> Result<(ValueTree, OverrideIndex), CoreError> {
    let invalid = |document: SettingsDocument, err: CoreError| CoreError::Load {
        document,
        addon: ticket.addon.display_name(),
        message: err.to_string(),
    };

    let schema = Schema::from_value(&documents.schema)
        .map_err(|e| invalid(SettingsDocument::Schema, e))?;
    schema
        .check_field_ids()
        .map_err(|e| invalid(SettingsDocument::Schema, e))?;
    let overrides = OverrideIndex::build(&documents.overrides)
        .map_err(|e| invalid(SettingsDocument::Overrides, e))?;
    let tree = ValueTree::new(Arc::new(schema), SettingValue::from(documents.settings));
    Ok((tree, overrides))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
