//! Hierarchical addon settings engine.
//!
//! Merges a JSON-Schema-like document with persisted settings and a
//! per-field override map, tracks which fields the current editing session
//! changed, and produces the patch to hand back to persistence.
//!
//! - [`path`] -- field paths and field-id derivation.
//! - [`schema`] -- typed schema tree, bounds and type defaults.
//! - [`value`] -- copy-on-write setting values.
//! - [`overrides`] -- override lookup by field id.
//! - [`change_set`] -- fields edited in the current session.
//! - [`value_tree`] -- editable value tree and patch generation.
//! - [`session`] -- the orchestrator tying the above together.
//! - [`level`] -- studio / project / site level resolution.
//! - [`source`] -- collaborator traits for fetching and saving documents.
//! - [`events`] -- session observer and broadcast bus.

pub mod change_set;
pub mod diff;
pub mod error;
pub mod events;
pub mod level;
pub mod overrides;
pub mod path;
pub mod schema;
pub mod session;
pub mod source;
pub mod types;
pub mod value;
pub mod value_tree;

pub use change_set::ChangeSet;
pub use error::CoreError;
pub use level::{LevelScope, SettingsLevel};
pub use overrides::{OverrideEntry, OverrideIndex};
pub use path::{FieldId, FieldPath, PathSegment};
pub use schema::Schema;
pub use session::{FieldStatus, LoadRequest, SessionState, SettingsSession};
pub use source::{AddonRef, SettingsSink, SettingsSource};
pub use value::SettingValue;
pub use value_tree::{SettingsPatch, ValueTree};
