//! Collaborator boundary: where schema, data and overrides come from, and
//! where patches go.
//!
//! Transport is out of scope for this crate; `addon-settings-source`
//! provides the HTTP implementation.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::level::LevelScope;
use crate::value_tree::SettingsPatch;

// ---------------------------------------------------------------------------
// AddonRef
// ---------------------------------------------------------------------------

/// Addon name and version; together they scope every settings document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddonRef {
    pub name: String,
    pub version: String,
}

impl AddonRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// `name@version`, the form used in navigation and logs.
    pub fn display_name(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

impl fmt::Display for AddonRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

// ---------------------------------------------------------------------------
// SettingsDocument
// ---------------------------------------------------------------------------

/// The three documents a session loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsDocument {
    Schema,
    Settings,
    Overrides,
}

impl SettingsDocument {
    /// Endpoint segment and display name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Settings => "settings",
            Self::Overrides => "overrides",
        }
    }
}

impl fmt::Display for SettingsDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure reported by a collaborator.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The request never produced a response (network, DNS, timeout).
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The collaborator answered and refused.
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The response could not be decoded.
    #[error("Malformed response: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Read side of the settings-source collaborator.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn fetch_schema(
        &self,
        addon: &AddonRef,
        scope: &LevelScope,
    ) -> Result<serde_json::Value, SourceError>;

    async fn fetch_settings(
        &self,
        addon: &AddonRef,
        scope: &LevelScope,
    ) -> Result<serde_json::Value, SourceError>;

    /// Map of field id to override entry.
    async fn fetch_overrides(
        &self,
        addon: &AddonRef,
        scope: &LevelScope,
    ) -> Result<serde_json::Value, SourceError>;

    /// Fetch one document by kind.
    async fn fetch(
        &self,
        document: SettingsDocument,
        addon: &AddonRef,
        scope: &LevelScope,
    ) -> Result<serde_json::Value, SourceError> {
        match document {
            SettingsDocument::Schema => self.fetch_schema(addon, scope).await,
            SettingsDocument::Settings => self.fetch_settings(addon, scope).await,
            SettingsDocument::Overrides => self.fetch_overrides(addon, scope).await,
        }
    }
}

/// Write side of the collaborator. Retries, if any, happen in here.
#[async_trait]
pub trait SettingsSink: Send + Sync {
    async fn submit(
        &self,
        addon: &AddonRef,
        scope: &LevelScope,
        patch: &SettingsPatch,
    ) -> Result<(), SourceError>;
}
