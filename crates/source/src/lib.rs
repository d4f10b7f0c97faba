//! HTTP collaborator for the addon settings engine.
//!
//! [`HttpSettingsSource`] reads schema, settings and override documents
//! from the settings server and submits patches back to it.

pub mod client;
pub mod config;

pub use client::{HttpSettingsSource, SettingsApiError};
pub use config::{ConfigError, SourceConfig};
