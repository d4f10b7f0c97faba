//! REST client for the settings server.
//!
//! Documents live under
//! `{api_url}/api/addons/{name}/{version}/{schema|settings|overrides}`,
//! followed by `/{project}` and `?site={site}` for project and site scopes.
//! Names are percent-encoded.

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;

use addon_settings_core::source::{SettingsDocument, SourceError};
use addon_settings_core::{AddonRef, LevelScope, SettingsPatch, SettingsSink, SettingsSource};

use crate::config::{ConfigError, SourceConfig};

const API_KEY_HEADER: &str = "x-api-key";

/// HTTP client for one settings server.
pub struct HttpSettingsSource {
    client: reqwest::Client,
    api_url: Url,
    api_key: Option<String>,
}

/// Errors from the settings REST layer.
#[derive(Debug, thiserror::Error)]
pub enum SettingsApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, decode).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("Settings API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The configured server address cannot carry document paths.
    #[error("Invalid settings API URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<SettingsApiError> for SourceError {
    fn from(err: SettingsApiError) -> Self {
        match err {
            SettingsApiError::Request(e) if e.is_decode() => SourceError::Malformed(e.to_string()),
            SettingsApiError::Request(e) => SourceError::Transport(e.to_string()),
            SettingsApiError::ApiError { status, body } => SourceError::Rejected {
                status,
                message: body,
            },
            err @ (SettingsApiError::InvalidUrl { .. } | SettingsApiError::Config(_)) => {
                SourceError::Transport(err.to_string())
            }
        }
    }
}

/// URL of one settings document for `addon` at `scope`.
pub fn endpoint_url(
    api_url: &Url,
    addon: &AddonRef,
    document: SettingsDocument,
    scope: &LevelScope,
) -> Result<Url, SettingsApiError> {
    let mut url = api_url.clone();
    {
        let mut segments = url.path_segments_mut().map_err(|_| SettingsApiError::InvalidUrl {
            url: api_url.to_string(),
            reason: "cannot be a base".into(),
        })?;
        segments
            .pop_if_empty()
            .extend(["api", "addons", addon.name.as_str(), addon.version.as_str(), document.as_str()]);
        if let Some(project) = &scope.project_name {
            segments.push(project);
        }
    }
    if let (Some(_), Some(site)) = (&scope.project_name, &scope.site_id) {
        url.query_pairs_mut().append_pair("site", site);
    }
    Ok(url)
}

/// Parse the configured server address.
pub fn parse_api_url(raw: &str) -> Result<Url, SettingsApiError> {
    let url = Url::parse(raw).map_err(|e| SettingsApiError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(SettingsApiError::InvalidUrl {
            url: raw.to_string(),
            reason: "cannot be a base".into(),
        });
    }
    Ok(url)
}

impl HttpSettingsSource {
    /// Build a client with the configured timeout.
    pub fn new(config: &SourceConfig) -> Result<Self, SettingsApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Self::with_client(client, config)
    }

    /// Reuse an existing [`reqwest::Client`] (connection pooling).
    pub fn with_client(client: reqwest::Client, config: &SourceConfig) -> Result<Self, SettingsApiError> {
        Ok(Self {
            client,
            api_url: parse_api_url(&config.api_url)?,
            api_key: config.api_key.clone(),
        })
    }

    /// Load [`SourceConfig`] from the environment and build a client.
    pub fn from_env() -> Result<Self, SettingsApiError> {
        Self::new(&SourceConfig::from_env()?)
    }

    /// `GET` one settings document.
    pub async fn get_document(
        &self,
        document: SettingsDocument,
        addon: &AddonRef,
        scope: &LevelScope,
    ) -> Result<Value, SettingsApiError> {
        let url = endpoint_url(&self.api_url, addon, document, scope)?;
        tracing::debug!(url = %url, document = %document, addon = %addon, "Fetching settings document");

        let response = self.authorized(self.client.get(url)).send().await?;
        Self::parse_response(response).await
    }

    /// `POST` a patch document to the settings endpoint.
    pub async fn post_settings(
        &self,
        addon: &AddonRef,
        scope: &LevelScope,
        patch: &SettingsPatch,
    ) -> Result<(), SettingsApiError> {
        let url = endpoint_url(&self.api_url, addon, SettingsDocument::Settings, scope)?;
        tracing::debug!(
            url = %url,
            addon = %addon,
            level = %scope.level,
            fields = patch.changed_fields.len(),
            "Submitting settings patch",
        );

        let response = self
            .authorized(self.client.post(url))
            .json(&patch.document)
            .send()
            .await?;
        Self::check_status(response).await
    }

    // ---- private helpers ----

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`SettingsApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, SettingsApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(SettingsApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, SettingsApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn check_status(response: reqwest::Response) -> Result<(), SettingsApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsSource for HttpSettingsSource {
    async fn fetch_schema(&self, addon: &AddonRef, scope: &LevelScope) -> Result<Value, SourceError> {
        Ok(self.get_document(SettingsDocument::Schema, addon, scope).await?)
    }

    async fn fetch_settings(&self, addon: &AddonRef, scope: &LevelScope) -> Result<Value, SourceError> {
        Ok(self.get_document(SettingsDocument::Settings, addon, scope).await?)
    }

    async fn fetch_overrides(&self, addon: &AddonRef, scope: &LevelScope) -> Result<Value, SourceError> {
        Ok(self.get_document(SettingsDocument::Overrides, addon, scope).await?)
    }
}

#[async_trait]
impl SettingsSink for HttpSettingsSource {
    async fn submit(
        &self,
        addon: &AddonRef,
        scope: &LevelScope,
        patch: &SettingsPatch,
    ) -> Result<(), SourceError> {
        Ok(self.post_settings(addon, scope, patch).await?)
    }
}
