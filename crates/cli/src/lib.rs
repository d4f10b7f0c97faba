//! Command-line front end for the addon settings engine.
//!
//! Loads one addon's settings at the configured level, applies `PATH=JSON`
//! edits, reports what changed and optionally commits the patch.

use std::fmt::Write as _;

use clap::Parser;

use addon_settings_core::diff::FieldDiff;
use addon_settings_core::events::FocusContext;
use addon_settings_core::{
    AddonRef, CoreError, FieldPath, FieldStatus, LevelScope, LoadRequest, SettingValue,
    SettingsPatch, SettingsSession, SettingsSink, SettingsSource,
};
use addon_settings_source::{ConfigError, SourceConfig};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0} environment variable is required")]
    MissingEnv(&'static str),

    #[error("Invalid argument '{0}': expected PATH=JSON")]
    InvalidEdit(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which addon and level to open.
#[derive(Debug, Clone, PartialEq)]
pub struct CliConfig {
    pub addon: AddonRef,
    pub project_name: Option<String>,
    pub site_id: Option<String>,
    pub source: SourceConfig,
}

impl CliConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var         | Required | Description                    |
    /// |-----------------|----------|--------------------------------|
    /// | `ADDON_NAME`    | yes      | Addon to open                  |
    /// | `ADDON_VERSION` | yes      | Addon version                  |
    /// | `PROJECT_NAME`  | no       | Project level when set         |
    /// | `SITE_ID`       | no       | Site level when set with project |
    ///
    /// Settings server variables are read by [`SourceConfig`].
    pub fn from_env() -> Result<Self, CliError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CliError> {
        let required = |var: &'static str| {
            lookup(var)
                .filter(|v| !v.trim().is_empty())
                .ok_or(CliError::MissingEnv(var))
        };
        let addon = AddonRef::new(required("ADDON_NAME")?, required("ADDON_VERSION")?);

        Ok(Self {
            addon,
            project_name: lookup("PROJECT_NAME"),
            site_id: lookup("SITE_ID"),
            source: SourceConfig::from_lookup(&lookup)?,
        })
    }

    pub fn load_request(&self) -> LoadRequest {
        LoadRequest {
            addon: self.addon.clone(),
            project_name: self.project_name.clone(),
            site_id: self.site_id.clone(),
            local_data: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Parser)]
#[command(name = "addon-settings")]
#[command(about = "Inspect and edit one addon's settings", version)]
pub struct CliArgs {
    /// Submit the resulting patch to the settings server
    #[arg(long)]
    pub commit: bool,

    /// Dotted path of the field to focus, e.g. `roots.0.name`
    #[arg(long, value_name = "PATH", value_parser = parse_focus)]
    pub focus: Option<FieldPath>,

    /// Edits to apply, as `PATH=JSON`
    #[arg(value_name = "PATH=JSON", value_parser = parse_edit)]
    pub edits: Vec<(FieldPath, SettingValue)>,
}

fn parse_focus(arg: &str) -> Result<FieldPath, std::convert::Infallible> {
    Ok(FieldPath::parse_dotted(arg))
}

/// Split `PATH=JSON`. Values that are not valid JSON are taken as strings.
pub fn parse_edit(arg: &str) -> Result<(FieldPath, SettingValue), CliError> {
    let (path, raw) = arg
        .split_once('=')
        .ok_or_else(|| CliError::InvalidEdit(arg.to_string()))?;
    let path = FieldPath::parse_dotted(path);
    if path.is_root() {
        return Err(CliError::InvalidEdit(arg.to_string()));
    }

    let value = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) => SettingValue::from(json),
        Err(_) => SettingValue::from(raw),
    };
    Ok((path, value))
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReportRow {
    pub status: FieldStatus,
    pub diff: FieldDiff,
}

/// Everything one invocation did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub addon: AddonRef,
    pub scope: LevelScope,
    pub focus: Option<FocusContext>,
    pub rows: Vec<ReportRow>,
    pub patch: SettingsPatch,
    pub committed: bool,
}

impl RunReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} ({})", self.addon, self.scope);

        if let Some(focus) = &self.focus {
            let marker = if focus.has_override { " [override]" } else { "" };
            let _ = writeln!(out, "focus: {}{marker}", focus.path);
        }

        if self.rows.is_empty() {
            let _ = writeln!(out, "no changes");
        }
        for row in &self.rows {
            let _ = writeln!(
                out,
                "  {:<40} {:<10} {:<8} {} -> {}",
                row.diff.field_id.as_str(),
                row.status,
                row.diff.status,
                render_value(row.diff.original_value.as_ref()),
                render_value(row.diff.live_value.as_ref()),
            );
        }

        let document = serde_json::to_string_pretty(&self.patch.document)
            .unwrap_or_else(|_| self.patch.document.to_string());
        let _ = writeln!(out, "patch:\n{document}");
        if self.committed {
            let _ = writeln!(out, "committed {} field(s)", self.patch.changed_fields.len());
        }
        out
    }
}

fn render_value(value: Option<&serde_json::Value>) -> String {
    value.map_or_else(|| "-".to_string(), serde_json::Value::to_string)
}

/// Load, edit, report and optionally commit.
pub async fn run<S>(config: &CliConfig, args: &CliArgs, backend: &S) -> Result<RunReport, CoreError>
where
    S: SettingsSource + SettingsSink,
{
    let mut session = SettingsSession::default();
    session.load(backend, config.load_request()).await?;

    for (path, value) in &args.edits {
        session.set_value(path, value.clone())?;
    }

    let focus = match &args.focus {
        Some(path) => Some(session.set_focus(path)?),
        None => None,
    };

    let rows = session
        .change_report()?
        .into_iter()
        .map(|diff| ReportRow {
            status: session.classify(diff.field_id.as_str()),
            diff,
        })
        .collect();

    let patch = if args.commit {
        session.commit(backend).await?
    } else {
        session.save()?
    };

    Ok(RunReport {
        addon: config.addon.clone(),
        scope: session.scope().cloned().unwrap_or_else(|| config.load_request().scope()),
        focus,
        rows,
        committed: args.commit && !patch.is_empty(),
        patch,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
