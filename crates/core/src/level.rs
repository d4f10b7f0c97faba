//! Settings hierarchy levels (studio → project → site) and their addressing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::source::AddonRef;

// ---------------------------------------------------------------------------
// SettingsLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsLevel {
    Studio,
    Project,
    Site,
}

impl SettingsLevel {
    /// String representation for display, logging, and storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Studio => "studio",
            Self::Project => "project",
            Self::Site => "site",
        }
    }

    /// The level whose values this level inherits, if any.
    pub fn parent(&self) -> Option<Self> {
        match self {
            Self::Studio => None,
            Self::Project => Some(Self::Studio),
            Self::Site => Some(Self::Project),
        }
    }
}

impl fmt::Display for SettingsLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingsLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "studio" => Ok(Self::Studio),
            "project" => Ok(Self::Project),
            "site" => Ok(Self::Site),
            _ => Err(CoreError::Validation(format!(
                "Invalid settings level '{s}'. Must be one of: studio, project, site"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// LevelScope
// ---------------------------------------------------------------------------

/// The level in effect for one editing session plus the names that
/// address it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelScope {
    pub level: SettingsLevel,
    pub project_name: Option<String>,
    pub site_id: Option<String>,
}

impl LevelScope {
    pub fn studio() -> Self {
        Self {
            level: SettingsLevel::Studio,
            project_name: None,
            site_id: None,
        }
    }

    /// Resolve the level from an optional project and site.
    ///
    /// - no project → studio
    /// - project only → project
    /// - project and site → site
    ///
    /// Empty strings count as absent. A site without a project is ignored.
    pub fn resolve(project_name: Option<&str>, site_id: Option<&str>) -> Self {
        let project_name = project_name.filter(|p| !p.is_empty());
        let site_id = site_id.filter(|s| !s.is_empty());

        match (project_name, site_id) {
            (None, site) => {
                if let Some(site) = site {
                    tracing::debug!(site_id = site, "Site given without project, using studio level");
                }
                Self::studio()
            }
            (Some(project), None) => Self {
                level: SettingsLevel::Project,
                project_name: Some(project.to_string()),
                site_id: None,
            },
            (Some(project), Some(site)) => Self {
                level: SettingsLevel::Site,
                project_name: Some(project.to_string()),
                site_id: Some(site.to_string()),
            },
        }
    }

    /// Fragment appended to the addon's schema / settings / overrides
    /// endpoints: empty, `/{project}`, or `/{project}?site={site}`.
    pub fn query_suffix(&self) -> String {
        let mut suffix = String::new();
        if let Some(project) = &self.project_name {
            suffix.push('/');
            suffix.push_str(project);
            if let Some(site) = &self.site_id {
                suffix.push_str("?site=");
                suffix.push_str(site);
            }
        }
        suffix
    }

    /// Key identifying the stored settings of `addon` at this scope, e.g.
    /// `core@1.0.0/site/my_project/workstation-01`.
    pub fn storage_key(&self, addon: &AddonRef) -> String {
        let mut key = format!("{}/{}", addon.display_name(), self.level);
        for part in [&self.project_name, &self.site_id].into_iter().flatten() {
            key.push('/');
            key.push_str(part);
        }
        key
    }
}

impl fmt::Display for LevelScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.project_name, &self.site_id) {
            (Some(project), Some(site)) => write!(f, "site {site} of {project}"),
            (Some(project), None) => write!(f, "project {project}"),
            _ => f.write_str("studio"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
