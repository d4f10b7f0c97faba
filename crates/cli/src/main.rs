//! `addon-settings` -- inspect and edit one addon's settings.
//!
//! ```text
//! addon-settings [--commit] [--focus PATH] [PATH=JSON ...]
//! ```
//!
//! # Environment variables
//!
//! | Variable               | Required | Default                 | Description                 |
//! |------------------------|----------|-------------------------|-----------------------------|
//! | `ADDON_NAME`           | yes      | --                      | Addon to open               |
//! | `ADDON_VERSION`        | yes      | --                      | Addon version               |
//! | `PROJECT_NAME`         | no       | --                      | Edit at project level       |
//! | `SITE_ID`              | no       | --                      | Edit at site level          |
//! | `SETTINGS_API_URL`     | no       | `http://localhost:5000` | Settings server             |
//! | `SETTINGS_API_KEY`     | no       | --                      | Sent as `x-api-key`         |
//! | `REQUEST_TIMEOUT_SECS` | no       | `30`                    | Per-request timeout         |

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use addon_settings_cli::{run, CliArgs, CliConfig};
use addon_settings_source::HttpSettingsSource;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "addon_settings_cli=info,addon_settings_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = CliArgs::parse();
    let config = CliConfig::from_env().context("Invalid configuration")?;
    let backend = HttpSettingsSource::new(&config.source).context("Failed to build HTTP client")?;

    tracing::info!(
        addon = %config.addon,
        api_url = %config.source.api_url,
        edits = args.edits.len(),
        commit = args.commit,
        "Opening addon settings",
    );

    let report = run(&config, &args, &backend)
        .await
        .with_context(|| format!("Settings session for {} failed", config.addon))?;

    print!("{}", report.render());
    Ok(())
}
