//! Layered configuration loading.

use crate::{ConfigError, GaplineConfig, Paths};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Loads a [`GaplineConfig`] for one project directory.
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// A loader for `project_dir` reading `GAPLINE_*` variables.
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        Self {
            project_dir: project_dir.as_ref().to_path_buf(),
            env_prefix: "GAPLINE".to_string(),
        }
    }

    /// Set the environment variable prefix (default: "GAPLINE")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// TOML files in increasing precedence; missing ones are skipped.
    fn files(&self) -> Vec<PathBuf> {
        let mut files = Vec::with_capacity(3);
        if let Ok(user) = Paths::new().user_config_file() {
            files.push(user);
        }
        files.push(Paths::project_config_file(&self.project_dir));
        files.push(Paths::local_config_file(&self.project_dir));
        files
    }

    /// Merges defaults, config files, `GAPLINE_SECTION__KEY` variables and
    /// finally the plain `APP_ID` / `APP_HASH` / `TG_PHONE` variables.
    pub fn load(self) -> Result<GaplineConfig> {
        let defaults = config::Config::try_from(&GaplineConfig::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        for file in self.files() {
            builder = builder.add_source(
                config::File::from(file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let overrides = legacy_env_overrides(|name| env::var(name).ok())?;
        builder = builder
            .set_override_option("client.app_id", overrides.app_id)?
            .set_override_option("client.app_hash", overrides.app_hash)?
            .set_override_option("client.phone", overrides.phone)?;

        let mut config: GaplineConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.resolve_paths(&self.project_dir);
        Ok(config)
    }
}

/// Values read from the plain `APP_ID`, `APP_HASH` and `TG_PHONE` variables.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct LegacyOverrides {
    pub(crate) app_id: Option<i64>,
    pub(crate) app_hash: Option<String>,
    pub(crate) phone: Option<String>,
}

pub(crate) fn legacy_env_overrides(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<LegacyOverrides, ConfigError> {
    let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    let app_id = non_empty("APP_ID")
        .map(|raw| {
            raw.trim().parse::<i64>().map_err(|e| ConfigError::EnvError {
                name: "APP_ID".to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()?;

    Ok(LegacyOverrides {
        app_id,
        app_hash: non_empty("APP_HASH"),
        phone: non_empty("TG_PHONE"),
    })
}
