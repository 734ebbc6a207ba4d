//! Configuration management for gapline
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. `APP_ID`, `APP_HASH`, `TG_PHONE` environment variables (highest precedence)
//! 2. Environment variables (`GAPLINE_*` prefix, `__` between section and key)
//! 3. gapline.local.toml (gitignored, local overrides)
//! 4. gapline.toml (git-tracked, project config)
//! 5. ~/.config/gapline/config.toml (user defaults)
//! 6. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main gapline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GaplineConfig {
    pub client: ClientConfig,
    pub storage: StorageConfig,
    pub rate_limit: RateLimitConfig,
    pub recovery: RecoveryConfig,
}

/// Application credentials and account identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub app_id: i64,
    pub app_hash: String,
    /// Phone number in international format, e.g. `+4123456789`.
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for session directories.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".gapline"),
        }
    }
}

/// Steady-state outbound call budget: one call per `interval_ms`, with
/// bursts of up to `burst` calls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub interval_ms: u64,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            burst: 5,
        }
    }
}

impl RateLimitConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Maximum updates requested per recovery slice.
    pub difference_limit: u32,
    /// Maximum updates held per stream while a recovery fetch is in flight.
    pub max_buffered: usize,
    /// Consecutive recovery rounds without progress before giving up.
    pub max_rounds: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            difference_limit: 100,
            max_buffered: 10_000,
            max_rounds: 3,
        }
    }
}

impl GaplineConfig {
    /// Loads the configuration of the project in `project_dir`.
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new(project_dir).load()
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if self.storage.data_dir.is_relative() {
            self.storage.data_dir = base.join(&self.storage.data_dir);
        }
    }

    /// Session directory for the configured phone number.
    pub fn session_dir(&self) -> PathBuf {
        Paths::session_dir(&self.storage.data_dir, &self.client.phone)
    }

    /// Renders the configuration in the same format the config files use.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks the values a client cannot start without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.phone.trim().is_empty() {
            return Err(ConfigError::ValidationError("no phone".to_string()));
        }
        if self.client.app_id <= 0 {
            return Err(ConfigError::ValidationError(
                "app id must be positive".to_string(),
            ));
        }
        if self.client.app_hash.is_empty() {
            return Err(ConfigError::ValidationError("no app hash".to_string()));
        }
        if self.rate_limit.interval_ms == 0 || self.rate_limit.burst == 0 {
            return Err(ConfigError::ValidationError(
                "rate limit interval and burst must be non-zero".to_string(),
            ));
        }
        if self.recovery.max_buffered == 0 || self.recovery.max_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "recovery buffer and rounds must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
