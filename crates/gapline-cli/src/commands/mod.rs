//! CLI command implementations.

use std::path::Path;

use anyhow::{Context, Result, bail};
use gapline_config::GaplineConfig;
use gapline_storage::Stores;

pub mod config;
pub mod paths;
pub mod peers;
pub mod state;
pub mod version;

/// Loads the configuration of `project`.
pub fn load_config(project: &Path) -> Result<GaplineConfig> {
    GaplineConfig::load_from_dir(project).context("Failed to load configuration")
}

/// Opens the stores of the configured account's existing session.
///
/// Inspection never creates a session directory, so a missing one is an
/// error.
pub fn open_session(project: &Path) -> Result<Stores> {
    let config = load_config(project)?;
    if config.client.phone.trim().is_empty() {
        bail!("No phone configured. Set TG_PHONE or client.phone in gapline.toml.");
    }

    let dir = config.session_dir();
    if !dir.is_dir() {
        bail!("No session found at {}", dir.display());
    }
    Stores::open(&dir).with_context(|| format!("Failed to open session at {}", dir.display()))
}
