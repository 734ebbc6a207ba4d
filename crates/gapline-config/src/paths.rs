//! Path utilities and XDG directory discovery

use crate::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// XDG-compliant paths for gapline
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    /// Create a new Paths instance with XDG discovery
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("dev", "gapline", "gapline"),
        }
    }

    /// Get user config directory (~/.config/gapline/)
    pub fn user_config_dir(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.config_dir().to_path_buf())
            .ok_or_else(|| {
                ConfigError::XdgError("Failed to determine user config directory".to_string())
            })
    }

    /// Get user config file path (~/.config/gapline/config.toml)
    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.user_config_dir()?.join("config.toml"))
    }

    /// Get project config file path (gapline.toml)
    pub fn project_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("gapline.toml")
    }

    /// Get local config file path (gapline.local.toml, gitignored)
    pub fn local_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("gapline.local.toml")
    }

    /// Session directory for one account: `<data_dir>/session/phone-<digits>`.
    ///
    /// Only the digits of the phone number are kept, so `+1 (234) 567`
    /// and `1234567` share a directory.
    pub fn session_dir(data_dir: impl AsRef<Path>, phone: &str) -> PathBuf {
        let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
        data_dir
            .as_ref()
            .join("session")
            .join(format!("phone-{digits}"))
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
