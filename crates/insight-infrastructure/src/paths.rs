//! Unified path management for Insight files.
//!
//! ```text
//! ~/.config/insight/           # Config directory
//! ├── config.toml              # Application configuration
//! ├── sessions/                # One JSON file per session
//! └── logs/                    # Daily-rolling application logs
//!     └── insight.log.YYYY-MM-DD
//! ```

use std::path::PathBuf;

const APP_DIR: &str = "insight";

/// Errors that can occur during path resolution.
#[derive(Debug)]
pub enum PathError {
    /// Platform config directory could not be determined.
    ConfigDirNotFound,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::ConfigDirNotFound => write!(f, "Cannot find the platform config directory"),
        }
    }
}

impl std::error::Error for PathError {}

pub struct InsightPaths;

impl InsightPaths {
    /// Returns the Insight configuration directory (e.g. `~/.config/insight/`).
    pub fn config_dir() -> Result<PathBuf, PathError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or(PathError::ConfigDirNotFound)
    }

    pub fn config_file() -> Result<PathBuf, PathError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn sessions_dir() -> Result<PathBuf, PathError> {
        Ok(Self::config_dir()?.join("sessions"))
    }

    pub fn logs_dir() -> Result<PathBuf, PathError> {
        Ok(Self::config_dir()?.join("logs"))
    }
}
