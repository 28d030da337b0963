//! Settings discovery and loading for vmflow

pub mod error;
pub mod settings;

pub use error::*;
pub use settings::{PollSettings, Settings, TimeoutSettings};

use std::path::{Path, PathBuf};

/// Environment variable naming a settings file directly
pub const CONFIG_PATH_ENV: &str = "VMFLOW_CONFIG_PATH";

/// File names searched in the current directory, most specific first
pub const CANDIDATES: [&str; 3] = ["vmflow.local.yaml", "vmflow.yaml", ".vmflow.yaml"];

/// Per-user settings directory, `<config_dir>/vmflow`
pub fn settings_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("vmflow"))
        .ok_or(ConfigError::ConfigDirNotFound)
}

/// Find the settings file to load
///
/// Search order:
/// 1. `VMFLOW_CONFIG_PATH`
/// 2. current directory: `vmflow.local.yaml`, `vmflow.yaml`, `.vmflow.yaml`
/// 3. `<config_dir>/vmflow/settings.yaml`
///
/// `None` means no file exists and defaults apply.
pub fn find_settings_file() -> Result<Option<PathBuf>> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(Some(path));
        }
        tracing::warn!(path = %path.display(), "{CONFIG_PATH_ENV} points at a missing file, ignoring it");
    }

    let current_dir = std::env::current_dir().map_err(|source| ConfigError::Io {
        path: PathBuf::from("."),
        source,
    })?;
    for filename in CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    if let Ok(dir) = settings_dir() {
        let global = dir.join("settings.yaml");
        if global.exists() {
            return Ok(Some(global));
        }
    }

    Ok(None)
}

/// Load settings from `explicit` if given, otherwise from the discovered file
///
/// Returns the settings and the file they came from.
pub fn load(explicit: Option<&Path>) -> Result<(Settings, Option<PathBuf>)> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_settings_file()?,
    };
    let settings = match &path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "Loading settings");
            Settings::from_file(path)?
        }
        None => {
            tracing::debug!("No settings file found, using defaults");
            Settings::default()
        }
    };
    Ok((settings, path))
}
