//! Project configuration.
//!
//! One JSON file per project (`mcsync.config.json`) names the device, the
//! sync directory and the exclusion globs. The sync state (base snapshot)
//! lives next to it. Both bookkeeping files are always excluded from the
//! sync itself.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "mcsync.config.json";
/// Base snapshot file, kept beside the config file.
pub const SYNC_STATE_FILE: &str = "mcsync.sync.json";
/// Device credentials, managed outside the sync session.
pub const AUTH_FILE: &str = "mcsync.auth.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the device, e.g. `http://192.168.4.1:8000`.
    pub device_url: String,
    /// Directory whose contents mirror the device filesystem.
    pub sync_dir: PathBuf,
    /// Exclusion globs, matched against relative paths and all their
    /// ancestor subpaths.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Whether uploads of qualifying sources pass through the transpiler.
    #[serde(default = "default_transpile")]
    pub transpile: bool,

    /// Directory the config file was loaded from; anchors relative paths.
    #[serde(skip)]
    project_dir: PathBuf,
}

fn default_transpile() -> bool {
    true
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(|e| {
            SyncError::Config(format!("cannot read '{}': {}", path.display(), e))
        })?;
        let mut config: Config = serde_json::from_slice(&data)
            .map_err(|e| SyncError::Config(format!("invalid '{}': {}", path.display(), e)))?;
        if config.device_url.trim().is_empty() {
            return Err(SyncError::Config("device_url must not be empty".into()));
        }
        config.project_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(config)
    }

    /// Absolute-ish sync directory, resolved against the project dir.
    pub fn sync_dir(&self) -> PathBuf {
        if self.sync_dir.is_absolute() {
            self.sync_dir.clone()
        } else {
            self.project_dir.join(&self.sync_dir)
        }
    }

    pub fn sync_state_path(&self) -> PathBuf {
        self.project_dir.join(SYNC_STATE_FILE)
    }

    /// Configured exclusions plus the tool's own bookkeeping files, which
    /// must never travel to the device.
    pub fn exclude_globs(&self) -> Vec<String> {
        let mut globs = self.exclude.clone();
        for name in [CONFIG_FILE, SYNC_STATE_FILE, AUTH_FILE] {
            globs.push(format!("**/{}", name));
            globs.push(name.to_string());
        }
        globs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_resolves_relative_sync_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"{"device_url": "http://device.local", "sync_dir": "app"}"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.sync_dir(), dir.path().join("app"));
        assert_eq!(config.sync_state_path(), dir.path().join(SYNC_STATE_FILE));
        assert!(config.transpile);
        assert!(config.exclude.is_empty());
    }

    #[test]
    fn test_own_files_are_always_excluded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"{"device_url": "http://device.local", "sync_dir": ".", "exclude": ["build"]}"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        let globs = config.exclude_globs();
        assert!(globs.contains(&"build".to_string()));
        assert!(globs.iter().any(|g| g.contains(SYNC_STATE_FILE)));
        assert!(globs.iter().any(|g| g.contains(CONFIG_FILE)));
    }

    #[test]
    fn test_missing_file_is_a_config_error() {
        let err = Config::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_empty_device_url_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, r#"{"device_url": " ", "sync_dir": "."}"#).unwrap();
        assert!(Config::load(&path).is_err());
    }
}
