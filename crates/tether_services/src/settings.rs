//! Settings management

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tether_script::ScriptConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Runtime settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub scripting: ScriptConfig,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing-subscriber` filter directive; `RUST_LOG` takes precedence.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Settings {
    /// Read settings from a JSON file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Like [`Settings::load`], but a missing file yields `None`.
    pub fn load_optional(path: &Path) -> Result<Option<Self>, SettingsError> {
        if path.exists() {
            Self::load(path).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Like [`Settings::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        Ok(Self::load_optional(path)?.unwrap_or_default())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.json");
        fs::write(&path, r#"{ "scripting": { "entry_point": "index.js" }, "logging": { "filter": "debug" } }"#).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(Settings::load_optional(&path).unwrap().as_ref(), Some(&settings));
        assert_eq!(settings.scripting.entry_point, "index.js");
        assert_eq!(settings.scripting.scripts_dir, "js");
        assert_eq!(settings.logging.filter, "debug");
    }

    #[test]
    fn test_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(Settings::load_optional(&dir.path().join("absent.json")).unwrap(), None);
        assert!(matches!(
            Settings::load(&dir.path().join("absent.json")),
            Err(SettingsError::Read { .. })
        ));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Settings::load_or_default(&path), Err(SettingsError::Parse { .. })));
    }

    #[test]
    fn test_json_round_trip() {
        let mut settings = Settings::default();
        settings.scripting.min_interval_ms = 16;
        let parsed: Settings = serde_json::from_str(&settings.to_json()).unwrap();
        assert_eq!(parsed, settings);
    }
}
