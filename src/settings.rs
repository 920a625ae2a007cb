//! Engine Settings

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    /// Time given to a slide to settle before its snapshot is taken.
    #[serde(default = "default_snapshot_delay_ms")]
    pub snapshot_delay_ms: u64,
    /// Root of generated working directories. System temp dir when absent.
    #[serde(default)]
    pub temp_directory: Option<PathBuf>,
    /// Also store captured previews as slide thumbnails.
    #[serde(default)]
    pub persist_thumbnails: bool,
}

fn default_snapshot_delay_ms() -> u64 { 500 }

impl Default for Settings {
    fn default() -> Self {
        Self {
            snapshot_delay_ms: default_snapshot_delay_ms(),
            temp_directory: None,
            persist_thumbnails: false,
        }
    }
}

impl Settings {
    pub fn load_from_file(path: &Path) -> Result<Self, EngineError> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            EngineError::MalformedConfiguration(format!("{}: {}", path.display(), e))
        })
    }

    pub fn snapshot_delay(&self) -> Duration {
        Duration::from_millis(self.snapshot_delay_ms)
    }

    pub fn temp_root(&self) -> PathBuf {
        self.temp_directory.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.snapshot_delay(), Duration::from_millis(500));
        assert_eq!(settings.temp_root(), std::env::temp_dir());
        assert!(!settings.persist_thumbnails);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "persist-thumbnails": true, "temp-directory": "/var/sfx" }"#).unwrap();

        let settings = Settings::load_from_file(&path).unwrap();
        assert_eq!(settings.snapshot_delay_ms, 500);
        assert!(settings.persist_thumbnails);
        assert_eq!(settings.temp_root(), PathBuf::from("/var/sfx"));
    }

    #[test]
    fn test_invalid_file_is_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ nope").unwrap();
        assert!(matches!(
            Settings::load_from_file(&path),
            Err(EngineError::MalformedConfiguration(_))
        ));
    }
}
