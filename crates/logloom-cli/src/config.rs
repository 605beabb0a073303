//! Optional `logloom.toml` configuration file.
//!
//! Discovered in the working directory first, then under `LOGLOOM_HOME` (or
//! the platform data dir). Every field is optional; CLI flags override file
//! values, file values override built-in defaults.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;

/// Built-in defaults, applied beneath file and flag layers.
pub const DEFAULT_BATCH_SIZE: usize = 50_000;
pub const DEFAULT_SKIP_THRESHOLD: usize = 0;
pub const DEFAULT_MAX_SAMPLES: usize = 1000;

/// Values a `logloom.toml` file may provide.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub batch_size: Option<usize>,
    pub skip_threshold: Option<usize>,
    pub max_samples: Option<usize>,
    pub workers: Option<usize>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

impl FileConfig {
    /// Parse a config file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    /// Discover and load the config file, returning defaults when none exists.
    ///
    /// # Errors
    ///
    /// A present-but-invalid file is an error; a missing file is not.
    pub fn discover() -> anyhow::Result<Self> {
        for candidate in candidate_paths() {
            if candidate.is_file() {
                return Self::from_path(&candidate);
            }
        }
        Ok(Self::default())
    }
}

fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("logloom.toml")];
    if let Some(home) = crate::paths::user_dir() {
        paths.push(home.join("logloom.toml"));
    }
    paths
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logloom.toml");
        std::fs::write(&path, "batch_size = 100\nmodel = \"gpt-4o-mini\"\n").unwrap();
        let cfg = FileConfig::from_path(&path).unwrap();
        assert_eq!(cfg.batch_size, Some(100));
        assert_eq!(cfg.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(cfg.workers, None);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logloom.toml");
        std::fs::write(&path, "bach_size = 100\n").unwrap();
        assert!(FileConfig::from_path(&path).is_err());
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logloom.toml");
        std::fs::write(&path, "").unwrap();
        assert_eq!(FileConfig::from_path(&path).unwrap(), FileConfig::default());
    }
}
