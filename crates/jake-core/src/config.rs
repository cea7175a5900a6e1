//! Configuration - project or user `config.json` plus `JAKE_*` overrides

use crate::error::{JakeError, Result};
use crate::hasher::HashStrategy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Engine settings. Every field has a default, so partial files are fine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JakeConfig {
    pub jakefile: String,
    pub jobs: usize,
    pub shell: Option<String>,
    pub cache_dir: String,
    pub hash: HashStrategy,
    pub max_content_hash_files: usize,
    pub fail_fast: bool,
}

impl Default for JakeConfig {
    fn default() -> Self {
        Self {
            jakefile: "Jakefile.json".to_string(),
            jobs: 1,
            shell: None,
            cache_dir: ".jake".to_string(),
            hash: HashStrategy::Content,
            max_content_hash_files: 4096,
            fail_fast: false,
        }
    }
}

/// Project config path (<root>/.jake/config.json)
pub fn project_config_path(root: &Path) -> PathBuf {
    root.join(".jake").join("config.json")
}

/// User config path (~/.jake/config.json)
pub fn user_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".jake")
        .join("config.json")
}

impl JakeConfig {
    /// Project config if present, else user config, else defaults; then env overrides
    pub fn load(root: &Path) -> Result<Self> {
        let mut config = [project_config_path(root), user_config_path()]
            .into_iter()
            .find(|path| path.exists())
            .map(|path| Self::load_file(&path))
            .transpose()?
            .unwrap_or_default();

        config.apply_env(std::env::vars());
        Ok(config)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config");
        let content = std::fs::read_to_string(path).map_err(|e| JakeError::Load {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        serde_json::from_str(&content).map_err(|e| JakeError::Load {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    /// Apply `JAKE_JOBS`, `JAKE_SHELL`, `JAKE_CACHE_DIR` and `JAKE_HASH`
    pub fn apply_env<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "JAKE_JOBS" => match value.parse::<usize>() {
                    Ok(jobs) if jobs > 0 => self.jobs = jobs,
                    _ => warn!(value, "ignoring invalid JAKE_JOBS"),
                },
                "JAKE_SHELL" if !value.is_empty() => self.shell = Some(value),
                "JAKE_CACHE_DIR" if !value.is_empty() => self.cache_dir = value,
                "JAKE_HASH" => match value.to_ascii_lowercase().as_str() {
                    "content" => self.hash = HashStrategy::Content,
                    "mtime" => self.hash = HashStrategy::Mtime,
                    _ => warn!(value, "ignoring invalid JAKE_HASH"),
                },
                _ => {}
            }
        }
    }
}
