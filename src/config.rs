use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ParleyError, Result};

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "parley.json";

pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);
const DEFAULT_POLL_INTERVAL_SECS: f64 = 0.5;

/// Where the shared log and transfer directories live and how often readers
/// poll them. Field names follow the JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "shared_file", default = "default_shared_file")]
    pub shared_log_path: PathBuf,
    #[serde(rename = "downloads_dir", default = "default_downloads_dir")]
    pub transfer_root: PathBuf,
    #[serde(
        rename = "poll_interval",
        alias = "interval",
        default = "default_poll_interval"
    )]
    pub poll_interval_secs: f64,
}

fn default_shared_file() -> PathBuf {
    PathBuf::from("shared_chat.log")
}

fn default_downloads_dir() -> PathBuf {
    PathBuf::from("file")
}

fn default_poll_interval() -> f64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shared_log_path: default_shared_file(),
            transfer_root: default_downloads_dir(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

impl Config {
    /// Load from `path`, or from `parley.json` when `path` is `None`.
    ///
    /// A missing default file yields the defaults; a missing explicit file is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound && !explicit => {
                return Ok(Self::default());
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ParleyError::ConfigNotFound(path.display().to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            ParleyError::CorruptConfig(path.display().to_string(), e.to_string())
        })?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Poll interval as a duration, never below `MIN_POLL_INTERVAL`.
    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval_secs)
            .unwrap_or(Duration::from_secs_f64(DEFAULT_POLL_INTERVAL_SECS))
            .max(MIN_POLL_INTERVAL)
    }
}
