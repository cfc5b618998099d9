//! Runtime configuration.
//!
//! Reads a TOML file such as:
//!
//! ```toml
//! session_id = "floor-a"
//! snapshot_dir = "/var/lib/hierarchy/floor-a"
//! snapshot_interval = 10
//! retain_snapshots = 5
//! enforce_department_rules = true
//! broadcast = true
//! log_filter = "hierarchy_runtime=debug,info"
//! ```
//!
//! Every key is optional. Unknown keys are rejected.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Origin name stamped on every envelope this session emits.
    pub session_id: String,

    /// Where versioned snapshot files go. No directory means snapshots
    /// are kept in memory only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_dir: Option<PathBuf>,

    /// Write a directory snapshot every N commits. 0 disables them.
    pub snapshot_interval: u64,

    /// How many snapshot files to keep; older ones are pruned.
    pub retain_snapshots: usize,

    pub enforce_department_rules: bool,

    /// Publish committed snapshots to local subscribers.
    pub broadcast: bool,

    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            session_id: "local".to_string(),
            snapshot_dir: None,
            snapshot_interval: 1,
            retain_snapshots: 10,
            enforce_department_rules: true,
            broadcast: true,
            log_filter: "info".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Load config from disk, or return the default if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_id.trim().is_empty() {
            return Err(ConfigError::Invalid("session_id must not be empty".to_string()));
        }
        if self.snapshot_dir.is_some() && self.snapshot_interval > 0 && self.retain_snapshots == 0 {
            return Err(ConfigError::Invalid(
                "retain_snapshots must be at least 1 when directory snapshots are enabled"
                    .to_string(),
            ));
        }
        if let Err(e) = EnvFilter::try_new(&self.log_filter) {
            return Err(ConfigError::Invalid(format!(
                "log_filter {:?} is not a valid filter: {}",
                self.log_filter, e
            )));
        }
        Ok(())
    }

    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }
}
