use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::detect::DetectionStrategy;
use crate::retry::RetryConfig;

/// Default number of issues requested per page (GitHub's maximum).
pub const DEFAULT_PER_PAGE: u8 = 100;

/// Default number of concurrent local-store writes within a page.
pub const DEFAULT_WRITE_CONCURRENCY: usize = 8;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Tunables for sync passes, loaded from YAML.
///
/// Every field has a default, so an empty document is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Issues requested per page (1..=100)
    pub per_page: u8,
    /// Upper bound on concurrent local-store writes within a page
    pub write_concurrency: usize,
    pub detection: DetectionStrategy,
    /// Ignore the stored cursor and rescan everything, with closure detection
    pub force_full_scan: bool,
    /// Proactive pacing of remote calls; unpaced when absent
    pub requests_per_second: Option<u32>,
    pub retry: RetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            per_page: DEFAULT_PER_PAGE,
            write_concurrency: DEFAULT_WRITE_CONCURRENCY,
            detection: DetectionStrategy::default(),
            force_full_scan: false,
            requests_per_second: None,
            retry: RetryConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = if content.trim().is_empty() {
            SyncConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_yaml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.per_page == 0 || self.per_page > 100 {
            return Err(ConfigError::Invalid(format!(
                "per_page must be between 1 and 100, got {}",
                self.per_page
            )));
        }
        if self.write_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "write_concurrency must be at least 1".to_string(),
            ));
        }
        if self.retry.min_delay > self.retry.max_delay {
            return Err(ConfigError::Invalid(
                "retry.min_delay_ms must not exceed retry.max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Render the config as YAML, for `init`
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}
