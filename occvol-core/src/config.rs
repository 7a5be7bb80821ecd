//! TOML configuration.
//!
//! ```toml
//! [source]
//! url = "https://example.com/daily-volume"
//! format = "csv"
//! timeout_secs = 30
//!
//! [store]
//! dir = "data"
//! table = "volHist"
//!
//! [backfill]
//! earliest_month = "2008-01-01"
//! ```
//!
//! Every key is optional; missing keys take the defaults above (the source
//! url has none and must be set before fetching).

use crate::data::store::validate_identifier;
use crate::log::RunLog;
use crate::reconcile::EARLIEST_AVAILABLE_MONTH;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub store: StoreConfig,
    pub backfill: BackfillConfig,
}

/// Report endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub url: String,
    pub format: String,
    /// Request deadline. Stays at 30 unless a slow link or a test needs otherwise.
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            format: "csv".into(),
            timeout_secs: 30,
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Invalid("source.url is not set".into()));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "source.timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Where records are persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub dir: PathBuf,
    pub table: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
            table: "volHist".into(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_identifier(&self.table).map_err(|e| ConfigError::Invalid(format!("store.table: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    /// Backfill stops before this month.
    pub earliest_month: NaiveDate,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            earliest_month: EARLIEST_AVAILABLE_MONTH,
        }
    }
}

impl Config {
    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load `path`, or fall back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path, log: &dyn RunLog) -> Result<Self, ConfigError> {
        if path.exists() {
            log.debug(&format!("Loading config file: {}", path.display()));
            Self::from_file(path)
        } else {
            log.warning(&format!(
                "Unable to find config file {}, using defaults",
                path.display()
            ));
            Ok(Self::default())
        }
    }

    /// Check everything a fetching run needs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.source.validate()?;
        self.store.validate()
    }
}
