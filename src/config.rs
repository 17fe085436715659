//! Engine configuration loaded from TOML.
//!
//! ```toml
//! [engine]
//! max_row_limit = 5000
//! max_join_rows = 200000
//!
//! [log]
//! filter = "querykit=debug"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query::model::MAX_ROW_LIMIT;

/// Default cap on intermediate join rows.
pub const DEFAULT_MAX_JOIN_ROWS: usize = 1_000_000;

/// Runtime limits applied by validation and execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Upper bound on the effective row limit of any query.
    pub max_row_limit: u32,
    /// Upper bound on the rows produced by any single join step.
    pub max_join_rows: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_row_limit: MAX_ROW_LIMIT,
            max_join_rows: DEFAULT_MAX_JOIN_ROWS,
        }
    }
}

impl EngineConfig {
    /// Engine section of [`Settings::load`].
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        Settings::load(explicit).map(|settings| settings.engine)
    }
}

/// `[log]` section.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `QUERYKIT_LOG` is unset.
    pub filter: Option<String>,
}

/// Whole configuration file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Engine limits.
    pub engine: EngineConfig,
    /// Logging defaults.
    pub log: LogConfig,
}

impl Settings {
    /// Loads `explicit`, or the default path when `None`. A missing default
    /// file yields defaults; a missing explicit file is an error.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let settings = match explicit {
            Some(path) => read_file(&path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => read_file(&path)?,
                _ => Settings::default(),
            },
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Parses settings from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_row_limit == 0 {
            return Err(ConfigError::Invalid {
                key: "engine.max_row_limit",
                reason: "must be at least 1",
            });
        }
        if self.engine.max_join_rows == 0 {
            return Err(ConfigError::Invalid {
                key: "engine.max_join_rows",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Config file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// File is not valid TOML for [`Settings`].
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Config file.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("config value {key} {reason}")]
    Invalid {
        /// Dotted key.
        key: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// `<config_dir>/querykit/config.toml`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("querykit").join("config.toml"))
}

fn read_file(path: &Path) -> Result<Settings, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
