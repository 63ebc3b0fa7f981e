//! Engine configuration using Figment.
//!
//! Loaded from a TOML file, then overridden by environment variables with
//! the `DAQ_ACTIONS_` prefix. Sections are separated by a double underscore
//! since keys contain single ones:
//!
//! ```text
//! DAQ_ACTIONS_LOGGING__LEVEL=debug
//! DAQ_ACTIONS_RUNNER__START_PAUSED=true
//! DAQ_ACTIONS_LOG__BACKEND=memory
//! ```
//!
//! ```toml
//! [runner]
//! start_paused = false
//! event_capacity = 256
//!
//! [log]
//! backend = "redb"
//! path = "data/action_log.redb"
//! page_size = 100
//!
//! [logging]
//! level = "info"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ActionResult;
use crate::health::ErrorReporter;
use crate::log::{ActionLog, MemoryLogStore, RedbLogStore};
use crate::runner::{ActionRunner, OperatorPrompt};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or environment could not be read or parsed.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    /// Values parsed but are out of range.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Runner start-up settings.
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Action log backend.
    #[serde(default)]
    pub log: LogConfig,
    /// Tracing output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Runner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Start with the queue held
    #[serde(default)]
    pub start_paused: bool,
    /// Capacity of the Runner's event channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

/// Where completed Actions are recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogBackend {
    /// Keep entries in memory; lost on exit.
    Memory,
    /// Persist entries in a redb file.
    Redb,
}

/// Action log settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Where entries are kept.
    #[serde(default = "default_backend")]
    pub backend: LogBackend,
    /// Database file for the `redb` backend
    #[serde(default = "default_log_path")]
    pub path: PathBuf,
    /// Maximum entries returned by one history query
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

/// Tracing output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_event_capacity() -> usize {
    crate::runner::DEFAULT_EVENT_CAPACITY
}

fn default_backend() -> LogBackend {
    LogBackend::Redb
}

fn default_log_path() -> PathBuf {
    PathBuf::from("data/action_log.redb")
}

fn default_page_size() -> usize {
    100
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            start_paused: false,
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_log_path(),
            page_size: default_page_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `path` (if it exists) and the environment.
    ///
    /// Precedence, highest first: `DAQ_ACTIONS_` environment variables, the
    /// TOML file, built-in defaults. The result is validated.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::figment(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DAQ_ACTIONS_").split("__"))
            .extract::<Self>()
            .map_err(|err| ConfigError::LoadError(Box::new(err)))
            .and_then(|config| {
                config.validate()?;
                Ok(config)
            })
    }

    /// Parse configuration from a TOML string, without environment overrides.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(Toml::string(toml))
            .extract()
            .map_err(|err| ConfigError::LoadError(Box::new(err)))?;
        config.validate()?;
        Ok(config)
    }

    fn figment(source: impl figment::Provider) -> Figment {
        Figment::from(Serialized::defaults(Self::default())).merge(source)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid logging level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        if self.runner.event_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "runner.event_capacity must be greater than 0".to_string(),
            ));
        }

        if self.log.page_size == 0 {
            return Err(ConfigError::ValidationError(
                "log.page_size must be greater than 0".to_string(),
            ));
        }

        if self.log.backend == LogBackend::Redb && self.log.path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "log.path cannot be empty for the redb backend".to_string(),
            ));
        }

        Ok(())
    }

    /// Open the configured action log, reporting store errors to `monitor`.
    pub fn open_log(&self, monitor: Arc<dyn ErrorReporter>) -> ActionResult<ActionLog> {
        let log = match self.log.backend {
            LogBackend::Memory => ActionLog::new(Arc::new(MemoryLogStore::default()), monitor),
            LogBackend::Redb => {
                ActionLog::new(Arc::new(RedbLogStore::open(&self.log.path)?), monitor)
            }
        };
        Ok(log)
    }

    /// Spawn a Runner with these settings.
    pub fn spawn_runner(&self, log: ActionLog, operator: Arc<dyn OperatorPrompt>) -> ActionRunner {
        ActionRunner::spawn_with_prompt(
            log,
            operator,
            self.runner.start_paused,
            self.runner.event_capacity,
        )
    }
}
