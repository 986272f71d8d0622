//! Persistence context configuration.
//!
//! Supports TOML config files, environment variable overrides, and defaults.

use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PersistenceError, Result};

/// When pending changes are written to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Flush on commit, on explicit `flush()`, and before queries
    #[default]
    Auto,
    /// Flush only on commit and explicit `flush()`
    Commit,
}

impl FromStr for FlushMode {
    type Err = PersistenceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(FlushMode::Auto),
            "commit" => Ok(FlushMode::Commit),
            other => Err(PersistenceError::Config(format!(
                "Invalid flush_mode: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for FlushMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushMode::Auto => write!(f, "auto"),
            FlushMode::Commit => write!(f, "commit"),
        }
    }
}

/// Persistence context configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Flush strategy (default: auto)
    pub flush_mode: FlushMode,
    /// Operations between flush + clear in batched persistence (default: 1000)
    pub batch_size: usize,
    /// Managed entity count that triggers a warning (default: 100_000)
    pub managed_entity_warn_threshold: usize,
    /// Initial identity map capacity (default: 64)
    pub initial_context_capacity: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            flush_mode: FlushMode::Auto,
            batch_size: 1000,
            managed_entity_warn_threshold: 100_000,
            initial_context_capacity: 64,
        }
    }
}

impl PersistenceConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| PersistenceError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| PersistenceError::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| PersistenceError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Applies environment variable overrides.
    ///
    /// Variables are prefixed with `ORM_`, e.g. `ORM_BATCH_SIZE=500`
    /// overrides `batch_size`.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(env::vars())
    }

    /// Applies `ORM_*` overrides from the given key/value pairs.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, val) in vars {
            let val = val.as_ref();
            match key.as_ref() {
                "ORM_FLUSH_MODE" => self.flush_mode = val.parse()?,
                "ORM_BATCH_SIZE" => {
                    self.batch_size = val.parse().map_err(|_| {
                        PersistenceError::Config(format!("Invalid batch_size: {}", val))
                    })?;
                }
                "ORM_MANAGED_ENTITY_WARN_THRESHOLD" => {
                    self.managed_entity_warn_threshold = val.parse().map_err(|_| {
                        PersistenceError::Config(format!(
                            "Invalid managed_entity_warn_threshold: {}",
                            val
                        ))
                    })?;
                }
                "ORM_INITIAL_CONTEXT_CAPACITY" => {
                    self.initial_context_capacity = val.parse().map_err(|_| {
                        PersistenceError::Config(format!("Invalid initial_context_capacity: {}", val))
                    })?;
                }
                _ => {}
            }
        }
        self.validate()
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PersistenceError::Config(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if self.managed_entity_warn_threshold == 0 {
            return Err(PersistenceError::Config(
                "managed_entity_warn_threshold must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
