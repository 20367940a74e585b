//! Typed queue configuration.
//!
//! Loaded once at construction from a TOML file, a TOML string, or
//! environment variables, and validated before any I/O happens. Invalid
//! or missing values fail fast with [`Error::Config`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::policy::Strikes;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// SQLite database file. The parent directory is created if missing.
    pub path: PathBuf,

    /// Cooldown after every attempt, in milliseconds.
    pub throttle_ms: u64,

    /// Strike limit, or `false` to retry failed tasks forever.
    #[serde(default)]
    pub strikes: Strikes,

    /// Halt the queue when a task strikes out.
    #[serde(default)]
    pub block_on_fail: bool,

    /// Start processing as soon as the queue is loaded.
    #[serde(default = "default_autostart")]
    pub autostart: bool,
}

fn default_autostart() -> bool {
    true
}

impl QueueConfig {
    pub fn new(path: impl Into<PathBuf>, throttle: Duration) -> Self {
        Self {
            path: path.into(),
            throttle_ms: throttle.as_millis() as u64,
            strikes: Strikes::default(),
            block_on_fail: false,
            autostart: true,
        }
    }

    pub fn strikes(mut self, strikes: Strikes) -> Self {
        self.strikes = strikes;
        self
    }

    pub fn block_on_fail(mut self, block: bool) -> Self {
        self.block_on_fail = block;
        self
    }

    pub fn autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    /// Parse and validate TOML.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| Error::Config(format!("invalid queue config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from `STRIKEQ_*` environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let mut config = Self {
            path: PathBuf::from(required_var("STRIKEQ_PATH")?),
            throttle_ms: parse_var("STRIKEQ_THROTTLE_MS", &required_var("STRIKEQ_THROTTLE_MS")?)?,
            strikes: Strikes::default(),
            block_on_fail: false,
            autostart: true,
        };
        if let Some(raw) = optional_var("STRIKEQ_STRIKES") {
            config.strikes = raw
                .parse()
                .map_err(|e| Error::Config(format!("STRIKEQ_STRIKES: {e}")))?;
        }
        if let Some(raw) = optional_var("STRIKEQ_BLOCK_ON_FAIL") {
            config.block_on_fail = parse_var("STRIKEQ_BLOCK_ON_FAIL", &raw)?;
        }
        if let Some(raw) = optional_var("STRIKEQ_AUTOSTART") {
            config.autostart = parse_var("STRIKEQ_AUTOSTART", &raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(Error::Config("path must not be empty".to_string()));
        }
        if self.strikes == Strikes::Limit(0) {
            return Err(Error::Config(
                "strikes must be at least 1, or false to disable".to_string(),
            ));
        }
        Ok(())
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("{name}: cannot parse {raw:?}: {e}")))
}
