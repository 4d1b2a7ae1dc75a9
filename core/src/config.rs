//! Debugger configuration
//!
//! Settings are resolved in this order (later wins):
//! 1. Built-in defaults
//! 2. TOML file (explicit path, or `STRAND_CONFIG_PATH`)
//! 3. Environment variables, `STRAND__<SECTION>__<KEY>` (a `.env` file is honoured)
//! 4. Builder overrides
//!
//! ```toml
//! [debug]
//! mode = "slow_motion"
//! slow_motion_interval_ms = 250
//! pause_on_exception = true
//!
//! [stop]
//! max_attempts = 500
//! poll_interval_ms = 40
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::DebugError;
use crate::types::DebugMode;

pub const CONFIG_PATH_ENV: &str = "STRAND_CONFIG_PATH";
const ENV_PREFIX: &str = "STRAND";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub debug: DebugSettings,
    pub stop: StopSettings,
    pub events: EventSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSettings {
    /// Mode given to every newly activated root unit.
    pub mode: DebugMode,

    /// Period of the shared slow-motion ticker.
    pub slow_motion_interval_ms: u64,

    /// Pause a unit after it reports an exception.
    pub pause_on_exception: bool,
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            mode: DebugMode::Off,
            slow_motion_interval_ms: 500,
            pause_on_exception: true,
        }
    }
}

/// Bounds for the forced-stop polling loop (~20s with the defaults).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopSettings {
    pub max_attempts: u32,
    pub poll_interval_ms: u64,
}

impl Default for StopSettings {
    fn default() -> Self {
        Self {
            max_attempts: 500,
            poll_interval_ms: 40,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    /// Capacity of the broadcast channel; slow subscribers lag past this.
    pub capacity: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from the default locations (env path, env vars).
    pub fn load() -> Result<Config> {
        Config::builder().build()
    }

    pub fn validate(&self) -> std::result::Result<(), DebugError> {
        if self.debug.slow_motion_interval_ms == 0 {
            return Err(DebugError::InvalidConfig(
                "debug.slow_motion_interval_ms must be > 0".to_string(),
            ));
        }
        if self.stop.max_attempts == 0 {
            return Err(DebugError::InvalidConfig(
                "stop.max_attempts must be > 0".to_string(),
            ));
        }
        if self.stop.poll_interval_ms == 0 {
            return Err(DebugError::InvalidConfig(
                "stop.poll_interval_ms must be > 0".to_string(),
            ));
        }
        if self.events.capacity == 0 {
            return Err(DebugError::InvalidConfig(
                "events.capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn slow_motion_interval(&self) -> Duration {
        Duration::from_millis(self.debug.slow_motion_interval_ms)
    }

    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop.poll_interval_ms)
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    mode: Option<DebugMode>,
    skip_env: bool,
}

impl ConfigBuilder {
    /// Explicit config file; a missing explicit file is an error.
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn mode(mut self, mode: Option<DebugMode>) -> Self {
        self.mode = mode;
        self
    }

    /// Ignore `.env` and process environment (tests).
    pub fn skip_env(mut self, skip: bool) -> Self {
        self.skip_env = skip;
        self
    }

    pub fn build(self) -> Result<Config> {
        if !self.skip_env {
            dotenvy::dotenv().ok();
        }

        let path = self.config_path.or_else(|| {
            if self.skip_env {
                None
            } else {
                std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from)
            }
        });

        let mut builder = ::config::Config::builder();
        if let Some(path) = &path {
            builder = builder.add_source(file_source(path)?);
        }
        if !self.skip_env {
            builder = builder.add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let mut config: Config = builder
            .build()
            .context("Failed to read configuration sources")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        if let Some(mode) = self.mode {
            config.debug.mode = mode;
        }

        config.validate()?;
        Ok(config)
    }
}

fn file_source(path: &Path) -> Result<::config::File<::config::FileSourceFile, ::config::FileFormat>> {
    if !path.exists() {
        anyhow::bail!("Config file not found: {}", path.display());
    }
    Ok(::config::File::from(path)
        .format(::config::FileFormat::Toml)
        .required(true))
}
