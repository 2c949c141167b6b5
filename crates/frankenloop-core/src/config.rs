//! Configuration for the event loop and logging.
//!
//! ```toml
//! [event_loop]
//! clock = "virtual"
//! frame_interval_ms = 16
//! idle_callbacks = true
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::logging::LogConfig;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// How the event loop measures time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockMode {
    /// Deterministic time that jumps straight to the next due event
    #[default]
    Virtual,
    /// Monotonic wall clock; the loop sleeps until the next due event
    Realtime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub clock: ClockMode,

    /// Spacing of animation frames, and the minimum spacing between idle
    /// periods
    pub frame_interval_ms: u64,

    /// Whether the loop starts out offering idle callbacks
    pub idle_callbacks: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            clock: ClockMode::Virtual,
            frame_interval_ms: 16,
            idle_callbacks: true,
        }
    }
}

impl LoopConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub event_loop: LoopConfig,
    pub logging: LogConfig,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
