//! Binding-layer configuration via `tether.toml`
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration. Settings are read once, when the reclaimer is
//! started and when sessions open.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Config file name placed next to the application's data directory.
pub const CONFIG_FILE_NAME: &str = "tether.toml";

/// Default name of the reclaimer worker thread.
pub const DEFAULT_RECLAIMER_THREAD: &str = "tether-reclaimer";

/// Settings for the background reclaimer worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReclaimerConfig {
    /// Name given to the worker thread
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
    /// Finalizer calls slower than this are logged at warn level (0 disables)
    #[serde(default = "default_slow_finalizer_ms")]
    pub slow_finalizer_ms: u64,
}

fn default_thread_name() -> String {
    DEFAULT_RECLAIMER_THREAD.to_string()
}

fn default_slow_finalizer_ms() -> u64 {
    50
}

impl Default for ReclaimerConfig {
    fn default() -> Self {
        Self {
            thread_name: default_thread_name(),
            slow_finalizer_ms: default_slow_finalizer_ms(),
        }
    }
}

/// Settings for each context's weak-reference record pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Slots reserved up front; the pool still grows on demand
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,
}

fn default_initial_capacity() -> usize {
    64
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_capacity: default_initial_capacity(),
        }
    }
}

/// Binding-layer configuration loaded from `tether.toml`.
///
/// # Example
///
/// ```toml
/// [reclaimer]
/// thread_name = "tether-reclaimer"
/// slow_finalizer_ms = 50
///
/// [pool]
/// initial_capacity = 64
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TetherConfig {
    /// Reclaimer worker settings
    #[serde(default)]
    pub reclaimer: ReclaimerConfig,
    /// Record pool settings
    #[serde(default)]
    pub pool: PoolConfig,
}

impl TetherConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tether binding-layer configuration

[reclaimer]
# Name of the background thread that frees unreachable native resources.
thread_name = "tether-reclaimer"
# Finalizer calls slower than this many milliseconds are logged (0 disables).
slow_finalizer_ms = 50

[pool]
# Weak-reference record slots reserved per context. The pool grows on demand.
initial_capacity = 64
"#
    }

    /// Parse a config from TOML text and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TetherConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::from_toml_str(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                msg
            )),
            other => other,
        })?;
        debug!(target: "tether::config", path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
            info!(target: "tether::config", path = %path.display(), "Wrote default config");
        }
        Ok(())
    }

    /// Reject settings the reclaimer cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.reclaimer.thread_name.trim().is_empty() {
            return Err(Error::Config(
                "reclaimer.thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
