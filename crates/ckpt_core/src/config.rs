//! Configuration for the checkpoint engine.

use crate::error::{CkptError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Engine configuration, read from `<git-dir>/ckpt/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Lock coordination.
    #[serde(default)]
    pub lock: LockConfig,

    /// Hook dispatch behavior.
    #[serde(default)]
    pub hooks: HookConfig,

    /// Default retention policy used by `clean` when no flags are given.
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl Config {
    /// Load configuration from the store root, falling back to defaults.
    pub fn load(store_root: &Path) -> Result<Self> {
        let path = store_root.join("config.toml");
        if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| CkptError::ConfigError(format!("failed to read config: {}", e)))?;
            toml::from_str(&content)
                .map_err(|e| CkptError::ConfigError(format!("failed to parse config: {}", e)))
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to the store root.
    pub fn save(&self, store_root: &Path) -> Result<()> {
        let path = store_root.join("config.toml");
        let content = toml::to_string_pretty(self)
            .map_err(|e| CkptError::ConfigError(format!("failed to serialize config: {}", e)))?;
        fs::write(&path, content)
            .map_err(|e| CkptError::ConfigError(format!("failed to write config: {}", e)))?;
        Ok(())
    }
}

/// Lock coordination settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Maximum time to wait for the lock in milliseconds (default: 5000).
    pub timeout_ms: u64,

    /// A lock file older than this is considered abandoned (default: 600).
    pub stale_after_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            stale_after_secs: 600,
        }
    }
}

impl LockConfig {
    /// Returns the wait timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Returns the stale threshold as a Duration.
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// Hook dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    /// Treat recorder failures as blocking for the triggering operation (default: false).
    pub fatal: bool,

    /// Tag HEAD when a session ends (default: true).
    pub tag_session_end: bool,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            fatal: false,
            tag_session_end: true,
        }
    }
}

/// Default retention settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetentionConfig {
    /// Delete checkpoints older than this many days.
    pub max_age_days: Option<u64>,

    /// Keep at most this many checkpoints per kind.
    pub max_count: Option<usize>,
}

impl RetentionConfig {
    /// Returns the max age as a Duration, if set.
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_days.map(|d| Duration::from_secs(d * 24 * 60 * 60))
    }
}
