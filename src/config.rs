//! # Pool Configuration
//!
//! Explicit, validated configuration for the process pool. Values come from an
//! optional `config/taskpool` file (TOML/YAML/JSON, whatever the `config`
//! crate resolves) overlaid with `TASKPOOL_`-prefixed environment variables;
//! every field has an explicit default so a bare `PoolConfig::default()` is a
//! working development configuration.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PoolError, Result};

/// Name of the worker binary spawned for each pool slot when no explicit
/// command is configured. Resolved next to the current executable.
pub const DEFAULT_WORKER_BIN: &str = "taskpool-worker";

/// Configuration for a [`Dispatcher`](crate::pool::Dispatcher) instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker slots. Fixed for the dispatcher's lifetime; crash
    /// replacement preserves it.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Maximum number of jobs waiting in the FIFO backlog. Submits beyond
    /// this are rejected immediately with `BacklogFull`.
    #[serde(default = "default_backlog_capacity")]
    pub backlog_capacity: usize,

    /// Explicit worker command. When unset, the `taskpool-worker` binary
    /// sitting next to the current executable is used.
    #[serde(default)]
    pub worker_command: Option<PathBuf>,

    /// Extra arguments passed to the worker command.
    #[serde(default)]
    pub worker_args: Vec<String>,

    /// How long shutdown waits for in-flight jobs to settle before rejecting
    /// them with `ShutdownTimeout`.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// How long shutdown waits after the graceful stop signal before
    /// force-killing surviving worker processes.
    #[serde(default = "default_terminate_timeout_ms")]
    pub terminate_timeout_ms: u64,

    /// Consecutive crash-on-start failures tolerated per slot before the pool
    /// gives up and fails outstanding work.
    #[serde(default = "default_spawn_retry_limit")]
    pub spawn_retry_limit: u32,

    /// Delay between respawn attempts for a crashed slot.
    #[serde(default = "default_spawn_retry_delay_ms")]
    pub spawn_retry_delay_ms: u64,
}

fn default_pool_size() -> usize {
    4
}

fn default_backlog_capacity() -> usize {
    1024
}

fn default_drain_timeout_ms() -> u64 {
    5_000
}

fn default_terminate_timeout_ms() -> u64 {
    10_000
}

fn default_spawn_retry_limit() -> u32 {
    5
}

fn default_spawn_retry_delay_ms() -> u64 {
    100
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            backlog_capacity: default_backlog_capacity(),
            worker_command: None,
            worker_args: Vec::new(),
            drain_timeout_ms: default_drain_timeout_ms(),
            terminate_timeout_ms: default_terminate_timeout_ms(),
            spawn_retry_limit: default_spawn_retry_limit(),
            spawn_retry_delay_ms: default_spawn_retry_delay_ms(),
        }
    }
}

impl PoolConfig {
    /// Load configuration from `config/taskpool.*` (if present) overlaid with
    /// `TASKPOOL_`-prefixed environment variables, then validate.
    pub fn load() -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name("config/taskpool").required(false))
            .add_source(Environment::with_prefix("TASKPOOL").try_parsing(true))
            .build()
            .map_err(|e| PoolError::Configuration {
                message: e.to_string(),
            })?;

        let config: PoolConfig =
            settings
                .try_deserialize()
                .map_err(|e| PoolError::Configuration {
                    message: e.to_string(),
                })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an explicit file path, then validate.
    pub fn from_file(path: &Path) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from(path))
            .build()
            .map_err(|e| PoolError::Configuration {
                message: e.to_string(),
            })?;

        let config: PoolConfig =
            settings
                .try_deserialize()
                .map_err(|e| PoolError::Configuration {
                    message: e.to_string(),
                })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate operational boundaries. No silent fallbacks: a zero-sized
    /// pool or backlog is a configuration error, not a degraded mode.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(PoolError::Configuration {
                message: "pool_size must be at least 1".to_string(),
            });
        }
        if self.backlog_capacity == 0 {
            return Err(PoolError::Configuration {
                message: "backlog_capacity must be at least 1".to_string(),
            });
        }
        if self.drain_timeout_ms == 0 || self.terminate_timeout_ms == 0 {
            return Err(PoolError::Configuration {
                message: "drain_timeout_ms and terminate_timeout_ms must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Resolve the worker program to spawn for each slot.
    pub fn worker_program(&self) -> Result<PathBuf> {
        if let Some(command) = &self.worker_command {
            return Ok(command.clone());
        }
        let exe = std::env::current_exe()?;
        let dir = exe.parent().ok_or_else(|| PoolError::Configuration {
            message: "cannot resolve directory of current executable".to_string(),
        })?;
        Ok(dir.join(DEFAULT_WORKER_BIN))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }

    pub fn spawn_retry_delay(&self) -> Duration {
        Duration::from_millis(self.spawn_retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.backlog_capacity, 1024);
        assert_eq!(config.drain_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let config = PoolConfig {
            pool_size: 0,
            ..PoolConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pool_size"));
    }

    #[test]
    fn test_zero_backlog_rejected() {
        let config = PoolConfig {
            backlog_capacity: 0,
            ..PoolConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "pool_size = 2\nbacklog_capacity = 16").unwrap();

        let config = PoolConfig::from_file(file.path()).unwrap();
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.backlog_capacity, 16);
        // Unspecified fields fall back to defaults
        assert_eq!(config.spawn_retry_limit, 5);
    }

    #[test]
    fn test_explicit_worker_command_wins() {
        let config = PoolConfig {
            worker_command: Some(PathBuf::from("/opt/bin/custom-worker")),
            ..PoolConfig::default()
        };
        assert_eq!(
            config.worker_program().unwrap(),
            PathBuf::from("/opt/bin/custom-worker")
        );
    }
}
