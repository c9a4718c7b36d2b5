// ABOUTME: Configuration for the warden supervisor, its workers and the child pool.
// ABOUTME: Loaded from TOML with serde defaults and validated before any loop starts.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Liveness policy for the supervisor control loop.
///
/// The four policy fields act together: an unresponsive threshold shorter
/// than the poll interval evicts healthy workers, and a zero startup time
/// enforces liveness as soon as the pool first exceeds the worker threshold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Period between control-loop ticks
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Grace period after the threshold is first crossed
    #[serde(default = "default_worker_startup_time_ms")]
    pub worker_startup_time_ms: u64,

    /// Silence after which a worker stops counting as live
    #[serde(default = "default_worker_unresponsive_threshold_ms")]
    pub worker_unresponsive_threshold_ms: u64,

    /// Minimum healthy worker count, and the crossing point that arms readiness
    #[serde(default = "default_number_of_workers_threshold")]
    pub number_of_workers_threshold: usize,

    /// Log the OS process table on every tick
    #[serde(default)]
    pub diagnostics: bool,
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_worker_startup_time_ms() -> u64 {
    10_000
}

fn default_worker_unresponsive_threshold_ms() -> u64 {
    5_000
}

fn default_number_of_workers_threshold() -> usize {
    3
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            worker_startup_time_ms: default_worker_startup_time_ms(),
            worker_unresponsive_threshold_ms: default_worker_unresponsive_threshold_ms(),
            number_of_workers_threshold: default_number_of_workers_threshold(),
            diagnostics: false,
        }
    }
}

impl SupervisorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn worker_startup_time(&self) -> Duration {
        Duration::from_millis(self.worker_startup_time_ms)
    }

    pub fn worker_unresponsive_threshold(&self) -> Duration {
        Duration::from_millis(self.worker_unresponsive_threshold_ms)
    }

    /// Reject non-positive intervals and thresholds.
    ///
    /// `worker_startup_time_ms = 0` is allowed and disables the grace period.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("poll_interval_ms", self.poll_interval_ms)?;
        positive(
            "worker_unresponsive_threshold_ms",
            self.worker_unresponsive_threshold_ms,
        )?;
        positive(
            "number_of_workers_threshold",
            self.number_of_workers_threshold as u64,
        )?;

        if self.worker_unresponsive_threshold_ms < self.poll_interval_ms {
            tracing::warn!(
                unresponsive_ms = self.worker_unresponsive_threshold_ms,
                poll_ms = self.poll_interval_ms,
                "unresponsive threshold is shorter than the poll interval, expect false evictions"
            );
        }
        Ok(())
    }
}

/// Worker-side heartbeat settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Period between heartbeats; independent of the supervisor poll interval
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

fn default_heartbeat_interval_ms() -> u64 {
    500
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("heartbeat_interval_ms", self.heartbeat_interval_ms)
    }
}

/// Child pool settings used by the supervisor binary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker processes to keep running
    #[serde(default = "default_pool_size")]
    pub size: usize,

    /// Spawn a replacement when a worker exits
    #[serde(default = "default_respawn")]
    pub respawn: bool,
}

fn default_pool_size() -> usize {
    4
}

fn default_respawn() -> bool {
    true
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            respawn: default_respawn(),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("size", self.size as u64)
    }
}

/// Top-level `warden.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub pool: PoolConfig,
}

impl Config {
    /// Load and validate config from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Get the default config file path (~/.config/warden/warden.toml)
    pub fn default_path() -> PathBuf {
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("."))
            })
            .join("warden")
            .join("warden.toml")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.supervisor.validate()?;
        self.worker.validate()?;
        self.pool.validate()?;

        if self.pool.size <= self.supervisor.number_of_workers_threshold {
            tracing::warn!(
                size = self.pool.size,
                threshold = self.supervisor.number_of_workers_threshold,
                "pool size does not exceed the worker threshold, liveness will never be enforced"
            );
        }
        Ok(())
    }
}

fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            field,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}
