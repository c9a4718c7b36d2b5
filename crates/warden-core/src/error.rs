// ABOUTME: Error types for warden-core
// ABOUTME: Config errors are fatal at startup; everything else is scoped to one worker

use crate::protocol::WorkerId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config from {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to write config to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors from talking to workers or to the parent process
#[derive(Debug, Error)]
pub enum WardenError {
    #[error("Worker not found: {0}")]
    WorkerNotFound(WorkerId),

    #[error("Failed to attach observer to worker {id}: {reason}")]
    Attach { id: WorkerId, reason: String },

    #[error("Failed to send to worker {id}: {reason}")]
    Send { id: WorkerId, reason: String },

    #[error("Parent channel unavailable")]
    ChannelUnavailable,

    #[error("Diagnostics failed: {0}")]
    Diagnostics(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
