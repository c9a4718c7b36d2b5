// ABOUTME: Wire protocol between the supervisor and its worker children.
// ABOUTME: Newline-delimited JSON: heartbeats go up on stdout, directives come down on stdin.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a worker process (its OS pid).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u32);

impl WorkerId {
    /// Identifier of the calling process.
    pub fn current() -> Self {
        Self(std::process::id())
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for WorkerId {
    fn from(pid: u32) -> Self {
        Self(pid)
    }
}

/// Messages a worker sends up to its supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    /// "I'm alive". Only the sender identity is used.
    Heartbeat { pid: WorkerId },
}

/// Messages the supervisor sends down to workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Directive {
    /// Stop accepting work and exit once in-flight work drains.
    Shutdown,
}

/// Serialize a message as one protocol line (with trailing newline).
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    Ok(serde_json::to_string(message)? + "\n")
}

/// Parse one protocol line. Surrounding whitespace is ignored.
pub fn decode_line<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line.trim())
}
