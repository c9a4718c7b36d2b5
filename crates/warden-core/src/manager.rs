// ABOUTME: Seams between the supervisor and the host process machinery.
// ABOUTME: ProcessManager enumerates/observes/messages workers; Diagnostics samples the process table.

use crate::error::WardenError;
use crate::protocol::{Directive, WorkerId};
use async_trait::async_trait;
use std::fmt;
use std::process::ExitStatus;
use std::sync::Arc;
use tokio::sync::mpsc;

/// How a worker process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Killed by a signal
    Signal(i32),
    /// Exited with a non-zero code
    Code(i32),
    /// Exited with code 0
    Clean,
}

impl ExitReason {
    pub fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitReason::Signal(signal);
            }
        }
        match status.code() {
            Some(0) => ExitReason::Clean,
            Some(code) => ExitReason::Code(code),
            None => ExitReason::Code(-1),
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Signal(signal) => write!(f, "killed by signal {}", signal),
            ExitReason::Code(code) => write!(f, "exited with error code {}", code),
            ExitReason::Clean => write!(f, "exited with success code"),
        }
    }
}

/// Lifecycle events forwarded from an observed worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Heartbeat { id: WorkerId },
    Exited { id: WorkerId, reason: ExitReason },
}

/// The host's process manager, as seen by the supervisor.
///
/// Every method concerns a single worker (or a read-only listing), so a
/// failure never has to abort work on the others.
#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// Currently running workers, in any order
    async fn workers(&self) -> Result<Vec<WorkerId>, WardenError>;

    /// Forward `id`'s heartbeats and exit to `observer`
    async fn attach_observer(
        &self,
        id: WorkerId,
        observer: mpsc::Sender<WorkerEvent>,
    ) -> Result<(), WardenError>;

    /// Deliver a directive to one worker
    async fn send(&self, id: WorkerId, directive: Directive) -> Result<(), WardenError>;
}

#[async_trait]
impl<T: ProcessManager + ?Sized> ProcessManager for Arc<T> {
    async fn workers(&self) -> Result<Vec<WorkerId>, WardenError> {
        (**self).workers().await
    }

    async fn attach_observer(
        &self,
        id: WorkerId,
        observer: mpsc::Sender<WorkerEvent>,
    ) -> Result<(), WardenError> {
        (**self).attach_observer(id, observer).await
    }

    async fn send(&self, id: WorkerId, directive: Directive) -> Result<(), WardenError> {
        (**self).send(id, directive).await
    }
}

/// Optional process-table sampler, used only for logging
#[async_trait]
pub trait Diagnostics: Send + Sync {
    async fn sample(&self) -> Result<Vec<String>, WardenError>;
}
