// ABOUTME: Spawns and manages worker child processes for the supervisor.
// ABOUTME: Implements ProcessManager over tokio::process with stdin/stdout as the per-worker channel.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use warden_core::protocol::{decode_line, encode_line};
use warden_core::{
    Directive, ExitReason, ProcessManager, WardenError, WorkerConfig, WorkerEvent, WorkerId,
    WorkerMessage,
};

use crate::channel::CHANNEL_ENV;

/// Directives queued per worker before `send` starts failing
const DIRECTIVE_QUEUE: usize = 16;

/// How to launch one worker
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// `<this executable> worker --heartbeat-interval-ms N`
    pub fn current_exe(config: &WorkerConfig) -> Result<Self> {
        let program = std::env::current_exe().context("Failed to locate current executable")?;
        Ok(Self {
            program,
            args: vec![
                "worker".to_string(),
                "--heartbeat-interval-ms".to_string(),
                config.heartbeat_interval_ms.to_string(),
            ],
        })
    }
}

struct WorkerSlot {
    directives: mpsc::Sender<Directive>,
    observer: Option<mpsc::Sender<WorkerEvent>>,
    kill: Option<oneshot::Sender<()>>,
}

struct PoolInner {
    command: WorkerCommand,
    respawn: AtomicBool,
    slots: Mutex<HashMap<WorkerId, WorkerSlot>>,
    running: watch::Sender<usize>,
}

/// Pool of worker child processes. Clones share the pool.
#[derive(Clone)]
pub struct ChildPool {
    inner: Arc<PoolInner>,
}

impl ChildPool {
    pub fn new(command: WorkerCommand, respawn: bool) -> Self {
        let (running, _) = watch::channel(0);
        Self {
            inner: Arc::new(PoolInner {
                command,
                respawn: AtomicBool::new(respawn),
                slots: Mutex::new(HashMap::new()),
                running,
            }),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<WorkerId, WorkerSlot>> {
        match self.inner.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Number of children currently running
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn spawn_workers(&self, count: usize) -> Result<Vec<WorkerId>> {
        (0..count).map(|_| self.spawn_worker()).collect()
    }

    /// Launch one child and start its reader, stderr forwarder and waiter tasks.
    pub fn spawn_worker(&self) -> Result<WorkerId> {
        let command = &self.inner.command;
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .env(CHANNEL_ENV, "stdio")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn worker {}", command.program.display()))?;

        let id = WorkerId(
            child
                .id()
                .context("Worker exited before its pid could be read")?,
        );
        let stdin = child.stdin.take().context("Worker stdin not piped")?;
        let stdout = child.stdout.take().context("Worker stdout not piped")?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    eprintln!("[{}] {}", id, line);
                }
            });
        }

        let (directives_tx, directives_rx) = mpsc::channel(DIRECTIVE_QUEUE);
        tokio::spawn(write_directives(id, stdin, directives_rx));

        let (kill_tx, kill_rx) = oneshot::channel();
        {
            let mut slots = self.slots();
            slots.insert(
                id,
                WorkerSlot {
                    directives: directives_tx,
                    observer: None,
                    kill: Some(kill_tx),
                },
            );
            self.inner.running.send_replace(slots.len());
        }

        tokio::spawn(self.clone().read_messages(id, stdout));
        tokio::spawn(self.clone().wait_for_exit(id, child, kill_rx));

        tracing::info!(worker = %id, "spawned worker");
        Ok(id)
    }

    fn observer(&self, id: WorkerId) -> Option<mpsc::Sender<WorkerEvent>> {
        self.slots().get(&id).and_then(|slot| slot.observer.clone())
    }

    async fn read_messages(self, id: WorkerId, stdout: ChildStdout) {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match decode_line::<WorkerMessage>(&line) {
                Ok(WorkerMessage::Heartbeat { pid }) => {
                    if pid != id {
                        tracing::debug!(worker = %id, reported = %pid, "heartbeat pid differs from child pid");
                    }
                    // Heartbeats before registration have nobody to go to.
                    if let Some(observer) = self.observer(id) {
                        let _ = observer.send(WorkerEvent::Heartbeat { id }).await;
                    }
                }
                Err(e) => {
                    tracing::debug!(worker = %id, error = %e, line = %line, "ignoring non-protocol output");
                }
            }
        }
    }

    async fn wait_for_exit(self, id: WorkerId, mut child: Child, kill: oneshot::Receiver<()>) {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(worker = %id, error = %e, "failed to kill worker");
                }
                child.wait().await
            }
        };

        let slot = {
            let mut slots = self.slots();
            let slot = slots.remove(&id);
            self.inner.running.send_replace(slots.len());
            slot
        };

        let reason = match status {
            Ok(status) => ExitReason::from_status(status),
            Err(e) => {
                tracing::warn!(worker = %id, error = %e, "failed to wait on worker");
                ExitReason::Code(-1)
            }
        };
        tracing::debug!(worker = %id, %reason, "worker process ended");

        if let Some(observer) = slot.and_then(|s| s.observer) {
            let _ = observer.send(WorkerEvent::Exited { id, reason }).await;
        }

        if self.inner.respawn.load(Ordering::SeqCst) {
            match self.spawn_worker() {
                Ok(new_id) => tracing::info!(old = %id, new = %new_id, "respawned worker"),
                Err(e) => tracing::error!(worker = %id, error = %e, "failed to respawn worker"),
            }
        }
    }

    /// Resolve once no children are running
    pub async fn wait_until_empty(&self) {
        let mut running = self.inner.running.subscribe();
        let _ = running.wait_for(|n| *n == 0).await;
    }

    /// Ask every child to shut down, then kill whatever is left after `grace`.
    pub async fn terminate(&self, grace: Duration) {
        self.inner.respawn.store(false, Ordering::SeqCst);

        let ids: Vec<WorkerId> = self.slots().keys().copied().collect();
        for id in ids {
            if let Err(e) = self.send(id, Directive::Shutdown).await {
                tracing::debug!(worker = %id, error = %e, "shutdown not delivered");
            }
        }

        if tokio::time::timeout(grace, self.wait_until_empty())
            .await
            .is_ok()
        {
            return;
        }

        let kills: Vec<oneshot::Sender<()>> = self
            .slots()
            .values_mut()
            .filter_map(|slot| slot.kill.take())
            .collect();
        tracing::warn!(remaining = kills.len(), "killing workers that did not exit in time");
        for kill in kills {
            let _ = kill.send(());
        }
        self.wait_until_empty().await;
    }
}

#[async_trait]
impl ProcessManager for ChildPool {
    async fn workers(&self) -> Result<Vec<WorkerId>, WardenError> {
        let mut ids: Vec<WorkerId> = self.slots().keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn attach_observer(
        &self,
        id: WorkerId,
        observer: mpsc::Sender<WorkerEvent>,
    ) -> Result<(), WardenError> {
        let mut slots = self.slots();
        let slot = slots.get_mut(&id).ok_or_else(|| WardenError::Attach {
            id,
            reason: "no running worker with that pid".to_string(),
        })?;
        slot.observer = Some(observer);
        Ok(())
    }

    /// Queue a directive for the worker's stdin writer. Never waits on the pipe.
    async fn send(&self, id: WorkerId, directive: Directive) -> Result<(), WardenError> {
        let directives = self
            .slots()
            .get(&id)
            .map(|slot| slot.directives.clone())
            .ok_or(WardenError::WorkerNotFound(id))?;

        directives.try_send(directive).map_err(|e| WardenError::Send {
            id,
            reason: match e {
                TrySendError::Full(_) => "directive queue full, worker is not reading stdin",
                TrySendError::Closed(_) => "worker stdin closed",
            }
            .to_string(),
        })
    }
}

async fn write_directives(
    id: WorkerId,
    mut stdin: ChildStdin,
    mut directives: mpsc::Receiver<Directive>,
) {
    while let Some(directive) = directives.recv().await {
        let line = match encode_line(&directive) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(worker = %id, error = %e, "failed to encode directive");
                continue;
            }
        };
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            tracing::debug!(worker = %id, error = %e, "worker stdin closed");
            break;
        }
    }
}
