// ABOUTME: Worker-side monitor: periodic heartbeats to the parent and the shutdown directive handler.
// ABOUTME: Both run as cancellable tasks alongside the worker's own task processing.

use crate::config::WorkerConfig;
use crate::error::{ConfigError, WardenError};
use crate::health::HealthCheck;
use crate::protocol::{Directive, WorkerId, WorkerMessage};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use warden_log::SampledLog;

const HEARTBEAT_LOG_EVERY: u64 = 100;

/// Upward channel from a worker to the supervisor that spawned it
#[async_trait]
pub trait ParentChannel: Send + Sync {
    /// False when the process was not spawned by a supervisor
    fn is_available(&self) -> bool;

    async fn send(&self, message: &WorkerMessage) -> Result<(), WardenError>;
}

/// Heartbeat emitter plus directive listener for one worker process
pub struct WorkerMonitor<C: ?Sized> {
    channel: Arc<C>,
    pid: WorkerId,
    config: WorkerConfig,
    health: HealthCheck,
    shutdown: CancellationToken,
}

impl<C: ParentChannel + ?Sized + 'static> WorkerMonitor<C> {
    /// `shutdown` is cancelled when the supervisor asks this worker to stop.
    pub fn new(
        channel: Arc<C>,
        config: WorkerConfig,
        health: HealthCheck,
        shutdown: CancellationToken,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        tracing::info!(heartbeat_interval_ms = config.heartbeat_interval_ms, "worker config");
        Ok(Self {
            channel,
            pid: WorkerId::current(),
            config,
            health,
            shutdown,
        })
    }

    /// Report heartbeats under a different identity
    pub fn with_pid(mut self, pid: WorkerId) -> Self {
        self.pid = pid;
        self
    }

    /// Start emitting heartbeats and listening for directives.
    pub fn start(self, directives: mpsc::Receiver<Directive>) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let span = tracing::info_span!("worker", role = "worker", pid = %self.pid);

        let emitter = tokio::spawn(
            emit_heartbeats(
                self.channel,
                self.pid,
                self.config.heartbeat_interval(),
                cancel.child_token(),
            )
            .instrument(span.clone()),
        );
        let listener = tokio::spawn(
            listen_for_directives(directives, self.health, self.shutdown, cancel.clone())
                .instrument(span),
        );

        MonitorHandle {
            cancel,
            emitter,
            listener,
        }
    }
}

async fn emit_heartbeats<C: ParentChannel + ?Sized>(
    channel: Arc<C>,
    pid: WorkerId,
    period: Duration,
    cancel: CancellationToken,
) {
    let sampler = SampledLog::new(HEARTBEAT_LOG_EVERY);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if !channel.is_available() {
            tracing::error!("parent channel unavailable in worker, stopping heartbeats");
            cancel.cancel();
            break;
        }
        if let Err(e) = channel.send(&WorkerMessage::Heartbeat { pid }).await {
            tracing::error!(error = %e, "failed to send heartbeat, stopping heartbeats");
            cancel.cancel();
            break;
        }
        warden_log::info_sampled!(sampler, "heartbeat", "sending I'm alive");
    }
    tracing::debug!("heartbeat emitter stopped");
}

async fn listen_for_directives(
    mut directives: mpsc::Receiver<Directive>,
    health: HealthCheck,
    shutdown: CancellationToken,
    cancel: CancellationToken,
) {
    let directive = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        directive = directives.recv() => directive,
    };

    match directive {
        Some(Directive::Shutdown) => {
            tracing::warn!("shutdown received, stopping health check");
        }
        None => {
            tracing::warn!("parent channel closed, shutting down");
        }
    }
    health.stop();
    cancel.cancel();
    shutdown.cancel();
}

/// Handle to a running worker monitor
pub struct MonitorHandle {
    cancel: CancellationToken,
    emitter: JoinHandle<()>,
    listener: JoinHandle<()>,
}

impl MonitorHandle {
    /// Whether heartbeats are still being emitted
    pub fn is_emitting(&self) -> bool {
        !self.emitter.is_finished()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel the heartbeat timer and the listener, then wait for both.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.emitter.await;
        let _ = self.listener.await;
    }
}
