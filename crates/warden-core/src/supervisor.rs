// ABOUTME: Supervisor control loop: register, arm readiness, evict silent workers, broadcast shutdown.
// ABOUTME: Owns the registry exclusively; heartbeats are applied between ticks, never during one.

use crate::config::SupervisorConfig;
use crate::error::ConfigError;
use crate::manager::{Diagnostics, ExitReason, ProcessManager, WorkerEvent};
use crate::protocol::{Directive, WorkerId};
use crate::registry::Registry;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use warden_log::SampledLog;

const EVENT_BUFFER: usize = 1024;
const HEARTBEAT_LOG_EVERY: u64 = 100;

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Workers registered this tick
    pub registered: Vec<WorkerId>,
    /// Registered workers observed again after exiting and coming back under the same id
    pub reattached: Vec<WorkerId>,
    /// Set only on the tick that armed the readiness window
    pub ready_at_armed: Option<Instant>,
    /// Whether liveness was enforced this tick
    pub warm: bool,
    pub evicted: Vec<WorkerId>,
    pub shutdown_sent: Vec<WorkerId>,
    pub send_failures: Vec<WorkerId>,
    /// Live worker count at the end of the tick
    pub live: usize,
}

pub struct Supervisor<P> {
    config: SupervisorConfig,
    manager: P,
    registry: Registry,
    /// Workers whose manager currently forwards events to us
    observed: HashSet<WorkerId>,
    events_tx: mpsc::Sender<WorkerEvent>,
    events_rx: mpsc::Receiver<WorkerEvent>,
    diagnostics: Option<Arc<dyn Diagnostics>>,
    sampler: SampledLog,
}

impl<P: ProcessManager> Supervisor<P> {
    /// Validate the policy and build an idle supervisor.
    pub fn new(config: SupervisorConfig, manager: P) -> Result<Self, ConfigError> {
        config.validate()?;
        tracing::info!(
            poll_interval_ms = config.poll_interval_ms,
            worker_startup_time_ms = config.worker_startup_time_ms,
            worker_unresponsive_threshold_ms = config.worker_unresponsive_threshold_ms,
            number_of_workers_threshold = config.number_of_workers_threshold,
            "supervisor config"
        );
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        Ok(Self {
            config,
            manager,
            registry: Registry::new(),
            observed: HashSet::new(),
            events_tx,
            events_rx,
            diagnostics: None,
            sampler: SampledLog::new(HEARTBEAT_LOG_EVERY),
        })
    }

    /// Sample the process table after every tick
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn manager(&self) -> &P {
        &self.manager
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Run the four control steps once, in order, as of `now`.
    pub async fn tick(&mut self, now: Instant) -> TickReport {
        let mut report = TickReport::default();

        self.register_new_workers(now, &mut report).await;
        self.maybe_arm_readiness(now, &mut report);
        self.evict_unresponsive(now, &mut report);
        self.maybe_broadcast_shutdown(now, &mut report).await;

        report.warm = self.registry.is_warm(now);
        report.live = self.registry.live_count();
        self.sample_diagnostics();
        report
    }

    async fn register_new_workers(&mut self, now: Instant, report: &mut TickReport) {
        let workers = match self.manager.workers().await {
            Ok(workers) => workers,
            Err(e) => {
                tracing::warn!(error = %e, "failed to enumerate workers, skipping registration");
                return;
            }
        };

        for id in workers {
            if self.observed.contains(&id) {
                continue;
            }
            // Unobserved workers stay unregistered so the next scan retries them.
            if let Err(e) = self
                .manager
                .attach_observer(id, self.events_tx.clone())
                .await
            {
                tracing::warn!(worker = %id, error = %e, "failed to observe worker");
                continue;
            }
            self.observed.insert(id);

            if self.registry.is_registered(id) {
                tracing::info!(worker = %id, "observing a respawned worker again");
                report.reattached.push(id);
            } else {
                tracing::info!(worker = %id, "registering a new worker");
                self.registry.register(id, now);
                report.registered.push(id);
            }
        }
    }

    fn maybe_arm_readiness(&mut self, now: Instant, report: &mut TickReport) {
        if let Some(ready_at) = self.registry.ready_at() {
            tracing::debug!(
                ready_in_ms = ready_at.saturating_duration_since(now).as_millis() as u64,
                "readiness window already set"
            );
            return;
        }

        match self.registry.arm_readiness(
            now,
            self.config.number_of_workers_threshold,
            self.config.worker_startup_time(),
        ) {
            Some(ready_at) => {
                tracing::info!(
                    registered = self.registry.registered_count(),
                    grace_ms = self.config.worker_startup_time_ms,
                    "worker threshold crossed, enforcing liveness after grace period"
                );
                report.ready_at_armed = Some(ready_at);
            }
            None => {
                tracing::info!(
                    registered = self.registry.registered_count(),
                    threshold = self.config.number_of_workers_threshold,
                    "not enough workers"
                );
            }
        }
    }

    fn evict_unresponsive(&mut self, now: Instant, report: &mut TickReport) {
        if !self.registry.is_warm(now) {
            tracing::debug!("workers are not ready yet, skipping eviction");
            return;
        }

        let evicted = self
            .registry
            .evict_unresponsive(now, self.config.worker_unresponsive_threshold());
        for id in &evicted {
            tracing::info!(worker = %id, "removed unresponsive worker from live workers");
        }
        report.evicted = evicted;
    }

    async fn maybe_broadcast_shutdown(&mut self, now: Instant, report: &mut TickReport) {
        let live = self.registry.live_count();
        let warm = self.registry.is_warm(now);
        let threshold = self.config.number_of_workers_threshold;

        if !warm || live >= threshold {
            tracing::debug!(warm, live, "not sending shutdown signal");
            return;
        }

        tracing::warn!(live, threshold, "live workers below threshold, sending shutdown to all workers");
        for id in self.registry.registered_ids() {
            match self.manager.send(id, Directive::Shutdown).await {
                Ok(()) => report.shutdown_sent.push(id),
                Err(e) => {
                    tracing::warn!(worker = %id, error = %e, "failed to send shutdown");
                    report.send_failures.push(id);
                }
            }
        }
    }

    fn sample_diagnostics(&self) {
        let Some(diagnostics) = self.diagnostics.clone() else {
            return;
        };
        tokio::spawn(async move {
            match diagnostics.sample().await {
                Ok(lines) => {
                    for line in lines {
                        tracing::debug!(process = %line, "running process found");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "process sampling failed"),
            }
        });
    }

    /// Apply one observed worker event.
    pub fn handle_event(&mut self, event: WorkerEvent, now: Instant) {
        match event {
            WorkerEvent::Heartbeat { id } => {
                if self.registry.record_heartbeat(id, now) {
                    warden_log::info_sampled!(
                        self.sampler,
                        &format!("heartbeat:{id}"),
                        worker = %id,
                        "received heartbeat, marking as live"
                    );
                } else {
                    tracing::debug!(worker = %id, "ignoring heartbeat from unregistered worker");
                }
            }
            WorkerEvent::Exited { id, reason } => {
                match reason {
                    ExitReason::Signal(signal) => {
                        tracing::warn!(worker = %id, signal, "worker was killed by signal")
                    }
                    ExitReason::Code(code) => {
                        tracing::warn!(worker = %id, code, "worker exited with error code")
                    }
                    ExitReason::Clean => {
                        tracing::warn!(worker = %id, "worker exited with success code")
                    }
                }
                self.observed.remove(&id);
                self.sampler.forget(&format!("heartbeat:{id}"));
            }
        }
    }

    /// Apply every event already queued, returning how many were applied.
    pub fn drain_events(&mut self, now: Instant) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event, now);
            applied += 1;
        }
        applied
    }

    /// Apply events already queued, then tick, so silence is judged on every heartbeat received.
    async fn tick_with_pending_events(&mut self, now: Instant) -> TickReport {
        self.drain_events(now);
        self.tick(now).await
    }

    /// Tick every poll interval until `cancel` fires, then hand the supervisor back.
    ///
    /// A slow tick delays the next one; ticks never overlap.
    pub async fn run(mut self, cancel: CancellationToken) -> Self {
        let period = self.config.poll_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("supervisor started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.tick_with_pending_events(Instant::now()).await;
                    tracing::debug!(
                        registered = self.registry.registered_count(),
                        live = report.live,
                        warm = report.warm,
                        evicted = report.evicted.len(),
                        shutdown_sent = report.shutdown_sent.len(),
                        "tick complete"
                    );
                }
                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event, Instant::now());
                }
            }
        }
        tracing::info!("supervisor stopped");
        self
    }
}

impl<P: ProcessManager + 'static> Supervisor<P> {
    /// Spawn the control loop on the current runtime.
    pub fn start(self) -> SupervisorHandle<P> {
        let cancel = CancellationToken::new();
        let span = tracing::info_span!("supervisor", role = "supervisor");
        let task = tokio::spawn(self.run(cancel.clone()).instrument(span));
        SupervisorHandle { cancel, task }
    }
}

/// Handle to a running supervisor loop
pub struct SupervisorHandle<P> {
    cancel: CancellationToken,
    task: JoinHandle<Supervisor<P>>,
}

impl<P> SupervisorHandle<P> {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the tick timer and wait for the loop to hand the supervisor back.
    pub async fn stop(self) -> Result<Supervisor<P>, JoinError> {
        self.cancel.cancel();
        self.task.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProcessManager;
    use std::time::Duration;

    fn config(threshold: usize, startup_ms: u64, unresponsive_ms: u64) -> SupervisorConfig {
        SupervisorConfig {
            poll_interval_ms: 10,
            worker_startup_time_ms: startup_ms,
            worker_unresponsive_threshold_ms: unresponsive_ms,
            number_of_workers_threshold: threshold,
            diagnostics: false,
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = Supervisor::new(config(0, 0, 100), MockProcessManager::new());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_tick_registers_new_workers_once() {
        let manager = MockProcessManager::with_workers([1, 2]);
        let mut sup = Supervisor::new(config(5, 0, 100), manager.clone()).unwrap();
        let t0 = Instant::now();

        let report = sup.tick(t0).await;
        assert_eq!(report.registered, vec![WorkerId(1), WorkerId(2)]);

        manager.spawn(WorkerId(3));
        let report = sup.tick(t0 + ms(10)).await;
        assert_eq!(report.registered, vec![WorkerId(3)]);
        assert_eq!(sup.registry().registered_count(), 3);
    }

    #[tokio::test]
    async fn test_enumeration_failure_does_not_abort_tick() {
        let manager = MockProcessManager::with_workers([1, 2]);
        let mut sup = Supervisor::new(config(1, 0, 100), manager.clone()).unwrap();
        let t0 = Instant::now();
        sup.tick(t0).await;
        manager.heartbeat(WorkerId(1));
        sup.drain_events(t0);

        manager.set_fail_enumerate(true);
        let report = sup.tick(t0 + ms(500)).await;
        assert!(report.registered.is_empty());
        assert_eq!(report.evicted, vec![WorkerId(1)]);
        assert_eq!(report.shutdown_sent, vec![WorkerId(1), WorkerId(2)]);
    }

    #[tokio::test]
    async fn test_attach_failure_retried_next_tick() {
        let manager = MockProcessManager::with_workers([1]);
        manager.fail_attach_to(WorkerId(1), true);
        let mut sup = Supervisor::new(config(5, 0, 100), manager.clone()).unwrap();
        let t0 = Instant::now();

        let report = sup.tick(t0).await;
        assert!(report.registered.is_empty());
        assert!(!sup.registry().is_registered(WorkerId(1)));

        manager.fail_attach_to(WorkerId(1), false);
        let report = sup.tick(t0 + ms(10)).await;
        assert_eq!(report.registered, vec![WorkerId(1)]);
    }

    #[tokio::test]
    async fn test_exit_event_keeps_worker_registered() {
        let manager = MockProcessManager::with_workers([1]);
        let mut sup = Supervisor::new(config(5, 0, 100), manager.clone()).unwrap();
        let t0 = Instant::now();
        sup.tick(t0).await;
        manager.heartbeat(WorkerId(1));
        manager.exit(WorkerId(1), ExitReason::Signal(9));
        assert_eq!(sup.drain_events(t0), 2);

        assert!(sup.registry().is_registered(WorkerId(1)));
        assert!(sup.registry().is_live(WorkerId(1)));
    }

    #[tokio::test]
    async fn test_reused_id_is_observed_again_after_exit() {
        let manager = MockProcessManager::with_workers([1]);
        let mut sup = Supervisor::new(config(5, 0, 100), manager.clone()).unwrap();
        let t0 = Instant::now();
        sup.tick(t0).await;

        manager.exit(WorkerId(1), ExitReason::Code(1));
        sup.drain_events(t0 + ms(5));
        manager.spawn(WorkerId(1));

        let report = sup.tick(t0 + ms(10)).await;
        assert!(report.registered.is_empty());
        assert_eq!(report.reattached, vec![WorkerId(1)]);
        assert_eq!(sup.registry().record(WorkerId(1)).unwrap().registered_at, t0);
        assert!(manager.heartbeat(WorkerId(1)));

        // Still observed, so later scans leave it alone.
        let report = sup.tick(t0 + ms(20)).await;
        assert!(report.reattached.is_empty());
    }

    #[tokio::test]
    async fn test_timed_tick_applies_queued_heartbeats_first() {
        let manager = MockProcessManager::with_workers([1, 2]);
        let mut sup = Supervisor::new(config(1, 0, 100), manager.clone()).unwrap();
        let t0 = Instant::now();
        sup.tick(t0).await;
        manager.heartbeat(WorkerId(1));
        manager.heartbeat(WorkerId(2));
        sup.drain_events(t0);

        // Both heartbeats are waiting in the queue when the tick comes due.
        manager.heartbeat(WorkerId(1));
        manager.heartbeat(WorkerId(2));
        let report = sup.tick_with_pending_events(t0 + ms(150)).await;
        assert!(report.evicted.is_empty());
        assert!(report.shutdown_sent.is_empty());
        assert_eq!(report.live, 2);
    }

    #[tokio::test]
    async fn test_send_failure_isolated_to_one_worker() {
        let manager = MockProcessManager::with_workers([1, 2, 3]);
        manager.fail_send_to(WorkerId(2), true);
        let mut sup = Supervisor::new(config(2, 0, 100), manager.clone()).unwrap();
        let t0 = Instant::now();

        let report = sup.tick(t0).await;
        assert!(report.ready_at_armed.is_some());
        assert!(report.shutdown_sent.is_empty());

        let report = sup.tick(t0 + ms(10)).await;
        assert_eq!(report.shutdown_sent, vec![WorkerId(1), WorkerId(3)]);
        assert_eq!(report.send_failures, vec![WorkerId(2)]);
    }

    #[tokio::test]
    async fn test_start_and_stop_returns_supervisor() {
        let manager = MockProcessManager::with_workers([1, 2]);
        let sup = Supervisor::new(config(5, 0, 100), manager.clone()).unwrap();
        let handle = sup.start();

        tokio::time::sleep(ms(50)).await;
        manager.heartbeat(WorkerId(1));
        tokio::time::sleep(ms(30)).await;

        let sup = handle.stop().await.unwrap();
        assert_eq!(sup.registry().registered_count(), 2);
        assert!(sup.registry().is_live(WorkerId(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_future_ticks() {
        let manager = MockProcessManager::with_workers([1]);
        let sup = Supervisor::new(config(5, 0, 100), manager.clone()).unwrap();
        let handle = sup.start();
        let sup = handle.stop().await.unwrap();
        assert_eq!(sup.registry().registered_count(), 0);

        tokio::time::sleep(ms(100)).await;
        assert_eq!(manager.enumerations(), 0);
    }

    #[tokio::test]
    async fn test_diagnostics_failure_is_ignored() {
        struct Broken;

        #[async_trait::async_trait]
        impl Diagnostics for Broken {
            async fn sample(&self) -> Result<Vec<String>, crate::WardenError> {
                Err(crate::WardenError::Diagnostics("ps missing".into()))
            }
        }

        let manager = MockProcessManager::with_workers([1, 2]);
        let mut sup = Supervisor::new(config(1, 0, 100), manager.clone())
            .unwrap()
            .with_diagnostics(Arc::new(Broken));
        let t0 = Instant::now();
        sup.tick(t0).await;
        manager.heartbeat(WorkerId(1));
        manager.heartbeat(WorkerId(2));
        sup.drain_events(t0);

        let report = sup.tick(t0 + ms(10)).await;
        assert!(report.warm);
        assert!(report.shutdown_sent.is_empty());
        tokio::task::yield_now().await;
    }
}
