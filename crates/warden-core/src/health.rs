// ABOUTME: Worker-local health flag and its periodic self-check loop.
// ABOUTME: Stopping it marks the worker unhealthy so external probes start draining it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shared health state for one worker process. Clones share state.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    healthy: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthCheck {
    pub fn new() -> Self {
        Self {
            healthy: Arc::new(AtomicBool::new(true)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run the self-check every `period` until stopped.
    pub fn spawn(&self, period: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    biased;
                    _ = this.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        tracing::trace!(healthy = this.is_healthy(), "self health check");
                    }
                }
            }
        })
    }

    /// Mark unhealthy and end the self-check loop. Idempotent.
    pub fn stop(&self) {
        if self.healthy.swap(false, Ordering::SeqCst) {
            tracing::info!("health check stopped");
        }
        self.cancel.cancel();
    }
}
