// ABOUTME: Stand-in task processing loop for worker processes.
// ABOUTME: Picks up jobs until the shutdown token fires, then drains whatever is in flight.

use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Polls for jobs on a fixed interval, keeping at most `max_in_flight` running.
#[derive(Debug, Clone)]
pub struct WorkLoop {
    pub poll_interval: Duration,
    pub job_duration: Duration,
    pub max_in_flight: usize,
}

impl Default for WorkLoop {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            job_duration: Duration::from_millis(500),
            max_in_flight: 4,
        }
    }
}

impl WorkLoop {
    /// Run until `shutdown` is cancelled. Returns how many jobs completed.
    pub async fn run(self, shutdown: CancellationToken) -> usize {
        let mut in_flight = JoinSet::new();
        let mut completed = 0usize;
        let mut next_job = 0u64;

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                    completed += record(done);
                }
                _ = ticker.tick() => {
                    if in_flight.len() < self.max_in_flight {
                        next_job += 1;
                        let job = next_job;
                        let duration = self.job_duration;
                        in_flight.spawn(async move {
                            tokio::time::sleep(duration).await;
                            job
                        });
                        tracing::debug!(job, in_flight = in_flight.len(), "picked up job");
                    }
                }
            }
        }

        tracing::info!(in_flight = in_flight.len(), "no longer accepting work, draining");
        while let Some(done) = in_flight.join_next().await {
            completed += record(done);
        }
        tracing::info!(completed, "work loop drained");
        completed
    }
}

fn record(done: Result<u64, tokio::task::JoinError>) -> usize {
    match done {
        Ok(job) => {
            tracing::debug!(job, "job finished");
            1
        }
        Err(e) => {
            tracing::warn!(error = %e, "job failed");
            0
        }
    }
}
