// ABOUTME: Heartbeat registry owned by a single supervisor.
// ABOUTME: Tracks registered workers, the live subset, and the one-shot readiness window.

use crate::protocol::WorkerId;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// Bookkeeping for one worker process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub registered_at: Instant,
    /// Most recent heartbeat; `None` until the first one arrives
    pub last_seen_at: Option<Instant>,
}

/// Registered and live workers plus the readiness window.
///
/// Invariants: every live id is registered, `last_seen_at` never moves
/// backwards, and `ready_at` is written at most once.
#[derive(Debug, Default)]
pub struct Registry {
    records: HashMap<WorkerId, WorkerRecord>,
    live: HashSet<WorkerId>,
    ready_at: Option<Instant>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a previously unseen worker. Returns false if it was already known.
    pub fn register(&mut self, id: WorkerId, now: Instant) -> bool {
        if self.records.contains_key(&id) {
            return false;
        }
        self.records.insert(
            id,
            WorkerRecord {
                id,
                registered_at: now,
                last_seen_at: None,
            },
        );
        true
    }

    /// Refresh `last_seen_at` and mark the worker live.
    ///
    /// Returns false (and changes nothing) for unregistered ids.
    pub fn record_heartbeat(&mut self, id: WorkerId, now: Instant) -> bool {
        let Some(record) = self.records.get_mut(&id) else {
            return false;
        };
        record.last_seen_at = Some(match record.last_seen_at {
            Some(prev) if prev > now => prev,
            _ => now,
        });
        self.live.insert(id);
        true
    }

    pub fn record(&self, id: WorkerId) -> Option<&WorkerRecord> {
        self.records.get(&id)
    }

    pub fn is_registered(&self, id: WorkerId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn is_live(&self, id: WorkerId) -> bool {
        self.live.contains(&id)
    }

    pub fn registered_count(&self) -> usize {
        self.records.len()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Registered ids in ascending order
    pub fn registered_ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self.records.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn ready_at(&self) -> Option<Instant> {
        self.ready_at
    }

    /// Arm the readiness window once more than `threshold` workers are registered.
    ///
    /// Returns the new window only on the call that sets it.
    pub fn arm_readiness(
        &mut self,
        now: Instant,
        threshold: usize,
        startup_time: Duration,
    ) -> Option<Instant> {
        if self.ready_at.is_some() || self.records.len() <= threshold {
            return None;
        }
        let ready_at = now + startup_time;
        self.ready_at = Some(ready_at);
        Some(ready_at)
    }

    /// Whether the readiness window is set and `now` is past it
    pub fn is_warm(&self, now: Instant) -> bool {
        matches!(self.ready_at, Some(ready_at) if now > ready_at)
    }

    /// Drop live workers silent for longer than `threshold`.
    ///
    /// Records stay registered, so a later heartbeat makes them live again.
    pub fn evict_unresponsive(&mut self, now: Instant, threshold: Duration) -> Vec<WorkerId> {
        let records = &self.records;
        let mut evicted: Vec<WorkerId> = self
            .live
            .iter()
            .copied()
            .filter(|id| {
                records
                    .get(id)
                    .and_then(|r| r.last_seen_at)
                    .map(|seen| now.saturating_duration_since(seen) > threshold)
                    .unwrap_or(true)
            })
            .collect();
        evicted.sort_unstable();

        for id in &evicted {
            self.live.remove(id);
        }
        evicted
    }
}
