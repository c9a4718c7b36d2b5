// ABOUTME: Integration tests for the supervisor's liveness policy.
// ABOUTME: Drives ticks at explicit instants against an in-memory process manager.

use std::time::Duration;
use tokio::time::Instant;
use warden_core::testing::MockProcessManager;
use warden_core::{Directive, ExitReason, Supervisor, SupervisorConfig, WorkerId};

const A: WorkerId = WorkerId(101);
const B: WorkerId = WorkerId(102);
const C: WorkerId = WorkerId(103);
const D: WorkerId = WorkerId(104);

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn policy(threshold: usize, startup_ms: u64, unresponsive_ms: u64) -> SupervisorConfig {
    SupervisorConfig {
        poll_interval_ms: 50,
        worker_startup_time_ms: startup_ms,
        worker_unresponsive_threshold_ms: unresponsive_ms,
        number_of_workers_threshold: threshold,
        diagnostics: false,
    }
}

fn beat(sup: &mut Supervisor<MockProcessManager>, ids: &[WorkerId], now: Instant) {
    for id in ids {
        assert!(sup.manager().heartbeat(*id), "worker {id} is not observed");
    }
    sup.drain_events(now);
}

#[tokio::test]
async fn test_scenario_one_silent_worker_then_two() {
    let manager = MockProcessManager::with_workers([101, 102, 103, 104]);
    let mut sup = Supervisor::new(policy(3, 0, 100), manager.clone()).unwrap();
    let t0 = Instant::now();

    // Four registered workers exceed the threshold of three.
    let report = sup.tick(t0).await;
    assert_eq!(report.registered, vec![A, B, C, D]);
    assert_eq!(report.ready_at_armed, Some(t0));
    beat(&mut sup, &[A, B, C, D], t0);

    let report = sup.tick(t0 + ms(50)).await;
    assert!(report.warm);
    assert!(report.evicted.is_empty());
    assert_eq!(report.live, 4);

    // D goes silent past the threshold.
    beat(&mut sup, &[A, B, C], t0 + ms(150));
    let report = sup.tick(t0 + ms(150)).await;
    assert_eq!(report.evicted, vec![D]);
    assert_eq!(report.live, 3);
    assert!(report.shutdown_sent.is_empty());
    assert!(manager.sent().is_empty());

    // C goes silent too.
    beat(&mut sup, &[A, B], t0 + ms(250));
    let report = sup.tick(t0 + ms(250)).await;
    assert!(report.evicted.is_empty());
    assert!(report.shutdown_sent.is_empty());

    beat(&mut sup, &[A, B], t0 + ms(300));
    let report = sup.tick(t0 + ms(300)).await;
    assert_eq!(report.evicted, vec![C]);
    assert_eq!(report.live, 2);
    assert_eq!(report.shutdown_sent, vec![A, B, C, D]);
    for id in [A, B, C, D] {
        assert_eq!(manager.shutdowns_to(id), 1);
    }
}

#[tokio::test]
async fn test_scenario_pool_never_reaches_threshold() {
    let manager = MockProcessManager::with_workers([101]);
    let mut sup = Supervisor::new(policy(2, 0, 10), manager.clone()).unwrap();
    let t0 = Instant::now();

    sup.tick(t0).await;
    beat(&mut sup, &[A], t0);

    for step in 1..=200 {
        let report = sup.tick(t0 + ms(step * 50)).await;
        assert!(!report.warm);
        assert!(report.evicted.is_empty());
        assert!(report.shutdown_sent.is_empty());
    }
    assert_eq!(sup.registry().ready_at(), None);
    assert!(sup.registry().is_live(A));
    assert!(manager.sent().is_empty());
}

#[tokio::test]
async fn test_last_seen_tracks_most_recent_heartbeat() {
    let manager = MockProcessManager::with_workers([101]);
    let mut sup = Supervisor::new(policy(5, 0, 100), manager.clone()).unwrap();
    let t0 = Instant::now();
    sup.tick(t0).await;

    for offset in [5, 17, 18, 240, 241] {
        beat(&mut sup, &[A], t0 + ms(offset));
        assert_eq!(
            sup.registry().record(A).unwrap().last_seen_at,
            Some(t0 + ms(offset))
        );
    }

    // An event applied with an older instant never rewinds the record.
    beat(&mut sup, &[A], t0 + ms(100));
    assert_eq!(
        sup.registry().record(A).unwrap().last_seen_at,
        Some(t0 + ms(241))
    );
}

#[tokio::test]
async fn test_readiness_window_is_immutable() {
    let manager = MockProcessManager::with_workers([101, 102, 103]);
    let mut sup = Supervisor::new(policy(2, 1_000, 100), manager.clone()).unwrap();
    let t0 = Instant::now();

    let report = sup.tick(t0).await;
    assert_eq!(report.ready_at_armed, Some(t0 + ms(1_000)));

    manager.exit(B, ExitReason::Signal(9));
    manager.exit(C, ExitReason::Code(1));
    sup.drain_events(t0 + ms(10));
    manager.spawn(D);

    for step in 1..=40 {
        let report = sup.tick(t0 + ms(step * 50)).await;
        assert_eq!(report.ready_at_armed, None);
        assert_eq!(sup.registry().ready_at(), Some(t0 + ms(1_000)));
    }
}

#[tokio::test]
async fn test_nothing_enforced_before_window_elapses() {
    let manager = MockProcessManager::with_workers([101, 102, 103, 104]);
    let mut sup = Supervisor::new(policy(3, 1_000, 10), manager.clone()).unwrap();
    let t0 = Instant::now();

    sup.tick(t0).await;
    beat(&mut sup, &[A, B, C, D], t0);

    // Everyone is silent far past the unresponsive threshold, but the pool is not warm.
    for step in 1..=20 {
        let report = sup.tick(t0 + ms(step * 50)).await;
        assert!(!report.warm);
        assert!(report.evicted.is_empty());
        assert!(report.shutdown_sent.is_empty());
    }
    assert_eq!(sup.registry().live_count(), 4);

    let report = sup.tick(t0 + ms(1_001)).await;
    assert!(report.warm);
    assert_eq!(report.evicted, vec![A, B, C, D]);
    assert_eq!(report.shutdown_sent, vec![A, B, C, D]);
}

#[tokio::test]
async fn test_enough_live_workers_means_no_shutdown() {
    let manager = MockProcessManager::with_workers([101, 102, 103, 104]);
    let mut sup = Supervisor::new(policy(3, 0, 100), manager.clone()).unwrap();
    let t0 = Instant::now();
    sup.tick(t0).await;

    for step in 1..=20 {
        let now = t0 + ms(step * 50);
        beat(&mut sup, &[A, B, C], now);
        let report = sup.tick(now).await;
        assert!(report.live >= 3);
        assert!(report.shutdown_sent.is_empty());
    }
    assert!(manager.sent().is_empty());
}

#[tokio::test]
async fn test_shutdown_repeats_once_per_worker_per_tick() {
    let manager = MockProcessManager::with_workers([101, 102]);
    let mut sup = Supervisor::new(policy(1, 0, 100), manager.clone()).unwrap();
    let t0 = Instant::now();
    sup.tick(t0).await;

    for step in 1..=3 {
        let report = sup.tick(t0 + ms(step * 50)).await;
        assert_eq!(report.shutdown_sent, vec![A, B]);
        let sent = manager.take_sent();
        assert_eq!(
            sent,
            vec![(A, Directive::Shutdown), (B, Directive::Shutdown)]
        );
    }
}

#[tokio::test]
async fn test_shutdown_reaches_silent_and_exited_registered_workers() {
    let manager = MockProcessManager::with_workers([101, 102, 103]);
    let mut sup = Supervisor::new(policy(2, 0, 100), manager.clone()).unwrap();
    let t0 = Instant::now();
    sup.tick(t0).await;
    beat(&mut sup, &[A, B, C], t0);

    manager.exit(C, ExitReason::Clean);
    sup.drain_events(t0);

    beat(&mut sup, &[A], t0 + ms(200));
    let report = sup.tick(t0 + ms(200)).await;
    assert_eq!(report.evicted, vec![B, C]);
    // The exited worker is still registered, so it is targeted; delivery fails.
    assert_eq!(report.shutdown_sent, vec![A, B]);
    assert_eq!(report.send_failures, vec![C]);
}

#[tokio::test]
async fn test_evicted_worker_becomes_live_again() {
    let manager = MockProcessManager::with_workers([101, 102, 103]);
    let mut sup = Supervisor::new(policy(2, 0, 100), manager.clone()).unwrap();
    let t0 = Instant::now();
    sup.tick(t0).await;
    beat(&mut sup, &[A, B, C], t0);

    beat(&mut sup, &[A, B], t0 + ms(150));
    let report = sup.tick(t0 + ms(150)).await;
    assert_eq!(report.evicted, vec![C]);
    assert!(!sup.registry().is_live(C));

    beat(&mut sup, &[A, B, C], t0 + ms(200));
    assert!(sup.registry().is_live(C));
    let report = sup.tick(t0 + ms(200)).await;
    assert!(report.evicted.is_empty());
    assert_eq!(report.live, 3);
}

#[tokio::test]
async fn test_respawned_worker_is_registered_fresh() {
    let manager = MockProcessManager::with_workers([101, 102, 103]);
    let mut sup = Supervisor::new(policy(2, 0, 100), manager.clone()).unwrap();
    let t0 = Instant::now();
    sup.tick(t0).await;
    beat(&mut sup, &[A, B, C], t0);

    manager.exit(C, ExitReason::Signal(11));
    manager.spawn(D);
    sup.drain_events(t0 + ms(20));

    let report = sup.tick(t0 + ms(50)).await;
    assert_eq!(report.registered, vec![D]);
    assert_eq!(sup.registry().registered_count(), 4);

    beat(&mut sup, &[A, B, D], t0 + ms(200));
    let report = sup.tick(t0 + ms(200)).await;
    assert_eq!(report.evicted, vec![C]);
    assert_eq!(report.live, 3);
    assert!(report.shutdown_sent.is_empty());
}

#[tokio::test]
async fn test_worker_respawned_under_same_id_becomes_live_again() {
    let manager = MockProcessManager::with_workers([101, 102, 103]);
    let mut sup = Supervisor::new(policy(2, 0, 100), manager.clone()).unwrap();
    let t0 = Instant::now();
    sup.tick(t0).await;
    beat(&mut sup, &[A, B, C], t0);

    manager.exit(C, ExitReason::Signal(9));
    sup.drain_events(t0 + ms(10));

    beat(&mut sup, &[A, B], t0 + ms(150));
    let report = sup.tick(t0 + ms(150)).await;
    assert_eq!(report.evicted, vec![C]);

    // The pid comes back for a new process.
    manager.spawn(C);
    let report = sup.tick(t0 + ms(200)).await;
    assert!(report.registered.is_empty());
    assert_eq!(report.reattached, vec![C]);
    assert_eq!(sup.registry().registered_count(), 3);
    assert_eq!(sup.registry().record(C).unwrap().registered_at, t0);
    assert_eq!(sup.registry().ready_at(), Some(t0));

    beat(&mut sup, &[A, B, C], t0 + ms(210));
    assert!(sup.registry().is_live(C));
    let report = sup.tick(t0 + ms(250)).await;
    assert!(report.evicted.is_empty());
    assert_eq!(report.live, 3);
}

#[tokio::test]
async fn test_live_workers_always_registered() {
    let manager = MockProcessManager::with_workers([101, 102]);
    let mut sup = Supervisor::new(policy(1, 0, 100), manager.clone()).unwrap();
    let t0 = Instant::now();
    sup.tick(t0).await;

    // Spawned but not yet scanned: no observer, so no way to become live.
    manager.spawn(C);
    assert!(!manager.heartbeat(C));
    beat(&mut sup, &[A, B], t0);
    assert_eq!(sup.registry().live_count(), 2);
    assert!(!sup.registry().is_registered(C));
}

#[tokio::test(start_paused = true)]
async fn test_running_loop_broadcasts_when_workers_go_quiet() {
    let manager = MockProcessManager::with_workers([101, 102, 103]);
    let sup = Supervisor::new(policy(2, 100, 200), manager.clone()).unwrap();
    let handle = sup.start();

    // Heartbeats every 40ms for half a second, then only A keeps going.
    let beater = {
        let manager = manager.clone();
        tokio::spawn(async move {
            for round in 0..40 {
                tokio::time::sleep(ms(40)).await;
                manager.heartbeat(A);
                if round < 12 {
                    manager.heartbeat(B);
                    manager.heartbeat(C);
                }
            }
        })
    };

    tokio::time::sleep(ms(480)).await;
    assert!(manager.sent().is_empty());

    beater.await.unwrap();
    let sup = handle.stop().await.unwrap();

    assert!(sup.registry().is_live(A));
    assert!(!sup.registry().is_live(B));
    assert!(!sup.registry().is_live(C));
    assert!(manager.shutdowns_to(A) >= 1);
    assert!(manager.shutdowns_to(B) >= 1);
    assert!(manager.shutdowns_to(C) >= 1);
}
