// src/resilience/tests/connection_monitor_tests.rs

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing_test::traced_test;

use super::utils::{fast_monitor_config, monitored_mock};
use crate::resilience::{ConnectionMonitor, ConnectionState};

#[tokio::test]
async fn test_connected_monitor_starts_available() {
    let (remote, monitor) = monitored_mock(Duration::from_secs(60));

    assert_eq!(monitor.state(), ConnectionState::Available);
    assert!(monitor.is_available().await);
    // The fast path never pings
    assert_eq!(remote.ping_count(), 0);
    assert_eq!(monitor.probe_count(), 0);
}

#[tokio::test]
async fn test_not_configured_never_probes() {
    let monitor = ConnectionMonitor::not_configured(fast_monitor_config(Duration::from_millis(1)));

    assert_eq!(monitor.state(), ConnectionState::NotConfigured);
    for _ in 0..5 {
        assert!(!monitor.is_available().await);
        time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(monitor.probe_count(), 0);

    // Nothing to mark
    monitor.mark_unavailable("ignored");
    assert_eq!(monitor.state(), ConnectionState::NotConfigured);
}

#[traced_test]
#[tokio::test]
async fn test_probe_restores_availability() {
    let (remote, monitor) = monitored_mock(Duration::from_secs(60));

    monitor.mark_unavailable("connection reset");
    assert_eq!(monitor.state(), ConnectionState::Unavailable);
    assert!(logs_contain("Remote cache marked unavailable"));

    // Never probed before, so the first caller probes right away
    assert!(monitor.is_available().await);
    assert_eq!(monitor.state(), ConnectionState::Available);
    assert_eq!(monitor.probe_count(), 1);
    assert_eq!(remote.ping_count(), 1);
    assert!(logs_contain("Remote cache connection restored"));
}

#[tokio::test]
async fn test_failed_probe_is_throttled_for_the_interval() {
    let (remote, monitor) = monitored_mock(Duration::from_millis(100));
    remote.set_down(true);
    monitor.mark_unavailable("connection refused");

    assert!(!monitor.is_available().await);
    assert_eq!(monitor.probe_count(), 1);

    // Within the interval: cached answer, no new ping even after the backend recovers
    remote.set_down(false);
    for _ in 0..10 {
        assert!(!monitor.is_available().await);
    }
    assert_eq!(remote.ping_count(), 1);

    time::sleep(Duration::from_millis(150)).await;

    assert!(monitor.is_available().await);
    assert_eq!(monitor.probe_count(), 2);
}

// At most one probe per interval however many callers are waiting
#[tokio::test]
async fn test_concurrent_callers_share_one_probe() {
    let (remote, monitor) = monitored_mock(Duration::from_secs(60));
    remote.set_down(true);
    remote.set_ping_delay(Duration::from_millis(20));
    monitor.mark_unavailable("connection refused");

    let results = join_all((0..200).map(|_| monitor.is_available())).await;

    assert!(results.iter().all(|available| !available));
    assert_eq!(monitor.probe_count(), 1);
    assert_eq!(remote.ping_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tasks_share_one_probe() {
    let (remote, monitor) = monitored_mock(Duration::from_secs(60));
    remote.set_down(true);
    remote.set_ping_delay(Duration::from_millis(20));
    monitor.mark_unavailable("connection refused");

    let handles: Vec<_> = (0..150)
        .map(|_| {
            let monitor = Arc::clone(&monitor);
            tokio::spawn(async move { monitor.is_available().await })
        })
        .collect();

    for handle in handles {
        assert!(!handle.await.unwrap());
    }
    assert!(remote.ping_count() <= 1);
    assert!(monitor.probe_count() <= 1);
}

#[traced_test]
#[tokio::test]
async fn test_slow_probe_counts_as_failure() {
    let (remote, monitor) = monitored_mock(Duration::from_secs(60));
    // Latency budget is 100ms
    remote.set_ping_delay(Duration::from_millis(250));
    monitor.mark_unavailable("timeout");

    assert!(!monitor.is_available().await);
    assert_eq!(monitor.state(), ConnectionState::Unavailable);
    assert!(logs_contain("Remote cache probe timed out"));
}

#[tokio::test]
async fn test_snapshot_records_last_probe() {
    let (_remote, monitor) = monitored_mock(Duration::from_secs(60));

    let before = monitor.snapshot().await;
    assert_eq!(before.state, ConnectionState::Available);
    assert!(before.last_checked_at.is_none());
    assert_eq!(before.probes, 0);

    monitor.mark_unavailable("reset");
    monitor.is_available().await;

    let after = monitor.snapshot().await;
    assert_eq!(after.state, ConnectionState::Available);
    assert!(after.last_checked_at.is_some());
    assert!(after.last_latency.is_some());
    assert_eq!(after.probes, 1);
}

// A probe abandoned mid-flight still counts against the interval and frees the slot
#[tokio::test]
async fn test_cancelled_probe_leaves_consistent_state() {
    let (remote, monitor) = monitored_mock(Duration::from_secs(60));
    remote.set_ping_delay(Duration::from_millis(80));
    monitor.mark_unavailable("reset");

    let cancelled = time::timeout(Duration::from_millis(10), monitor.is_available()).await;
    assert!(cancelled.is_err());

    assert_eq!(monitor.state(), ConnectionState::Unavailable);
    assert_eq!(monitor.probe_count(), 1);

    // Slot is free again and the interval is still running
    assert!(!monitor.is_available().await);
    assert_eq!(monitor.probe_count(), 1);
    let snapshot = time::timeout(Duration::from_millis(50), monitor.snapshot()).await;
    assert!(snapshot.is_ok());
}

#[tokio::test]
async fn test_keep_alive_detects_outage_and_recovery() {
    let (remote, monitor) = monitored_mock(Duration::from_millis(40));
    monitor.start_keep_alive(Duration::from_millis(30));

    remote.set_down(true);
    time::sleep(Duration::from_millis(120)).await;
    assert_eq!(monitor.state(), ConnectionState::Unavailable);

    remote.set_down(false);
    time::sleep(Duration::from_millis(200)).await;
    assert_eq!(monitor.state(), ConnectionState::Available);

    monitor.stop();
}

// A keep-alive ping that outlasts the latency budget counts as an outage
#[traced_test]
#[tokio::test]
async fn test_keep_alive_ping_is_bounded_by_latency_budget() {
    let (remote, monitor) = monitored_mock(Duration::from_secs(60));
    // Latency budget is 100ms; the reply would still arrive, just too late
    remote.set_ping_delay(Duration::from_millis(250));
    monitor.start_keep_alive(Duration::from_millis(30));

    time::sleep(Duration::from_millis(200)).await;
    assert_eq!(monitor.state(), ConnectionState::Unavailable);
    assert!(logs_contain("latency budget"));

    monitor.stop();
}

#[tokio::test]
async fn test_stopped_keep_alive_does_not_ping() {
    let (remote, monitor) = monitored_mock(Duration::from_millis(40));
    monitor.start_keep_alive(Duration::from_millis(20));
    time::sleep(Duration::from_millis(70)).await;
    assert!(remote.ping_count() > 0);

    monitor.stop();
    time::sleep(Duration::from_millis(30)).await;
    let pings = remote.ping_count();

    time::sleep(Duration::from_millis(100)).await;
    assert_eq!(remote.ping_count(), pings);
    assert_eq!(monitor.state(), ConnectionState::Available);
}

#[tokio::test]
async fn test_dropping_monitor_ends_keep_alive() {
    let (remote, monitor) = monitored_mock(Duration::from_millis(40));
    monitor.start_keep_alive(Duration::from_millis(20));
    time::sleep(Duration::from_millis(50)).await;

    drop(monitor);
    time::sleep(Duration::from_millis(30)).await;
    let pings = remote.ping_count();

    time::sleep(Duration::from_millis(100)).await;
    assert_eq!(remote.ping_count(), pings);
    // Only the test still holds the remote
    assert_eq!(Arc::strong_count(&remote), 1);
}
