// src/resilience/tests/mod.rs
//! Tests for resilience features

mod connection_monitor_tests;

// Common test utilities for resilience testing
pub(crate) mod utils {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::MonitorConfig;
    use crate::resilience::ConnectionMonitor;
    use crate::test_utils::MockRemoteStore;

    /// Monitor settings with test-sized intervals and no background task
    pub fn fast_monitor_config(probe_interval: Duration) -> MonitorConfig {
        MonitorConfig {
            probe_interval,
            latency_budget: Duration::from_millis(100),
            background_keep_alive: false,
        }
    }

    pub fn monitored_mock(probe_interval: Duration) -> (Arc<MockRemoteStore>, Arc<ConnectionMonitor>) {
        let remote = Arc::new(MockRemoteStore::new());
        let monitor = Arc::new(ConnectionMonitor::new(
            remote.clone(),
            fast_monitor_config(probe_interval),
        ));
        (remote, monitor)
    }
}
