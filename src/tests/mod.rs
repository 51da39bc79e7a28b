// src/tests/mod.rs


pub(crate) mod helpers {
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::{CacheConfig, LocalStoreConfig, MonitorConfig, PatternRemoval};
    use crate::resilience::ResilientCache;
    use crate::test_utils::MockRemoteStore;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Order {
        pub id: u64,
        pub customer: String,
        pub total_cents: i64,
        pub note: Option<String>,
    }

    pub fn order(id: u64) -> Order {
        Order {
            id,
            customer: format!("customer-{}", id),
            total_cents: 1250 * id as i64,
            note: None,
        }
    }

    pub fn test_config(probe_interval: Duration, pattern_removal: PatternRemoval) -> CacheConfig {
        CacheConfig {
            default_ttl: Duration::from_secs(30 * 60),
            local: LocalStoreConfig {
                use_background_task: false,
                pattern_removal,
                ..LocalStoreConfig::default()
            },
            monitor: MonitorConfig {
                probe_interval,
                latency_budget: Duration::from_millis(100),
                background_keep_alive: false,
            },
            ..CacheConfig::default()
        }
    }

    pub fn cache_with_mock(probe_interval: Duration) -> (Arc<MockRemoteStore>, ResilientCache) {
        cache_with_mock_and(probe_interval, PatternRemoval::Scan)
    }

    pub fn cache_with_mock_and(
        probe_interval: Duration,
        pattern_removal: PatternRemoval,
    ) -> (Arc<MockRemoteStore>, ResilientCache) {
        let remote = Arc::new(MockRemoteStore::new());
        let cache = ResilientCache::with_remote(
            test_config(probe_interval, pattern_removal),
            remote.clone(),
        );
        (remote, cache)
    }
}
